use super::plane::Plane;
use crate::cloud::PointCloud;

/// Strict bipartition of a tile around its ground plane.
#[derive(Debug, Clone, Default)]
pub struct GroundSplit {
    pub ground: PointCloud,
    pub non_ground: PointCloud,
}

/// Points with signed distance `<= split_dist` are ground, including
/// everything below the plane.
pub fn split_tile(cloud: &PointCloud, plane: &Plane, split_dist: f64) -> GroundSplit {
    let mask: Vec<bool> = cloud
        .points
        .iter()
        .map(|p| plane.signed_distance(p) <= split_dist)
        .collect();
    let (ground, non_ground) = cloud.partition_by_mask(&mask);
    GroundSplit { ground, non_ground }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    #[test]
    fn split_is_bipartition_on_threshold() {
        let plane = Plane::new(Vector3::z(), -1.0).unwrap();
        let cloud = PointCloud::from(
            [0.0, 0.5, 1.0, 1.1, 1.2, 3.0]
                .iter()
                .map(|&z| nalgebra::Point3::new(0.0, 0.0, z))
                .collect::<Vec<_>>(),
        );
        let split = split_tile(&cloud, &plane, 0.12);
        assert_eq!(split.ground.len() + split.non_ground.len(), cloud.len());
        assert!(split.ground.points.iter().all(|p| plane.signed_distance(p) <= 0.12));
        assert!(split.non_ground.points.iter().all(|p| plane.signed_distance(p) > 0.12));
        assert_eq!(split.non_ground.len(), 2);
    }
}
