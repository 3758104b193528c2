//! Flat point list in one global frame.
use crate::bounds::PointCloudBounds;
use nalgebra::Point3;
use rayon::prelude::*;

/// Unordered 3D points. Clouds are never edited in place by the pipeline;
/// filters produce new clouds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    pub points: Vec<Point3<f64>>,
}

impl PointCloud {
    pub fn new(points: Vec<Point3<f64>>) -> Self {
        Self { points }
    }

    pub fn with_capacity(n: usize) -> Self {
        Self {
            points: Vec::with_capacity(n),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn push(&mut self, x: f64, y: f64, z: f64) {
        self.points.push(Point3::new(x, y, z));
    }

    pub fn bounds(&self) -> PointCloudBounds {
        self.points
            .par_chunks(25_000)
            .map(PointCloudBounds::from_points)
            .reduce(PointCloudBounds::new, PointCloudBounds::merge)
    }

    /// New cloud holding the points at `indices`, in index order.
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            points: indices.iter().map(|&i| self.points[i]).collect(),
        }
    }

    /// Split by a per-point mask into (kept where true, rest).
    pub fn partition_by_mask(&self, mask: &[bool]) -> (Self, Self) {
        debug_assert_eq!(mask.len(), self.points.len());
        let mut yes = Vec::new();
        let mut no = Vec::new();
        for (p, &m) in self.points.iter().zip(mask) {
            if m {
                yes.push(*p);
            } else {
                no.push(*p);
            }
        }
        (Self::new(yes), Self::new(no))
    }
}

impl From<Vec<Point3<f64>>> for PointCloud {
    fn from(points: Vec<Point3<f64>>) -> Self {
        Self { points }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_keeps_every_point_once() {
        let cloud = PointCloud::new(vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
        ]);
        let (a, b) = cloud.partition_by_mask(&[true, false, true]);
        assert_eq!(a.len(), 2);
        assert_eq!(b.points, vec![Point3::new(1.0, 0.0, 0.0)]);
    }

    #[test]
    fn select_follows_index_order() {
        let mut cloud = PointCloud::default();
        cloud.push(0.0, 0.0, 0.0);
        cloud.push(5.0, 5.0, 5.0);
        let picked = cloud.select(&[1, 0]);
        assert_eq!(picked.points[0], Point3::new(5.0, 5.0, 5.0));
    }
}
