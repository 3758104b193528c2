use super::Detection;
use crate::cloud::PointCloud;
use crate::config::DetectionConfig;
use crate::error::{Result, SegmentationError};
use crate::heightmap::HeightMapMeta;
use nalgebra::Point3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Axis-aligned 3D box with inclusive bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectBox {
    pub min: Point3<f64>,
    pub max: Point3<f64>,
}

impl ObjectBox {
    pub fn contains(&self, p: &Point3<f64>) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    pub fn center(&self) -> Point3<f64> {
        nalgebra::center(&self.min, &self.max)
    }

    pub fn size(&self) -> [f64; 3] {
        (self.max - self.min).into()
    }
}

/// A detection lifted into the tile's frame.
#[derive(Debug, Clone)]
struct Candidate {
    detection: Detection,
    bounds: ObjectBox,
    /// Box center on the ground plane, used to settle overlaps.
    anchor: Point3<f64>,
}

/// Reconstructed object and the points it claimed.
#[derive(Debug, Clone)]
pub struct Object3D {
    pub id: usize,
    pub class_id: i64,
    pub confidence: f64,
    pub bounds: ObjectBox,
    pub yaw: f64,
    pub cloud: PointCloud,
}

/// Mapper output for one tile.
#[derive(Debug, Clone)]
pub struct MappedTile {
    pub tile_id: usize,
    pub total_points: usize,
    /// Objects ordered by detection index; objects without points are absent.
    pub objects: Vec<Object3D>,
    pub residual: PointCloud,
    pub no_detections: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectSummary {
    pub id: usize,
    pub class_id: i64,
    pub confidence: f64,
    pub center: [f64; 3],
    pub size: [f64; 3],
    pub yaw: f64,
    pub points: usize,
    pub cloud_file: String,
}

/// `objects/tile_NNNN/summary.json`; `all_summary.json` is a list of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileDetectionSummary {
    pub tile_id: usize,
    pub clean_file: String,
    pub total_points: usize,
    pub removed_points: usize,
    pub no_detections: bool,
    pub objects: Vec<ObjectSummary>,
}

impl MappedTile {
    pub fn summary(
        &self,
        clean_file: &str,
        object_file: impl Fn(usize) -> String,
    ) -> TileDetectionSummary {
        TileDetectionSummary {
            tile_id: self.tile_id,
            clean_file: clean_file.to_string(),
            total_points: self.total_points,
            removed_points: self.total_points - self.residual.len(),
            no_detections: self.no_detections,
            objects: self
                .objects
                .iter()
                .map(|o| ObjectSummary {
                    id: o.id,
                    class_id: o.class_id,
                    confidence: o.confidence,
                    center: o.bounds.center().coords.into(),
                    size: o.bounds.size(),
                    yaw: o.yaw,
                    points: o.cloud.len(),
                    cloud_file: object_file(o.id),
                })
                .collect(),
        }
    }
}

pub struct DetectionMapper {
    config: DetectionConfig,
}

impl DetectionMapper {
    pub fn new(config: DetectionConfig) -> Self {
        Self { config }
    }

    /// World box and tie-break anchor for one detection.
    fn lift(&self, detection: &Detection, meta: &HeightMapMeta) -> Result<Candidate> {
        let plane = meta.plane().ok_or(SegmentationError::GeometricDegeneracy { nz: 0.0 })?;
        let [ox, oy] = meta.origin_xy;
        let res = meta.resolution;

        let x0 = ox + detection.xmin as f64 * res;
        let x1 = ox + detection.xmax as f64 * res;
        let y0 = oy + detection.ymin as f64 * res;
        let y1 = oy + detection.ymax as f64 * res;
        let (cx, cy) = (0.5 * (x0 + x1), 0.5 * (y0 + y1));

        let ground_z = plane.z_at(cx, cy)?;
        let z0 = ground_z + self.config.ground_clearance;
        let z1 = z0 + self.config.object_height.unwrap_or(meta.max_height);

        Ok(Candidate {
            detection: *detection,
            bounds: ObjectBox {
                min: Point3::new(x0.min(x1), y0.min(y1), z0),
                max: Point3::new(x0.max(x1), y0.max(y1), z1),
            },
            anchor: Point3::new(cx, cy, ground_z),
        })
    }

    /// Assign each point of `cloud` to at most one detection.
    pub fn map_tile(
        &self,
        tile_id: usize,
        cloud: &PointCloud,
        meta: &HeightMapMeta,
        detections: &[Detection],
    ) -> Result<MappedTile> {
        if detections.is_empty() {
            return Ok(MappedTile {
                tile_id,
                total_points: cloud.len(),
                objects: Vec::new(),
                residual: cloud.clone(),
                no_detections: true,
            });
        }

        let mut candidates = detections
            .iter()
            .map(|d| self.lift(d, meta))
            .collect::<Result<Vec<_>>>()?;
        candidates.sort_by_key(|c| c.detection.index);

        let owners: Vec<Option<usize>> = cloud
            .points
            .par_iter()
            .map(|p| owner_of(p, &candidates))
            .collect();

        let mut members: Vec<Vec<usize>> = vec![Vec::new(); candidates.len()];
        let mut keep = vec![true; cloud.len()];
        for (i, owner) in owners.iter().enumerate() {
            if let Some(c) = owner {
                members[*c].push(i);
                keep[i] = false;
            }
        }

        let objects = candidates
            .iter()
            .zip(&members)
            .filter(|(_, m)| !m.is_empty())
            .map(|(c, m)| Object3D {
                id: c.detection.index,
                class_id: c.detection.class_id,
                confidence: c.detection.confidence,
                bounds: c.bounds,
                yaw: 0.0,
                cloud: cloud.select(m),
            })
            .collect();
        let (residual, _) = cloud.partition_by_mask(&keep);

        Ok(MappedTile {
            tile_id,
            total_points: cloud.len(),
            objects,
            residual,
            no_detections: false,
        })
    }
}

/// Containing candidate with the nearest anchor; candidates are in index
/// order so the strict comparison keeps the lowest index on exact ties.
fn owner_of(p: &Point3<f64>, candidates: &[Candidate]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, c) in candidates.iter().enumerate() {
        if !c.bounds.contains(p) {
            continue;
        }
        let d = nalgebra::distance(p, &c.anchor);
        if best.is_none_or(|(_, bd)| d < bd) {
            best = Some((i, d));
        }
    }
    best.map(|(i, _)| i)
}
