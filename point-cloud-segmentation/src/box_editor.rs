//! Manual correction of a cloud with oriented boxes: remove what is inside,
//! optionally lay synthetic ground over the box footprint.
use crate::cloud::PointCloud;
use crate::config::BoxEditConfig;
use crate::constants::INFILL_BAND_FRACTION;
use crate::error::Result;
use crate::layout::read_json;
use constants::class::{GROUND_INFILL, UNCLASSIFIED};
use constants::coordinate_system::{capture_extent_to_scan, capture_to_scan};
use log::info;
use nalgebra::{Point3, Rotation3, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Box as stored by the capture tool (y-up frame).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditBox {
    pub center: [f64; 3],
    pub size: [f64; 3],
    /// Radians about the vertical axis.
    #[serde(default)]
    pub yaw: f64,
    #[serde(default, alias = "infill")]
    pub fill_surface: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BoxFile {
    pub bounding_box: Vec<EditBox>,
}

impl BoxFile {
    pub fn read(path: &Path) -> Result<Self> {
        read_json(path)
    }
}

/// Box converted into the scan frame.
#[derive(Debug, Clone, Copy)]
pub struct ScanBox {
    pub center: Point3<f64>,
    pub half: Vector3<f64>,
    pub yaw: f64,
    pub fill: bool,
}

impl From<&EditBox> for ScanBox {
    fn from(b: &EditBox) -> Self {
        let (cx, cy, cz) = capture_to_scan(b.center[0], b.center[1], b.center[2]);
        let (sx, sy, sz) = capture_extent_to_scan(b.size[0], b.size[1], b.size[2]);
        Self {
            center: Point3::new(cx, cy, cz),
            half: Vector3::new(sx, sy, sz).abs() / 2.0,
            yaw: b.yaw,
            fill: b.fill_surface,
        }
    }
}

impl ScanBox {
    fn to_local(&self) -> Rotation3<f64> {
        Rotation3::from_axis_angle(&Vector3::z_axis(), -self.yaw)
    }

    /// Inclusive containment in the box's local frame.
    pub fn contains(&self, p: &Point3<f64>) -> bool {
        self.contains_with(&self.to_local(), p)
    }

    fn contains_with(&self, to_local: &Rotation3<f64>, p: &Point3<f64>) -> bool {
        let local = to_local * (p - self.center);
        local.x.abs() <= self.half.x && local.y.abs() <= self.half.y && local.z.abs() <= self.half.z
    }

    pub fn footprint_area(&self) -> f64 {
        4.0 * self.half.x * self.half.y
    }

    /// Uniform points over the footprint, within the bottom band of the box.
    pub fn infill(&self, density: f64, rng: &mut StdRng) -> Vec<Point3<f64>> {
        let count = (self.footprint_area() * density).floor() as usize;
        let to_world = Rotation3::from_axis_angle(&Vector3::z_axis(), self.yaw);
        let floor = -self.half.z;
        let band = 2.0 * self.half.z * INFILL_BAND_FRACTION;
        (0..count)
            .map(|_| {
                let local = Vector3::new(
                    rng.random_range(-self.half.x..=self.half.x),
                    rng.random_range(-self.half.y..=self.half.y),
                    rng.random_range(floor..=floor + band),
                );
                self.center + to_world * local
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoxEditStats {
    pub removed: usize,
    pub filled: usize,
}

#[derive(Debug, Clone)]
pub struct EditOutcome {
    /// Input minus every removed point, followed by all infill points.
    pub cloud: PointCloud,
    /// Number of surviving input points at the front of `cloud`.
    pub kept: usize,
    pub per_box: Vec<BoxEditStats>,
}

impl EditOutcome {
    /// LAS codes per point: surviving input unclassified, infill tagged.
    pub fn classes(&self) -> Vec<u8> {
        (0..self.cloud.len())
            .map(|i| if i < self.kept { UNCLASSIFIED } else { GROUND_INFILL })
            .collect()
    }
}

pub struct BoxEditor {
    config: BoxEditConfig,
}

impl BoxEditor {
    pub fn new(config: BoxEditConfig) -> Self {
        Self { config }
    }

    pub fn edit(&self, cloud: &PointCloud, boxes: &[EditBox]) -> EditOutcome {
        let boxes: Vec<ScanBox> = boxes.iter().map(ScanBox::from).collect();
        let mut rng = StdRng::seed_from_u64(self.config.seed);

        let mut remove = vec![false; cloud.len()];
        let mut infill = Vec::new();
        let mut per_box = Vec::with_capacity(boxes.len());

        for (i, b) in boxes.iter().enumerate() {
            let to_local = b.to_local();
            let inside: Vec<bool> = cloud
                .points
                .par_iter()
                .map(|p| b.contains_with(&to_local, p))
                .collect();
            let mut stats = BoxEditStats::default();
            for (r, hit) in remove.iter_mut().zip(&inside) {
                if *hit {
                    stats.removed += 1;
                    *r = true;
                }
            }
            if b.fill {
                let pts = b.infill(self.config.infill_density, &mut rng);
                stats.filled = pts.len();
                infill.extend(pts);
            }
            info!("Box {}: removed {} points, filled {}", i, stats.removed, stats.filled);
            per_box.push(stats);
        }

        let keep: Vec<bool> = remove.iter().map(|r| !r).collect();
        let (mut out, _) = cloud.partition_by_mask(&keep);
        let kept = out.len();
        out.points.extend(infill);
        EditOutcome {
            cloud: out,
            kept,
            per_box,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn grid_cloud() -> PointCloud {
        let mut cloud = PointCloud::default();
        for i in -20..=20 {
            for j in -20..=20 {
                for k in 0..5 {
                    cloud.push(i as f64 * 0.25, j as f64 * 0.25, k as f64 * 0.5);
                }
            }
        }
        cloud
    }

    #[test]
    fn capture_box_is_converted_once() {
        let b = EditBox {
            center: [1.0, 2.0, 3.0],
            size: [4.0, 6.0, 2.0],
            yaw: 0.0,
            fill_surface: false,
        };
        let s = ScanBox::from(&b);
        assert_eq!(s.center, Point3::new(1.0, -3.0, 2.0));
        assert_eq!(s.half, Vector3::new(2.0, 1.0, 3.0));
    }

    #[test]
    fn removed_box_is_empty_afterwards() {
        let cloud = grid_cloud();
        let boxes = vec![
            EditBox {
                center: [0.0, 1.0, 0.0],
                size: [2.0, 2.0, 1.0],
                yaw: 0.6,
                fill_surface: false,
            },
            EditBox {
                center: [3.0, 1.0, -3.0],
                size: [1.0, 2.0, 1.0],
                yaw: 0.0,
                fill_surface: false,
            },
        ];
        let out = BoxEditor::new(BoxEditConfig::default()).edit(&cloud, &boxes);
        assert!(out.per_box.iter().all(|s| s.removed > 0));
        assert!(out.cloud.len() < cloud.len());
        for b in &boxes {
            let scan = ScanBox::from(b);
            assert!(out.cloud.points.iter().all(|p| !scan.contains(p)));
        }
    }

    #[test]
    fn yaw_rotates_the_footprint() {
        let b = ScanBox {
            center: Point3::origin(),
            half: Vector3::new(2.0, 0.5, 1.0),
            yaw: std::f64::consts::FRAC_PI_2,
            fill: false,
        };
        assert!(b.contains(&Point3::new(0.0, 1.5, 0.0)));
        assert!(!b.contains(&Point3::new(1.5, 0.0, 0.0)));
    }

    #[test]
    fn infill_count_and_band() {
        let boxes = vec![EditBox {
            center: [10.0, 1.0, -5.0],
            size: [2.0, 4.0, 3.0],
            yaw: 0.3,
            fill_surface: true,
        }];
        let out = BoxEditor::new(BoxEditConfig::default()).edit(&PointCloud::default(), &boxes);
        // scan footprint 2 x 3 at density 30
        assert_eq!(out.per_box[0].filled, 180);
        assert_eq!(out.cloud.len(), 180);
        assert_eq!(out.kept, 0);
        assert!(out.classes().iter().all(|&c| c == GROUND_INFILL));

        let scan = ScanBox::from(&boxes[0]);
        let to_local = Rotation3::from_axis_angle(&Vector3::z_axis(), -scan.yaw);
        let band_top = -scan.half.z + 2.0 * scan.half.z * INFILL_BAND_FRACTION;
        for p in &out.cloud.points {
            let local = to_local * (p - scan.center);
            assert!(local.x.abs() <= scan.half.x + 1e-9);
            assert!(local.y.abs() <= scan.half.y + 1e-9);
            assert!(local.z >= -scan.half.z - 1e-9 && local.z <= band_top + 1e-9);
        }
        assert_relative_eq!(scan.footprint_area(), 6.0);
    }

    #[test]
    fn infill_is_seeded() {
        let boxes = vec![EditBox {
            center: [0.0, 0.0, 0.0],
            size: [1.0, 1.0, 1.0],
            yaw: 0.0,
            fill_surface: true,
        }];
        let editor = BoxEditor::new(BoxEditConfig::default());
        let a = editor.edit(&PointCloud::default(), &boxes);
        let b = editor.edit(&PointCloud::default(), &boxes);
        assert_eq!(a.cloud, b.cloud);
    }

    #[test]
    fn box_file_defaults_and_alias() {
        let json = r#"{"job_id": "x", "bounding_box": [
            {"center": [0, 0, 0], "size": [1, 1, 1]},
            {"center": [0, 0, 0], "size": [1, 1, 1], "yaw": 0.5, "infill": true}
        ]}"#;
        let file: BoxFile = serde_json::from_str(json).unwrap();
        assert_eq!(file.bounding_box[0].yaw, 0.0);
        assert!(!file.bounding_box[0].fill_surface);
        assert!(file.bounding_box[1].fill_surface);
    }
}
