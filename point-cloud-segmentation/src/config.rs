//! Stage configuration. Every struct deserializes with per-field defaults so
//! a JSON file only needs the values it overrides.
use crate::constants::{
    INFILL_DENSITY, MIN_PLANE_NZ, MIN_PLANE_POINTS, NEIGHBOR_COUNT, OBJECT_GROUND_CLEARANCE,
    PREFILTER_QUANTILE, PREFILTER_SLACK, TARGET_POINTS_PER_TILE, TILER_KEEP_RATIO,
};
use crate::error::{Result, SegmentationError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TilerConfig {
    pub target_points_per_tile: usize,
    /// Sub-sampling rate for the clustering pass.
    pub keep_ratio: f64,
    pub seed: u64,
    pub kmeans_restarts: usize,
    pub kmeans_max_iterations: usize,
    pub neighbor_count: usize,
}

impl Default for TilerConfig {
    fn default() -> Self {
        Self {
            target_points_per_tile: TARGET_POINTS_PER_TILE,
            keep_ratio: TILER_KEEP_RATIO,
            seed: 42,
            kmeans_restarts: 10,
            kmeans_max_iterations: 300,
            neighbor_count: NEIGHBOR_COUNT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundConfig {
    pub min_points: usize,
    pub prefilter_quantile: f64,
    pub prefilter_slack: f64,
    /// RANSAC inlier distance.
    pub distance_threshold: f64,
    pub iterations: usize,
    /// Tiles larger than this are randomly thinned before fitting.
    pub max_fit_points: usize,
    pub min_nz: f64,
    pub angle_hard_deg: f64,
    pub angle_soft_deg: f64,
    pub inlier_min: f64,
    pub split_dist: f64,
    pub seed: u64,
}

impl Default for GroundConfig {
    fn default() -> Self {
        Self {
            min_points: MIN_PLANE_POINTS,
            prefilter_quantile: PREFILTER_QUANTILE,
            prefilter_slack: PREFILTER_SLACK,
            distance_threshold: 0.12,
            iterations: 1000,
            max_fit_points: 300_000,
            min_nz: MIN_PLANE_NZ,
            angle_hard_deg: 10.0,
            angle_soft_deg: 5.0,
            inlier_min: 0.3,
            split_dist: 0.12,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapMode {
    /// Heights above the limit are drawn at the limit.
    Clamp,
    /// Points above the limit are ignored.
    Drop,
}

impl FromStr for CapMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "clamp" => Ok(CapMode::Clamp),
            "drop" => Ok(CapMode::Drop),
            other => Err(format!("unknown cap mode '{other}', expected clamp or drop")),
        }
    }
}

impl fmt::Display for CapMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapMode::Clamp => write!(f, "clamp"),
            CapMode::Drop => write!(f, "drop"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeightmapConfig {
    /// World units per pixel.
    pub resolution: f64,
    pub max_height: f64,
    pub cap_mode: CapMode,
    /// 8 or 16.
    pub bits: u8,
    /// Value written into cells with zero height.
    pub bg_value: u16,
}

impl Default for HeightmapConfig {
    fn default() -> Self {
        Self {
            resolution: 0.10,
            max_height: 5.0,
            cap_mode: CapMode::Clamp,
            bits: 8,
            bg_value: 0,
        }
    }
}

impl HeightmapConfig {
    pub fn max_value(&self) -> u16 {
        if self.bits == 16 { u16::MAX } else { u8::MAX as u16 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub ground_clearance: f64,
    /// Vertical extent of reconstructed boxes; the heightmap's
    /// `max_height` when unset.
    pub object_height: Option<f64>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            ground_clearance: OBJECT_GROUND_CLEARANCE,
            object_height: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoxEditConfig {
    /// Infill points per square unit of box footprint.
    pub infill_density: f64,
    pub seed: u64,
}

impl Default for BoxEditConfig {
    fn default() -> Self {
        Self {
            infill_density: INFILL_DENSITY,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub tiler: TilerConfig,
    pub ground: GroundConfig,
    pub heightmap: HeightmapConfig,
    pub detection: DetectionConfig,
    pub box_edit: BoxEditConfig,
}

impl PipelineConfig {
    /// Settings used for a full end-to-end run: sparser clustering sample,
    /// wider ground band, coarser rasters capped at 3 m with drop.
    pub fn end_to_end() -> Self {
        let mut config = Self::default();
        config.tiler.keep_ratio = 0.01;
        config.ground.split_dist = 0.20;
        config.heightmap.resolution = 0.2;
        config.heightmap.max_height = 3.0;
        config.heightmap.cap_mode = CapMode::Drop;
        config.heightmap.bits = 8;
        config
    }

    /// Load overrides from a JSON file and validate them.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(SegmentationError::InvalidConfig(msg.to_string()));

        if self.tiler.target_points_per_tile == 0 {
            return invalid("tiler.target_points_per_tile must be at least 1");
        }
        if !(self.tiler.keep_ratio > 0.0 && self.tiler.keep_ratio <= 1.0) {
            return invalid("tiler.keep_ratio must be in (0, 1]");
        }
        if self.tiler.kmeans_restarts == 0 {
            return invalid("tiler.kmeans_restarts must be at least 1");
        }
        if self.ground.min_points < 3 {
            return invalid("ground.min_points must be at least 3");
        }
        if self.ground.max_fit_points < self.ground.min_points {
            return invalid("ground.max_fit_points must be at least ground.min_points");
        }
        if self.ground.iterations == 0 {
            return invalid("ground.iterations must be at least 1");
        }
        if self.ground.distance_threshold <= 0.0 {
            return invalid("ground.distance_threshold must be positive");
        }
        if self.heightmap.resolution <= 0.0 {
            return invalid("heightmap.resolution must be positive");
        }
        if self.heightmap.max_height <= 0.0 {
            return invalid("heightmap.max_height must be positive");
        }
        if self.heightmap.bits != 8 && self.heightmap.bits != 16 {
            return invalid("heightmap.bits must be 8 or 16");
        }
        if self.heightmap.bg_value > self.heightmap.max_value() {
            return invalid("heightmap.bg_value exceeds the bit depth");
        }
        if let Some(h) = self.detection.object_height {
            if h <= 0.0 {
                return invalid("detection.object_height must be positive");
            }
        }
        if self.box_edit.infill_density < 0.0 {
            return invalid("box_edit.infill_density must not be negative");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let json = r#"{ "heightmap": { "cap_mode": "drop", "bits": 16 }, "ground": { "split_dist": 0.2 } }"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.heightmap.cap_mode, CapMode::Drop);
        assert_eq!(config.heightmap.max_value(), 65535);
        assert_eq!(config.heightmap.resolution, 0.10);
        assert_eq!(config.ground.split_dist, 0.2);
        assert_eq!(config.ground.iterations, 1000);
        assert_eq!(config.tiler.neighbor_count, 6);
        config.validate().unwrap();
    }

    #[test]
    fn end_to_end_settings_are_valid() {
        let config = PipelineConfig::end_to_end();
        config.validate().unwrap();
        assert_eq!(config.heightmap.cap_mode, CapMode::Drop);
        assert_eq!("drop".parse::<CapMode>(), Ok(CapMode::Drop));
        assert!("crop".parse::<CapMode>().is_err());
    }

    #[test]
    fn rejects_unsupported_bit_depth() {
        let mut config = PipelineConfig::default();
        config.heightmap.bits = 12;
        assert!(matches!(
            config.validate(),
            Err(SegmentationError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_background_above_eight_bit_range() {
        let mut config = PipelineConfig::default();
        config.heightmap.bg_value = 300;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_fit_budget_below_min_points() {
        let mut config = PipelineConfig::default();
        config.ground.max_fit_points = 2;
        assert!(matches!(
            config.validate(),
            Err(SegmentationError::InvalidConfig(_))
        ));

        let mut config = PipelineConfig::default();
        config.ground.iterations = 0;
        assert!(config.validate().is_err());
    }
}
