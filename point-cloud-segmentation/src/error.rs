//! Error taxonomy for the segmentation pipeline.
use std::path::PathBuf;

/// Errors raised by pipeline stages.
///
/// The first four variants are per-tile conditions: callers log them and
/// skip the tile. The wrapped variants are fatal for the operation that
/// produced them.
#[derive(Debug, thiserror::Error)]
pub enum SegmentationError {
    #[error("too few points: need {needed}, got {got}")]
    DegenerateInput { needed: usize, got: usize },

    #[error("plane is near vertical (n.z = {nz:.3e}); height above plane is undefined")]
    GeometricDegeneracy { nz: f64 },

    #[error("missing artifact: {}", .0.display())]
    MissingArtifact(PathBuf),

    #[error("no points survived {stage}")]
    EmptyResult { stage: &'static str },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("LAS error: {0}")]
    Las(#[from] las::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("DDS error: {0}")]
    Dds(#[from] ddsfile::Error),

    #[error("spatial index error: {0}")]
    SpatialIndex(String),
}

impl SegmentationError {
    /// True for conditions that skip a single tile instead of aborting a run.
    pub fn is_tile_skip(&self) -> bool {
        matches!(
            self,
            Self::DegenerateInput { .. }
                | Self::GeometricDegeneracy { .. }
                | Self::MissingArtifact(_)
                | Self::EmptyResult { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SegmentationError>;
