//! Point scan segmentation: spatial tiling, ground estimation, height
//! rasters, detection lifting and box editing.
pub mod bounds;
pub mod box_editor;
pub mod cloud;
pub mod cloud_io;
pub mod config;
pub mod constants;
pub mod dds_writer;
pub mod detection;
pub mod error;
pub mod ground;
pub mod heightmap;
pub mod layout;
pub mod manifest;
pub mod pipeline;
pub mod stats;
pub mod tiler;

pub use cloud::PointCloud;
pub use config::PipelineConfig;
pub use error::{Result, SegmentationError};
pub use pipeline::SegmentationPipeline;
