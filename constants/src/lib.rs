//! Constants shared across the segmentation workspace.
pub mod class;
pub mod coordinate_system;
