/// Shared defaults for point cloud segmentation

/// Target population of a final tile
pub const TARGET_POINTS_PER_TILE: usize = 100_000;

/// Fraction of points fed to k-means
pub const TILER_KEEP_RATIO: f64 = 0.02;

/// Nearest other tiles recorded per tile
pub const NEIGHBOR_COUNT: usize = 6;

/// Tiles below this population get no plane
pub const MIN_PLANE_POINTS: usize = 50;

/// Ground candidates: bottom z quantile plus a slack band
pub const PREFILTER_QUANTILE: f64 = 0.3;
pub const PREFILTER_SLACK: f64 = 0.25;

/// Minimum vertical alignment of a usable ground plane
pub const MIN_PLANE_NZ: f64 = 0.9;

/// Below this |n.z| a plane cannot be evaluated as a height field
pub const VERTICAL_PLANE_EPS: f64 = 1e-9;

/// Lower-corner pad applied to raster extents
pub const RASTER_EPS: f64 = 1e-6;

/// Gap between ground and the bottom of a reconstructed object box
pub const OBJECT_GROUND_CLEARANCE: f64 = 0.2;

/// Fraction of a box height used for ground infill
pub const INFILL_BAND_FRACTION: f64 = 0.05;

/// Infill points per square unit of footprint
pub const INFILL_DENSITY: f64 = 30.0;

/// Progress bar layout shared by all stages
pub const PROGRESS_TEMPLATE: &str = "[{bar:40.green/blue}] {pos}/{len} {msg} ({percent}%)";
pub const PROGRESS_CHARS: &str = "▉▊▋▌▍▎▏ ";
