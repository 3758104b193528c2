//! 2D detections over height rasters and their lift back into 3D objects.
mod mapper;

pub use mapper::{
    DetectionMapper, MappedTile, Object3D, ObjectBox, ObjectSummary, TileDetectionSummary,
};

use crate::error::{Result, SegmentationError};
use crate::heightmap::HeightMapMeta;
use std::path::{Path, PathBuf};

/// Pixel-space box from an external detector. `index` is the position of
/// the source line among the non-empty lines of its label file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub index: usize,
    pub class_id: i64,
    pub xmin: i64,
    pub ymin: i64,
    pub xmax: i64,
    pub ymax: i64,
    pub confidence: f64,
}

impl Detection {
    /// Parse `class cx cy w h confidence` with normalized box values.
    /// Pixel bounds truncate toward zero. None for short or non-numeric lines.
    pub fn from_yolo_line(index: usize, line: &str, img_w: usize, img_h: usize) -> Option<Self> {
        let fields: Vec<f64> = line
            .split_whitespace()
            .take(6)
            .map(|f| f.parse::<f64>().ok())
            .collect::<Option<Vec<_>>>()?;
        let [class, cx, cy, w, h, confidence] = fields[..] else {
            return None;
        };
        let (img_w, img_h) = (img_w as f64, img_h as f64);
        let (cx, cy, w, h) = (cx * img_w, cy * img_h, w * img_w, h * img_h);
        Some(Self {
            index,
            class_id: class as i64,
            xmin: (cx - w / 2.0) as i64,
            ymin: (cy - h / 2.0) as i64,
            xmax: (cx + w / 2.0) as i64,
            ymax: (cy + h / 2.0) as i64,
            confidence,
        })
    }
}

/// Every parseable detection in a label file body.
pub fn parse_labels(text: &str, img_w: usize, img_h: usize) -> Vec<Detection> {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .enumerate()
        .filter_map(|(i, l)| Detection::from_yolo_line(i, l, img_w, img_h))
        .collect()
}

/// External detector seam: one height raster in, boxes out.
pub trait ObjectDetector: Send + Sync {
    fn detect(&self, image: &Path, meta: &HeightMapMeta) -> Result<Vec<Detection>>;
}

/// Reads `<labels_dir>/<image stem>.txt` files produced offline.
#[derive(Debug, Clone)]
pub struct LabelFileDetector {
    labels_dir: PathBuf,
}

impl LabelFileDetector {
    pub fn new(labels_dir: impl Into<PathBuf>) -> Self {
        Self {
            labels_dir: labels_dir.into(),
        }
    }

    pub fn label_path(&self, image: &Path) -> PathBuf {
        let stem = image.file_stem().unwrap_or_default();
        self.labels_dir.join(stem).with_extension("txt")
    }
}

impl ObjectDetector for LabelFileDetector {
    fn detect(&self, image: &Path, meta: &HeightMapMeta) -> Result<Vec<Detection>> {
        let path = self.label_path(image);
        if !path.exists() {
            return Err(SegmentationError::MissingArtifact(path));
        }
        let text = std::fs::read_to_string(&path)?;
        Ok(parse_labels(&text, meta.width, meta.height))
    }
}
