//! Point cloud persistence behind a codec-agnostic interface.
use crate::cloud::PointCloud;
use crate::error::{Result, SegmentationError};
use constants::class::get_class_name;
use las::point::{Classification, Format};
use las::{Builder, Point, Reader, Transform, Vector, Writer};
use log::debug;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// "path → flat point list" and back. Stages only see this trait, so the
/// on-disk format can be swapped without touching the geometry code.
pub trait PointCloudIo: Send + Sync {
    fn read(&self, path: &Path) -> Result<PointCloud>;

    /// Persist `cloud` with one LAS classification code per point.
    fn write_classified(&self, path: &Path, cloud: &PointCloud, classes: &[u8]) -> Result<()>;

    /// Persist `cloud`, tagging every point with the same code.
    fn write(&self, path: &Path, cloud: &PointCloud, classification: u8) -> Result<()> {
        debug!(
            "Writing {} {} points to {}",
            cloud.len(),
            get_class_name(classification),
            path.display()
        );
        self.write_classified(path, cloud, &vec![classification; cloud.len()])
    }

    /// File extension (without dot) used when the pipeline names outputs.
    fn extension(&self) -> &'static str;
}

/// LAS/LAZ codec. Compression follows the file extension.
#[derive(Debug, Clone, Copy)]
pub struct LasIo {
    /// Coordinate quantum stored in the header transforms.
    pub scale: f64,
}

impl Default for LasIo {
    fn default() -> Self {
        Self { scale: 0.001 }
    }
}

impl LasIo {
    /// Create LAS file reader for point cloud access.
    /// Handles both .las and .laz compressed formats.
    fn create_reader(&self, file_path: &Path) -> Result<Reader> {
        let file = File::open(file_path)?;
        let buf_reader = BufReader::new(file);
        Ok(Reader::new(buf_reader)?)
    }

    /// Header whose offsets sit at the cloud minimum so large projected
    /// coordinates stay within the i32 range of LAS records.
    fn header_for(&self, cloud: &PointCloud) -> Result<las::Header> {
        let bounds = cloud.bounds();
        let (ox, oy, oz) = if bounds.is_valid() {
            (bounds.min_x.floor(), bounds.min_y.floor(), bounds.min_z.floor())
        } else {
            (0.0, 0.0, 0.0)
        };

        let mut builder = Builder::from((1, 2));
        builder.point_format = Format::new(0)?;
        builder.transforms = Vector {
            x: Transform {
                scale: self.scale,
                offset: ox,
            },
            y: Transform {
                scale: self.scale,
                offset: oy,
            },
            z: Transform {
                scale: self.scale,
                offset: oz,
            },
        };
        Ok(builder.into_header()?)
    }
}

impl PointCloudIo for LasIo {
    fn read(&self, path: &Path) -> Result<PointCloud> {
        let mut reader = self.create_reader(path)?;
        let total_points = reader.header().number_of_points() as usize;

        let mut cloud = PointCloud::with_capacity(total_points);
        for point_result in reader.points() {
            let point = point_result?;
            cloud.push(point.x, point.y, point.z);
        }
        Ok(cloud)
    }

    fn write_classified(&self, path: &Path, cloud: &PointCloud, classes: &[u8]) -> Result<()> {
        if classes.len() != cloud.len() {
            return Err(SegmentationError::InvalidConfig(format!(
                "{} classification codes for {} points",
                classes.len(),
                cloud.len()
            )));
        }
        let header = self.header_for(cloud)?;
        let mut writer = Writer::from_path(path, header)?;

        for (p, &class) in cloud.points.iter().zip(classes) {
            let point = Point {
                x: p.x,
                y: p.y,
                z: p.z,
                classification: Classification::new(class)?,
                ..Default::default()
            };
            writer.write_point(point)?;
        }
        writer.close()?;
        Ok(())
    }

    fn extension(&self) -> &'static str {
        "las"
    }
}
