//! Height raster of a tile's non-ground points above its ground plane.
use crate::bounds::PointCloudBounds;
use crate::cloud::PointCloud;
use crate::config::{CapMode, HeightmapConfig};
use crate::constants::RASTER_EPS;
use crate::dds_writer::write_r32f_heightmap;
use crate::error::Result;
use crate::ground::Plane;
use crate::layout::write_json;
use image::{ImageBuffer, Luma};
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Quantized and raw rasters of one tile. Row `r` covers world
/// `y ∈ [origin.y + r·res, origin.y + (r+1)·res)`, column `c` likewise in x.
#[derive(Debug, Clone)]
pub struct HeightMap {
    pub tile_id: usize,
    pub width: usize,
    pub height: usize,
    pub resolution: f64,
    pub origin: [f64; 2],
    pub bits: u8,
    pub cap_mode: CapMode,
    pub max_height: f64,
    pub plane: Plane,
    /// Row-major quantized pixels in `[0, maxval]`.
    pub pixels: Vec<u16>,
    /// Row-major cell maxima in world units.
    pub heights: Vec<f32>,
}

impl HeightMap {
    pub fn pixel(&self, col: usize, row: usize) -> u16 {
        self.pixels[row * self.width + col]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaneMeta {
    pub n: [f64; 3],
    #[serde(rename = "D")]
    pub d: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleMeta {
    pub min_height: f64,
    pub max_height: f64,
    pub maxval: u16,
}

/// Per-tile JSON written next to the PNG and read back by the detection stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeightMapMeta {
    pub tile_id: usize,
    pub png: String,
    pub dds: String,
    pub width: usize,
    pub height: usize,
    pub resolution: f64,
    /// World XY of the raster's lower corner.
    pub origin_xy: [f64; 2],
    pub plane: PlaneMeta,
    pub max_height: f64,
    pub cap_mode: CapMode,
    pub bits: u8,
    pub scale: ScaleMeta,
}

impl HeightMapMeta {
    pub fn plane(&self) -> Option<Plane> {
        Plane::new(self.plane.n.into(), self.plane.d)
    }
}

/// `heightmaps/index.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeightMapIndex {
    pub items: Vec<HeightMapMeta>,
}

pub struct HeightProjector {
    config: HeightmapConfig,
}

impl HeightProjector {
    pub fn new(config: HeightmapConfig) -> Self {
        Self { config }
    }

    /// Rasterize `non_ground` as max height above `plane`.
    ///
    /// A vertical plane is `GeometricDegeneracy`. No surviving points gives
    /// a 1x1 zero raster at origin (0, 0).
    pub fn project(
        &self,
        tile_id: usize,
        non_ground: &PointCloud,
        plane: &Plane,
    ) -> Result<HeightMap> {
        let cfg = &self.config;
        let mut samples: Vec<(f64, f64, f64)> = Vec::with_capacity(non_ground.len());
        for p in &non_ground.points {
            let h = (p.z - plane.z_at(p.x, p.y)?).max(0.0);
            match cfg.cap_mode {
                CapMode::Drop if h > cfg.max_height => continue,
                CapMode::Drop => samples.push((p.x, p.y, h)),
                CapMode::Clamp => samples.push((p.x, p.y, h.min(cfg.max_height))),
            }
        }
        // vertical planes must fail even for an empty tile
        plane.z_at(0.0, 0.0)?;

        if samples.is_empty() {
            debug!("Tile {:04}: no points to rasterize", tile_id);
            return Ok(self.blank(tile_id, plane));
        }

        let mut extent = PointCloudBounds::new();
        for &(x, y, h) in &samples {
            extent.update(x, y, h);
        }
        let min_x = extent.min_x - RASTER_EPS;
        let min_y = extent.min_y - RASTER_EPS;

        let res = cfg.resolution;
        let width = (((extent.max_x - min_x) / res).ceil() as usize).max(1);
        let height = (((extent.max_y - min_y) / res).ceil() as usize).max(1);

        let mut heights = vec![0.0f64; width * height];
        for &(x, y, h) in &samples {
            let col = cell_index(x, min_x, res, width);
            let row = cell_index(y, min_y, res, height);
            let cell = &mut heights[row * width + col];
            if h > *cell {
                *cell = h;
            }
        }

        let maxval = cfg.max_value();
        let pixels = heights
            .iter()
            .map(|&h| {
                if h == 0.0 {
                    cfg.bg_value
                } else {
                    quantize(h, cfg.max_height, maxval)
                }
            })
            .collect();

        Ok(HeightMap {
            tile_id,
            width,
            height,
            resolution: res,
            origin: [min_x, min_y],
            bits: cfg.bits,
            cap_mode: cfg.cap_mode,
            max_height: cfg.max_height,
            plane: *plane,
            pixels,
            heights: heights.into_iter().map(|h| h as f32).collect(),
        })
    }

    fn blank(&self, tile_id: usize, plane: &Plane) -> HeightMap {
        HeightMap {
            tile_id,
            width: 1,
            height: 1,
            resolution: self.config.resolution,
            origin: [0.0, 0.0],
            bits: self.config.bits,
            cap_mode: self.config.cap_mode,
            max_height: self.config.max_height,
            plane: *plane,
            pixels: vec![0],
            heights: vec![0.0],
        }
    }

    /// Write `<stem>.png`, `<stem>.dds` and `<stem>.json` into `dir`.
    pub fn save(&self, map: &HeightMap, dir: &Path, stem: &str) -> Result<HeightMapMeta> {
        let png = format!("{stem}.png");
        let dds = format!("{stem}.dds");
        let (w, h) = (map.width as u32, map.height as u32);

        if map.bits == 16 {
            let img: ImageBuffer<Luma<u16>, Vec<u16>> =
                ImageBuffer::from_fn(w, h, |x, y| Luma([map.pixel(x as usize, y as usize)]));
            img.save(dir.join(&png))?;
        } else {
            let img: ImageBuffer<Luma<u8>, Vec<u8>> = ImageBuffer::from_fn(w, h, |x, y| {
                Luma([map.pixel(x as usize, y as usize).min(u8::MAX as u16) as u8])
            });
            img.save(dir.join(&png))?;
        }
        write_r32f_heightmap(&dir.join(&dds), map.width, map.height, &map.heights)?;

        let meta = HeightMapMeta {
            tile_id: map.tile_id,
            png,
            dds,
            width: map.width,
            height: map.height,
            resolution: map.resolution,
            origin_xy: map.origin,
            plane: PlaneMeta {
                n: map.plane.normal.into(),
                d: map.plane.offset,
            },
            max_height: map.max_height,
            cap_mode: map.cap_mode,
            bits: map.bits,
            scale: ScaleMeta {
                min_height: 0.0,
                max_height: map.max_height,
                maxval: self.config.max_value(),
            },
        };
        write_json(&dir.join(format!("{stem}.json")), &meta)?;
        Ok(meta)
    }
}

fn cell_index(v: f64, min: f64, res: f64, len: usize) -> usize {
    let i = ((v - min) / res).floor();
    if i <= 0.0 { 0 } else { (i as usize).min(len - 1) }
}

/// `round(h / max_height * maxval)` clipped to `[0, maxval]`.
fn quantize(h: f64, max_height: f64, maxval: u16) -> u16 {
    (h / max_height * maxval as f64).round().clamp(0.0, maxval as f64) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SegmentationError;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    impl HeightMap {
        fn height_at(&self, col: usize, row: usize) -> f32 {
            self.heights[row * self.width + col]
        }
    }

    fn ground() -> Plane {
        Plane::new(Vector3::z(), 0.0).unwrap()
    }

    fn projector(max_height: f64, cap_mode: CapMode) -> HeightProjector {
        HeightProjector::new(HeightmapConfig {
            resolution: 1.0,
            max_height,
            cap_mode,
            ..HeightmapConfig::default()
        })
    }

    #[test]
    fn cell_keeps_maximum_height() {
        let cloud = PointCloud::from(vec![
            nalgebra::Point3::new(0.2, 0.2, 1.0),
            nalgebra::Point3::new(0.4, 0.3, 2.0),
        ]);
        let map = projector(2.0, CapMode::Clamp).project(0, &cloud, &ground()).unwrap();
        assert_eq!((map.width, map.height), (1, 1));
        assert_eq!(map.pixel(0, 0), 255);
        assert_relative_eq!(map.height_at(0, 0), 2.0);
    }

    #[test]
    fn drop_excludes_point_from_raster_and_extent() {
        let cloud = PointCloud::from(vec![
            nalgebra::Point3::new(0.5, 0.5, 1.0),
            nalgebra::Point3::new(10.5, 0.5, 5.0),
        ]);
        let map = projector(3.0, CapMode::Drop).project(0, &cloud, &ground()).unwrap();
        assert_eq!((map.width, map.height), (1, 1));
        assert_eq!(map.pixel(0, 0), 85);

        let map = projector(3.0, CapMode::Clamp).project(0, &cloud, &ground()).unwrap();
        assert_eq!(map.width, 11);
        assert_relative_eq!(map.height_at(10, 0), 3.0);
        assert_eq!(map.pixel(10, 0), 255);
    }

    #[test]
    fn rows_follow_world_y() {
        let cloud = PointCloud::from(vec![
            nalgebra::Point3::new(0.5, 0.5, 1.0),
            nalgebra::Point3::new(0.5, 2.5, 2.0),
        ]);
        let map = projector(4.0, CapMode::Clamp).project(0, &cloud, &ground()).unwrap();
        // range 2 plus the epsilon pad needs three rows
        assert_eq!((map.width, map.height), (1, 3));
        assert_relative_eq!(map.origin[1], 0.5 - RASTER_EPS);
        assert_relative_eq!(map.height_at(0, 0), 1.0);
        assert_relative_eq!(map.height_at(0, 1), 0.0);
        assert_relative_eq!(map.height_at(0, 2), 2.0);
    }

    #[test]
    fn empty_and_fully_dropped_give_blank_raster() {
        let map = projector(3.0, CapMode::Drop)
            .project(3, &PointCloud::default(), &ground())
            .unwrap();
        assert_eq!((map.width, map.height, map.origin), (1, 1, [0.0, 0.0]));
        assert_eq!(map.pixels, vec![0]);

        let high = PointCloud::from(vec![nalgebra::Point3::new(4.0, 4.0, 9.0)]);
        let map = projector(3.0, CapMode::Drop).project(3, &high, &ground()).unwrap();
        assert_eq!((map.width, map.height), (1, 1));
        assert_eq!(map.origin, [0.0, 0.0]);
    }

    #[test]
    fn background_fills_zero_cells() {
        let projector = HeightProjector::new(HeightmapConfig {
            resolution: 1.0,
            bg_value: 7,
            ..HeightmapConfig::default()
        });
        let cloud = PointCloud::from(vec![
            nalgebra::Point3::new(0.5, 0.5, 1.0),
            nalgebra::Point3::new(2.5, 0.5, 1.0),
        ]);
        let map = projector.project(0, &cloud, &ground()).unwrap();
        assert_eq!(map.width, 3);
        assert_eq!(map.pixel(1, 0), 7);
        assert_eq!(map.pixel(0, 0), 51);
    }

    #[test]
    fn vertical_plane_is_rejected() {
        let wall = Plane::new(Vector3::x(), 0.0).unwrap();
        let cloud = PointCloud::from(vec![nalgebra::Point3::new(0.0, 0.0, 1.0)]);
        let err = projector(3.0, CapMode::Clamp).project(0, &cloud, &wall).unwrap_err();
        assert!(matches!(err, SegmentationError::GeometricDegeneracy { .. }));
    }

    #[test]
    fn save_writes_png_dds_and_metadata() {
        let dir = std::env::temp_dir().join(format!("pcs-heightmap-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let cloud = PointCloud::from(vec![
            nalgebra::Point3::new(0.5, 0.5, 1.0),
            nalgebra::Point3::new(1.5, 1.5, 2.0),
        ]);
        let projector = HeightProjector::new(HeightmapConfig {
            resolution: 1.0,
            bits: 16,
            ..HeightmapConfig::default()
        });
        let map = projector.project(2, &cloud, &ground()).unwrap();
        let meta = projector.save(&map, &dir, "tile_0002_nonground").unwrap();
        assert_eq!(meta.scale.maxval, 65535);

        let back: HeightMapMeta =
            crate::layout::read_json(&dir.join("tile_0002_nonground.json")).unwrap();
        assert_eq!((back.width, back.height), (2, 2));
        assert_eq!(back.cap_mode, CapMode::Clamp);
        let img = image::open(dir.join(&back.png)).unwrap().into_luma16();
        assert_eq!(img.get_pixel(1, 1).0[0], map.pixel(1, 1));
        assert!(dir.join(&back.dds).exists());
        std::fs::remove_dir_all(&dir).ok();
    }
}
