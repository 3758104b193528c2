/// Run manifest: per-tile index of the final clouds for a downstream viewer.
use crate::detection::{ObjectSummary, TileDetectionSummary};
use crate::error::Result;
use crate::layout::{OutputLayout, parse_tile_id, read_json, write_json};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub center: [f64; 3],
    pub size: [f64; 3],
    pub yaw: f64,
}

/// One reconstructed object cloud.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicObject {
    pub id: usize,
    pub cloud_file: String,
    pub confidence: f64,
    pub points: usize,
    pub bounding_box: BoundingBox,
}

impl DynamicObject {
    fn new(object: &ObjectSummary, cloud_file: String) -> Self {
        Self {
            id: object.id,
            cloud_file,
            confidence: object.confidence,
            points: object.points,
            bounding_box: BoundingBox {
                center: object.center,
                size: object.size,
                yaw: object.yaw,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileEntry {
    pub tile_id: usize,
    pub ground: String,
    /// Detection residual when detections were applied, else the
    /// non-ground cloud.
    #[serde(rename = "static")]
    pub static_cloud: String,
    pub dynamic: Vec<DynamicObject>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub tiles: Vec<TileEntry>,
}

/// Collects `manifest.json` from whatever stage outputs exist.
pub struct ManifestGenerator<'a> {
    layout: &'a OutputLayout,
}

impl<'a> ManifestGenerator<'a> {
    pub fn new(layout: &'a OutputLayout) -> Self {
        Self { layout }
    }

    /// One entry per tile that has a ground cloud, ascending by tile id.
    pub fn collect(&self) -> Result<RunManifest> {
        let layout = self.layout;
        let summaries: HashMap<usize, TileDetectionSummary> = if layout.all_summary().exists() {
            read_json::<Vec<TileDetectionSummary>>(&layout.all_summary())?
                .into_iter()
                .map(|s| (s.tile_id, s))
                .collect()
        } else {
            HashMap::new()
        };

        let mut ids: Vec<usize> = Vec::new();
        if layout.ground_dir().is_dir() {
            for entry in fs::read_dir(layout.ground_dir())? {
                let name = entry?.file_name().to_string_lossy().to_string();
                if let Some(id) = parse_tile_id(&name) {
                    if layout.ground_cloud(id).exists() {
                        ids.push(id);
                    }
                }
            }
        }
        ids.sort_unstable();
        ids.dedup();

        let tiles = ids
            .into_iter()
            .map(|id| {
                let clean = layout.clean_cloud(id);
                let static_path = if clean.exists() {
                    clean
                } else {
                    layout.nonground_cloud(id)
                };
                let dynamic = summaries
                    .get(&id)
                    .map(|s| {
                        s.objects
                            .iter()
                            .map(|o| {
                                let file = layout.tile_objects_dir(id).join(&o.cloud_file);
                                DynamicObject::new(o, layout.relative(&file))
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                TileEntry {
                    tile_id: id,
                    ground: layout.relative(&layout.ground_cloud(id)),
                    static_cloud: layout.relative(&static_path),
                    dynamic,
                }
            })
            .collect();
        Ok(RunManifest { tiles })
    }

    pub fn generate(&self) -> Result<RunManifest> {
        let manifest = self.collect()?;
        write_json(&self.layout.manifest(), &manifest)?;

        let objects: usize = manifest.tiles.iter().map(|t| t.dynamic.len()).sum();
        info!(
            "Generated manifest: {} tiles, {} objects -> {}",
            manifest.tiles.len(),
            objects,
            self.layout.manifest().display()
        );
        Ok(manifest)
    }
}
