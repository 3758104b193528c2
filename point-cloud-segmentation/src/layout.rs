//! On-disk layout of a run directory.
use crate::error::{Result, SegmentationError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

/// Every artifact path the stages read or write, relative to one root.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
    ext: &'static str,
}

impl OutputLayout {
    /// `ext` is the point cloud file extension, without the dot.
    pub fn new(root: impl Into<PathBuf>, ext: &'static str) -> Self {
        Self {
            root: root.into(),
            ext,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tiles_dir(&self) -> PathBuf {
        self.root.join("tiles")
    }

    pub fn tile_name(&self, id: usize) -> String {
        format!("tile_{id:04}.{}", self.ext)
    }

    pub fn tile_cloud(&self, id: usize) -> PathBuf {
        self.tiles_dir().join(self.tile_name(id))
    }

    pub fn neighbors(&self) -> PathBuf {
        self.root.join("neighbors.json")
    }

    pub fn ground_report(&self) -> PathBuf {
        self.root.join("ground_report.json")
    }

    pub fn suspects(&self) -> PathBuf {
        self.root.join("suspects.json")
    }

    pub fn ground_dir(&self) -> PathBuf {
        self.root.join("split").join("ground")
    }

    pub fn nonground_dir(&self) -> PathBuf {
        self.root.join("split").join("nonground")
    }

    pub fn ground_cloud(&self, id: usize) -> PathBuf {
        self.ground_dir().join(format!("tile_{id:04}_ground.{}", self.ext))
    }

    /// Shared by the non-ground cloud, its rasters and its label file.
    pub fn nonground_stem(&self, id: usize) -> String {
        format!("tile_{id:04}_nonground")
    }

    pub fn nonground_cloud(&self, id: usize) -> PathBuf {
        self.nonground_dir()
            .join(format!("{}.{}", self.nonground_stem(id), self.ext))
    }

    pub fn heightmaps_dir(&self) -> PathBuf {
        self.root.join("heightmaps")
    }

    pub fn heightmap_meta(&self, id: usize) -> PathBuf {
        self.heightmaps_dir()
            .join(format!("{}.json", self.nonground_stem(id)))
    }

    pub fn heightmap_image(&self, id: usize) -> PathBuf {
        self.heightmaps_dir()
            .join(format!("{}.png", self.nonground_stem(id)))
    }

    pub fn heightmap_index(&self) -> PathBuf {
        self.heightmaps_dir().join("index.json")
    }

    pub fn labels_dir(&self) -> PathBuf {
        self.root.join("labels")
    }

    pub fn objects_dir(&self) -> PathBuf {
        self.root.join("objects")
    }

    pub fn tile_objects_dir(&self, id: usize) -> PathBuf {
        self.objects_dir().join(format!("tile_{id:04}"))
    }

    pub fn object_name(&self, index: usize) -> String {
        format!("object_{index:02}.{}", self.ext)
    }

    pub fn clean_name(&self) -> String {
        format!("tile_clean.{}", self.ext)
    }

    pub fn clean_cloud(&self, id: usize) -> PathBuf {
        self.tile_objects_dir(id).join(self.clean_name())
    }

    pub fn tile_summary(&self, id: usize) -> PathBuf {
        self.tile_objects_dir(id).join("summary.json")
    }

    pub fn all_summary(&self) -> PathBuf {
        self.objects_dir().join("all_summary.json")
    }

    pub fn manifest(&self) -> PathBuf {
        self.root.join("manifest.json")
    }

    /// Path relative to the run root, with forward slashes.
    pub fn relative(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Tile id from a `tile_NNNN...` file name.
pub fn parse_tile_id(file_name: &str) -> Option<usize> {
    let digits: String = file_name
        .strip_prefix("tile_")?
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, value)?;
    Ok(())
}

/// Read a JSON artifact; a missing file is `MissingArtifact`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Err(SegmentationError::MissingArtifact(path.to_path_buf()));
    }
    Ok(serde_json::from_reader(BufReader::new(File::open(path)?))?)
}
