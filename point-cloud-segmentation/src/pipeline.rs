//! Stage orchestration over a run directory. Every stage reads its inputs
//! from the artifacts of the previous one so it can be rerun alone.
use crate::box_editor::{BoxEditor, BoxFile, EditOutcome};
use crate::cloud::PointCloud;
use crate::cloud_io::{LasIo, PointCloudIo};
use crate::config::PipelineConfig;
use crate::constants::{PROGRESS_CHARS, PROGRESS_TEMPLATE};
use crate::detection::{DetectionMapper, ObjectDetector, TileDetectionSummary};
use crate::error::{Result, SegmentationError};
use crate::ground::{
    GroundEstimator, GroundModel, GroundReport, SuspectRecord, TilePlane, build_report,
};
use crate::heightmap::{HeightMapIndex, HeightMapMeta, HeightProjector};
use crate::layout::{OutputLayout, read_json, write_json};
use crate::manifest::{ManifestGenerator, RunManifest};
use crate::tiler::{NeighborEdge, NeighborGraphArtifact, Tile, TileGraph, Tiler, to_artifact};
use constants::class::{DETECTED_OBJECT, GROUND, UNCLASSIFIED};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

pub struct SegmentationPipeline {
    config: PipelineConfig,
    layout: OutputLayout,
    io: Box<dyn PointCloudIo>,
}

impl SegmentationPipeline {
    /// Pipeline writing LAS clouds under `output_dir`.
    pub fn new(config: PipelineConfig, output_dir: impl Into<PathBuf>) -> Result<Self> {
        Self::with_io(config, output_dir, Box::new(LasIo::default()))
    }

    pub fn with_io(
        config: PipelineConfig,
        output_dir: impl Into<PathBuf>,
        io: Box<dyn PointCloudIo>,
    ) -> Result<Self> {
        config.validate()?;
        let layout = OutputLayout::new(output_dir, io.extension());
        fs::create_dir_all(layout.root())?;
        Ok(Self { config, layout, io })
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Tile cloud path as recorded in the run's JSON artifacts.
    fn tile_file(&self, id: usize) -> String {
        self.layout.relative(&self.layout.tile_cloud(id))
    }

    /// Tile the input cloud; writes per-tile clouds and `neighbors.json`.
    pub fn tile(&self, input: &Path) -> Result<TileGraph> {
        info!("Tiling {}", input.display());
        let cloud = self.io.read(input)?;
        let (dx, dy, dz) = cloud.bounds().dimensions();
        info!("Loaded {} points, extent {:.2} x {:.2} x {:.2}", cloud.len(), dx, dy, dz);

        let graph = Tiler::new(self.config.tiler.clone()).tile(&cloud)?;
        fs::create_dir_all(self.layout.tiles_dir())?;

        let pb = progress_bar(graph.len(), "tiles written");
        graph.tiles.par_iter().try_for_each(|tile| {
            self.io
                .write(&self.layout.tile_cloud(tile.id), &tile.cloud, UNCLASSIFIED)?;
            pb.inc(1);
            Ok::<(), SegmentationError>(())
        })?;
        pb.finish_with_message("tiles written");

        let artifact = to_artifact(&graph, |id| self.tile_file(id));
        write_json(&self.layout.neighbors(), &artifact)?;
        info!(
            "Wrote {} tiles ({} points) and {}",
            graph.len(),
            graph.total_points(),
            self.layout.neighbors().display()
        );
        Ok(graph)
    }

    /// Rebuild the tile graph from `neighbors.json` and the tile clouds.
    /// An unreadable tile cloud leaves that tile empty, so its fit is skipped.
    pub fn load_tiles(&self) -> Result<TileGraph> {
        let artifact: NeighborGraphArtifact = read_json(&self.layout.neighbors())?;
        let mut tiles = Vec::with_capacity(artifact.len());
        let mut files = Vec::with_capacity(artifact.len());
        for (position, (id, record)) in artifact.into_iter().enumerate() {
            if id != position {
                return Err(SegmentationError::MissingArtifact(self.layout.tile_cloud(position)));
            }
            files.push(self.layout.root().join(&record.cloud_file));
            tiles.push(Tile {
                id,
                center: record.center,
                cloud: PointCloud::default(),
                neighbors: record
                    .neighbors
                    .iter()
                    .map(|n| NeighborEdge {
                        id: n.id,
                        dist: n.dist,
                    })
                    .collect(),
            });
        }

        let pb = progress_bar(tiles.len(), "tiles loaded");
        tiles.par_iter_mut().zip(&files).for_each(|(tile, path)| {
            match self.io.read(path) {
                Ok(cloud) => tile.cloud = cloud,
                Err(e) => warn!("Tile {:04}: cannot read {} ({})", tile.id, path.display(), e),
            }
            pb.inc(1);
        });
        pb.finish_with_message("tiles loaded");
        Ok(TileGraph { tiles })
    }

    /// Fit, repair and split. Writes the plane report, the suspect list and
    /// the ground/non-ground clouds of every tile with a good plane.
    pub fn estimate_ground(&self) -> Result<GroundModel> {
        let graph = self.load_tiles()?;
        let estimator = GroundEstimator::new(self.config.ground.clone());
        let model = estimator.estimate(&graph);

        let report = build_report(&graph, &model, |id| self.tile_file(id));
        write_json(&self.layout.ground_report(), &report)?;
        write_json(&self.layout.suspects(), &model.suspects)?;

        fs::create_dir_all(self.layout.ground_dir())?;
        fs::create_dir_all(self.layout.nonground_dir())?;

        let pb = progress_bar(graph.len(), "tiles split");
        let written: usize = graph
            .tiles
            .par_iter()
            .map(|tile| {
                let done = match model.good_plane(tile.id) {
                    Some(plane) => {
                        let split = estimator.split(tile, plane);
                        debug!(
                            "Tile {:04}: ground={} nonground={}",
                            tile.id,
                            split.ground.len(),
                            split.non_ground.len()
                        );
                        let result = self
                            .io
                            .write(&self.layout.ground_cloud(tile.id), &split.ground, GROUND)
                            .and_then(|_| {
                                self.io.write(
                                    &self.layout.nonground_cloud(tile.id),
                                    &split.non_ground,
                                    UNCLASSIFIED,
                                )
                            });
                        skip_on_error(tile.id, "split", result).is_some()
                    }
                    None => false,
                };
                pb.inc(1);
                usize::from(done)
            })
            .sum();
        pb.finish_with_message("tiles split");

        info!(
            "Split {} of {} tiles; {} suspects repaired",
            written,
            graph.len(),
            model.suspects.len()
        );
        Ok(model)
    }

    /// Good planes from `ground_report.json`, ascending by tile id.
    fn good_planes(&self) -> Result<Vec<(usize, TilePlane)>> {
        let report: GroundReport = read_json(&self.layout.ground_report())?;
        Ok(report
            .iter()
            .filter_map(|(&id, entry)| Some((id, entry.tile_plane()?)))
            .filter(|(_, p)| p.good)
            .collect())
    }

    pub fn suspects(&self) -> Result<Vec<SuspectRecord>> {
        read_json(&self.layout.suspects())
    }

    /// Rasterize every split tile; writes PNG/DDS/JSON per tile and the index.
    pub fn render_heightmaps(&self) -> Result<HeightMapIndex> {
        let planes = self.good_planes()?;
        let projector = HeightProjector::new(self.config.heightmap.clone());
        let dir = self.layout.heightmaps_dir();
        fs::create_dir_all(&dir)?;

        let pb = progress_bar(planes.len(), "heightmaps");
        let mut items: Vec<HeightMapMeta> = planes
            .par_iter()
            .filter_map(|(id, plane)| {
                let result = self
                    .io
                    .read(&self.layout.nonground_cloud(*id))
                    .and_then(|cloud| projector.project(*id, &cloud, &plane.plane))
                    .and_then(|map| projector.save(&map, &dir, &self.layout.nonground_stem(*id)));
                pb.inc(1);
                skip_on_error(*id, "heightmap", result)
            })
            .collect();
        pb.finish_with_message("heightmaps");
        items.sort_by_key(|m| m.tile_id);

        let index = HeightMapIndex { items };
        write_json(&self.layout.heightmap_index(), &index)?;
        info!("Wrote {} heightmaps to {}", index.items.len(), dir.display());
        Ok(index)
    }

    /// Lift detections into objects for every tile with a heightmap.
    pub fn apply_detections(
        &self,
        detector: &dyn ObjectDetector,
    ) -> Result<Vec<TileDetectionSummary>> {
        let planes = self.good_planes()?;
        let mapper = DetectionMapper::new(self.config.detection.clone());

        let pb = progress_bar(planes.len(), "detections applied");
        let mut summaries: Vec<TileDetectionSummary> = planes
            .par_iter()
            .filter_map(|(id, _)| {
                let result = self.apply_tile(*id, &mapper, detector);
                pb.inc(1);
                skip_on_error(*id, "detections", result)
            })
            .collect();
        pb.finish_with_message("detections applied");
        summaries.sort_by_key(|s| s.tile_id);

        write_json(&self.layout.all_summary(), &summaries)?;
        let objects: usize = summaries.iter().map(|s| s.objects.len()).sum();
        info!("Mapped {} objects over {} tiles", objects, summaries.len());
        Ok(summaries)
    }

    fn apply_tile(
        &self,
        id: usize,
        mapper: &DetectionMapper,
        detector: &dyn ObjectDetector,
    ) -> Result<TileDetectionSummary> {
        let meta: HeightMapMeta = read_json(&self.layout.heightmap_meta(id))?;
        let detections = detector.detect(&self.layout.heightmap_image(id), &meta)?;
        let cloud = self.io.read(&self.layout.nonground_cloud(id))?;
        let mapped = mapper.map_tile(id, &cloud, &meta, &detections)?;

        let dir = self.layout.tile_objects_dir(id);
        fs::create_dir_all(&dir)?;
        for object in &mapped.objects {
            self.io.write(
                &dir.join(self.layout.object_name(object.id)),
                &object.cloud,
                DETECTED_OBJECT,
            )?;
        }
        self.io
            .write(&self.layout.clean_cloud(id), &mapped.residual, UNCLASSIFIED)?;

        let summary = mapped.summary(&self.layout.clean_name(), |i| self.layout.object_name(i));
        write_json(&self.layout.tile_summary(id), &summary)?;
        if summary.no_detections {
            debug!("Tile {:04}: no detections, passed through", id);
        } else {
            debug!(
                "Tile {:04}: {} detections, {} objects, removed {} points",
                id,
                detections.len(),
                summary.objects.len(),
                summary.removed_points
            );
        }
        Ok(summary)
    }

    pub fn build_manifest(&self) -> Result<RunManifest> {
        ManifestGenerator::new(&self.layout).generate()
    }

    /// Every stage in order.
    pub fn run_all(&self, input: &Path, detector: &dyn ObjectDetector) -> Result<RunManifest> {
        self.tile(input)?;
        self.estimate_ground()?;
        self.render_heightmaps()?;
        self.apply_detections(detector)?;
        self.build_manifest()
    }

    /// Box removal/infill on an arbitrary cloud, independent of the run
    /// directory.
    pub fn edit(&self, input: &Path, boxes: &Path, output: &Path) -> Result<EditOutcome> {
        let cloud = self.io.read(input)?;
        let file = BoxFile::read(boxes)?;
        info!("Loaded {} points and {} boxes", cloud.len(), file.bounding_box.len());

        let outcome = BoxEditor::new(self.config.box_edit.clone()).edit(&cloud, &file.bounding_box);
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }
        self.io
            .write_classified(output, &outcome.cloud, &outcome.classes())?;
        info!("Final points: {} -> {}", outcome.cloud.len(), output.display());
        Ok(outcome)
    }
}

fn progress_bar(len: usize, message: &'static str) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(PROGRESS_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars(PROGRESS_CHARS),
    );
    pb.set_message(message);
    pb
}

/// Per-tile failures never abort a batch.
fn skip_on_error<T>(tile_id: usize, stage: &str, result: Result<T>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) if e.is_tile_skip() => {
            info!("Tile {:04}: skipped in {} ({})", tile_id, stage, e);
            None
        }
        Err(e) => {
            warn!("Tile {:04}: {} failed ({})", tile_id, stage, e);
            None
        }
    }
}
