/// Point scan segmentation command line entry point
use clap::{Args, Parser, Subcommand};
use log::info;
use point_cloud_segmentation::SegmentationPipeline;
use point_cloud_segmentation::config::{CapMode, PipelineConfig};
use point_cloud_segmentation::detection::LabelFileDetector;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "point-cloud-segmentation",
    version,
    about = "Tile, ground-split and segment point scans"
)]
struct Cli {
    /// JSON file with stage configuration overrides
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Args)]
struct RunDir {
    /// Run directory holding every stage's artifacts
    #[arg(short, long, default_value = "out")]
    outdir: PathBuf,
}

#[derive(Args)]
struct Overrides {
    #[arg(long)]
    target_points: Option<usize>,
    #[arg(long)]
    keep_ratio: Option<f64>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    split_dist: Option<f64>,
    /// Raster resolution in world units per pixel
    #[arg(long)]
    res: Option<f64>,
    #[arg(long)]
    max_height: Option<f64>,
    /// clamp or drop
    #[arg(long)]
    cap_mode: Option<CapMode>,
    #[arg(long)]
    bits: Option<u8>,
    #[arg(long)]
    bg_value: Option<u16>,
    #[arg(long)]
    object_height: Option<f64>,
}

impl Overrides {
    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(v) = self.target_points {
            config.tiler.target_points_per_tile = v;
        }
        if let Some(v) = self.keep_ratio {
            config.tiler.keep_ratio = v;
        }
        if let Some(v) = self.seed {
            config.tiler.seed = v;
            config.ground.seed = v;
            config.box_edit.seed = v;
        }
        if let Some(v) = self.split_dist {
            config.ground.split_dist = v;
        }
        if let Some(v) = self.res {
            config.heightmap.resolution = v;
        }
        if let Some(v) = self.max_height {
            config.heightmap.max_height = v;
        }
        if let Some(v) = self.cap_mode {
            config.heightmap.cap_mode = v;
        }
        if let Some(v) = self.bits {
            config.heightmap.bits = v;
        }
        if let Some(v) = self.bg_value {
            config.heightmap.bg_value = v;
        }
        if let Some(v) = self.object_height {
            config.detection.object_height = Some(v);
        }
    }
}

#[derive(Subcommand)]
enum Cmd {
    /// Partition a cloud into tiles and build the neighbor graph
    Tile {
        input: PathBuf,
        #[command(flatten)]
        run: RunDir,
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Fit, repair and split ground planes for every tile
    Ground {
        #[command(flatten)]
        run: RunDir,
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Render non-ground height rasters
    Heightmaps {
        #[command(flatten)]
        run: RunDir,
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Lift label-file detections into 3D objects
    Apply {
        /// Directory of `<heightmap stem>.txt` label files (default: <outdir>/labels)
        #[arg(long)]
        labels: Option<PathBuf>,
        #[command(flatten)]
        run: RunDir,
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Write manifest.json from existing stage outputs
    Manifest {
        #[command(flatten)]
        run: RunDir,
    },
    /// Every stage, end to end
    Run {
        input: PathBuf,
        #[arg(long)]
        labels: Option<PathBuf>,
        #[command(flatten)]
        run: RunDir,
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Remove (and optionally infill) oriented boxes from a cloud
    Edit {
        input: PathBuf,
        /// JSON with a `bounding_box` list in the capture frame
        boxes: PathBuf,
        output: PathBuf,
        #[arg(long)]
        density: Option<f64>,
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn load_config(
    path: Option<&PathBuf>,
    end_to_end: bool,
) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
    Ok(match path {
        Some(p) => PipelineConfig::from_json_file(p)?,
        None if end_to_end => PipelineConfig::end_to_end(),
        None => PipelineConfig::default(),
    })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let end_to_end = matches!(cli.cmd, Cmd::Run { .. });
    let mut config = load_config(cli.config.as_ref(), end_to_end)?;

    match cli.cmd {
        Cmd::Tile { input, run, overrides } => {
            overrides.apply(&mut config);
            SegmentationPipeline::new(config, run.outdir)?.tile(&input)?;
        }
        Cmd::Ground { run, overrides } => {
            overrides.apply(&mut config);
            SegmentationPipeline::new(config, run.outdir)?.estimate_ground()?;
        }
        Cmd::Heightmaps { run, overrides } => {
            overrides.apply(&mut config);
            SegmentationPipeline::new(config, run.outdir)?.render_heightmaps()?;
        }
        Cmd::Apply { labels, run, overrides } => {
            overrides.apply(&mut config);
            let pipeline = SegmentationPipeline::new(config, run.outdir)?;
            let labels = labels.unwrap_or_else(|| pipeline.layout().labels_dir());
            pipeline.apply_detections(&LabelFileDetector::new(labels))?;
        }
        Cmd::Manifest { run } => {
            SegmentationPipeline::new(config, run.outdir)?.build_manifest()?;
        }
        Cmd::Run { input, labels, run, overrides } => {
            overrides.apply(&mut config);
            let pipeline = SegmentationPipeline::new(config, run.outdir)?;
            let labels = labels.unwrap_or_else(|| pipeline.layout().labels_dir());
            let manifest = pipeline.run_all(&input, &LabelFileDetector::new(labels))?;
            info!("Run complete: {} tiles in manifest", manifest.tiles.len());
        }
        Cmd::Edit { input, boxes, output, density, seed } => {
            if let Some(v) = density {
                config.box_edit.infill_density = v;
            }
            if let Some(v) = seed {
                config.box_edit.seed = v;
            }
            let parent = output.parent().map(PathBuf::from).unwrap_or_default();
            let pipeline = SegmentationPipeline::new(config, parent)?;
            let outcome = pipeline.edit(&input, &boxes, &output)?;
            let removed: usize = outcome.per_box.iter().map(|s| s.removed).sum();
            let filled: usize = outcome.per_box.iter().map(|s| s.filled).sum();
            info!("Removed {} points, filled {}", removed, filled);
        }
    }

    Ok(())
}
