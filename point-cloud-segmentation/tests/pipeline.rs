use point_cloud_segmentation::box_editor::{BoxFile, EditBox};
use point_cloud_segmentation::cloud_io::{LasIo, PointCloudIo};
use point_cloud_segmentation::config::PipelineConfig;
use point_cloud_segmentation::detection::LabelFileDetector;
use point_cloud_segmentation::ground::GroundReport;
use point_cloud_segmentation::layout::{read_json, write_json};
use point_cloud_segmentation::tiler::NeighborGraphArtifact;
use point_cloud_segmentation::{PointCloud, SegmentationPipeline};
use std::fs;
use std::path::PathBuf;

const CAR_POINTS: usize = 16 * 8 * 5;

/// 30 x 15 ground patch with slight noise and two box-shaped cars.
fn scene() -> PointCloud {
    let mut cloud = PointCloud::default();
    for i in 0..120 {
        for j in 0..60 {
            let noise = 0.01 * ((i * 7 + j * 3) % 5) as f64 - 0.02;
            cloud.push(i as f64 * 0.25, j as f64 * 0.25, noise);
        }
    }
    for (x0, y0) in [(5.0, 5.0), (20.0, 9.0)] {
        for i in 0..16 {
            for j in 0..8 {
                for k in 0..5 {
                    cloud.push(x0 + i as f64 * 0.25, y0 + j as f64 * 0.25, 0.5 + k as f64 * 0.25);
                }
            }
        }
    }
    cloud
}

fn workdir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("pcs-it-{}-{}", name, std::process::id()));
    fs::remove_dir_all(&dir).ok();
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn config() -> PipelineConfig {
    let mut config = PipelineConfig::end_to_end();
    config.tiler.target_points_per_tile = 2500;
    config.tiler.keep_ratio = 1.0;
    config
}

#[test]
fn stages_chain_through_artifacts() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = workdir("chain");
    let input = dir.join("scan.las");
    let cloud = scene();
    LasIo::default().write(&input, &cloud, 1).unwrap();

    let pipeline = SegmentationPipeline::new(config(), dir.join("run")).unwrap();
    let layout = pipeline.layout().clone();

    let graph = pipeline.tile(&input).unwrap();
    assert_eq!(graph.len(), 3);
    assert_eq!(graph.total_points(), cloud.len());
    let neighbors: NeighborGraphArtifact = read_json(&layout.neighbors()).unwrap();
    assert_eq!(neighbors.len(), 3);
    assert!(neighbors.values().all(|r| r.neighbors.len() == 2));

    let model = pipeline.estimate_ground().unwrap();
    assert!(model.suspects.is_empty());
    let report: GroundReport = read_json(&layout.ground_report()).unwrap();
    assert_eq!(report.len(), 3);
    assert!(report.values().all(|e| e.good && e.nz > 0.99));

    let mut nonground = 0;
    for id in 0..3 {
        let ground = LasIo::default().read(&layout.ground_cloud(id)).unwrap();
        let rest = LasIo::default().read(&layout.nonground_cloud(id)).unwrap();
        assert_eq!(ground.len() + rest.len(), graph.tiles[id].cloud.len());
        nonground += rest.len();
    }
    assert_eq!(nonground, 2 * CAR_POINTS);

    let index = pipeline.render_heightmaps().unwrap();
    assert_eq!(index.items.len(), 3);
    assert!(layout.heightmap_index().exists());

    // one detection spanning each whole raster
    fs::create_dir_all(layout.labels_dir()).unwrap();
    for id in 0..3 {
        let label = layout.labels_dir().join(format!("{}.txt", layout.nonground_stem(id)));
        fs::write(label, "0 0.5 0.5 1.0 1.0 0.9\n").unwrap();
    }
    let summaries = pipeline
        .apply_detections(&LabelFileDetector::new(layout.labels_dir()))
        .unwrap();
    let removed: usize = summaries.iter().map(|s| s.removed_points).sum();
    assert_eq!(removed, 2 * CAR_POINTS);
    assert!(layout.all_summary().exists());

    let manifest = pipeline.build_manifest().unwrap();
    assert_eq!(manifest.tiles.len(), 3);
    let objects: usize = manifest.tiles.iter().map(|t| t.dynamic.len()).sum();
    assert!(objects >= 2);
    assert!(manifest.tiles.iter().all(|t| t.static_cloud.ends_with("tile_clean.las")));

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn missing_labels_skip_tiles_without_failing() {
    let dir = workdir("nolabels");
    let input = dir.join("scan.las");
    LasIo::default().write(&input, &scene(), 1).unwrap();

    let pipeline = SegmentationPipeline::new(config(), dir.join("run")).unwrap();
    pipeline.tile(&input).unwrap();
    pipeline.estimate_ground().unwrap();
    pipeline.render_heightmaps().unwrap();

    let summaries = pipeline
        .apply_detections(&LabelFileDetector::new(dir.join("no-such-labels")))
        .unwrap();
    assert!(summaries.is_empty());

    // static clouds fall back to the non-ground split
    let manifest = pipeline.build_manifest().unwrap();
    assert!(manifest.tiles.iter().all(|t| t.static_cloud.contains("nonground")));
    fs::remove_dir_all(&dir).ok();
}

#[test]
fn stage_without_upstream_artifacts_is_fatal() {
    let dir = workdir("fatal");
    let pipeline = SegmentationPipeline::new(config(), dir.join("run")).unwrap();
    assert!(pipeline.estimate_ground().is_err());
    assert!(pipeline.render_heightmaps().is_err());
    fs::remove_dir_all(&dir).ok();
}

#[test]
fn edit_removes_car_and_infills() {
    let dir = workdir("edit");
    let input = dir.join("scan.las");
    let cloud = scene();
    LasIo::default().write(&input, &cloud, 1).unwrap();

    // first car spans scan x 5..8.75, y 5..6.75, z 0.5..1.5
    let boxes = BoxFile {
        bounding_box: vec![EditBox {
            center: [6.875, 1.0, -5.875],
            size: [4.2, 1.2, 2.2],
            yaw: 0.0,
            fill_surface: true,
        }],
    };
    let box_path = dir.join("boxes.json");
    write_json(&box_path, &boxes).unwrap();

    let pipeline = SegmentationPipeline::new(config(), dir.join("run")).unwrap();
    let output = dir.join("edited.las");
    let outcome = pipeline.edit(&input, &box_path, &output).unwrap();
    assert_eq!(outcome.per_box[0].removed, CAR_POINTS);
    assert_eq!(outcome.per_box[0].filled, 277);

    let edited = LasIo::default().read(&output).unwrap();
    assert_eq!(edited.len(), cloud.len() - CAR_POINTS + 277);
    fs::remove_dir_all(&dir).ok();
}
