//! Spatial tiling: sub-sampled k-means, smart merge, exact nearest-center
//! assignment of the full cloud, deterministic renumbering.
mod graph;
mod kmeans;
mod merge;

pub use graph::{
    NeighborEdge, NeighborGraphArtifact, NeighborRecord, NeighborRef, Tile, TileGraph,
    to_artifact,
};
pub use kmeans::{KMeansResult, kmeans};
pub use merge::{Cluster, merge_until_stable};

use crate::cloud::PointCloud;
use crate::config::TilerConfig;
use crate::error::{Result, SegmentationError};
use kdtree::KdTree;
use kdtree::distance::squared_euclidean;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

pub struct Tiler {
    config: TilerConfig,
}

impl Tiler {
    pub fn new(config: TilerConfig) -> Self {
        Self { config }
    }

    /// Partition `cloud` into tiles of roughly `target_points_per_tile`
    /// points and link each tile to its nearest neighbors.
    pub fn tile(&self, cloud: &PointCloud) -> Result<TileGraph> {
        let n_full = cloud.len();
        if n_full == 0 {
            info!("Empty input cloud, no tiles produced");
            return Ok(TileGraph::default());
        }

        let target = self.config.target_points_per_tile.max(1);
        let k = ((n_full as f64 / target as f64).round() as usize).max(1);
        info!("Points full={}, target={}, K={}", n_full, target, k);

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let (sample, ratio) = self.subsample(cloud, &mut rng);
        info!("Kept {} points for k-means", sample.len());

        let km = kmeans(
            &sample,
            k,
            self.config.kmeans_restarts,
            self.config.kmeans_max_iterations,
            &mut rng,
        );
        let clusters: Vec<Cluster> = km
            .centers
            .iter()
            .zip(km.counts())
            .map(|(&center, count)| Cluster {
                center,
                count: count as f64 / ratio,
            })
            .collect();

        let merged = merge_until_stable(clusters, target as f64);
        info!("After merge: {} clusters", merged.len());

        let centers: Vec<[f64; 2]> = merged.iter().map(|c| c.center).collect();
        let labels = assign_nearest(cloud, &centers)?;

        let mut graph = build_tiles(cloud, &centers, &labels);
        graph.link_neighbors(self.config.neighbor_count);

        for tile in &graph.tiles {
            debug!(
                "Tile {:04}: {} points, center ({:.2}, {:.2})",
                tile.id,
                tile.cloud.len(),
                tile.center[0],
                tile.center[1]
            );
        }
        info!("Produced {} tiles", graph.len());
        Ok(graph)
    }

    /// Bernoulli sub-sample of XY positions. Returns the sample and the
    /// effective keep ratio used to scale counts back up.
    fn subsample(&self, cloud: &PointCloud, rng: &mut StdRng) -> (Vec<[f64; 2]>, f64) {
        let ratio = self.config.keep_ratio;
        let all = || cloud.points.iter().map(|p| [p.x, p.y]).collect::<Vec<_>>();
        if ratio >= 0.999 {
            return (all(), 1.0);
        }

        let sample: Vec<[f64; 2]> = cloud
            .points
            .iter()
            .filter(|_| rng.random::<f64>() < ratio)
            .map(|p| [p.x, p.y])
            .collect();
        if sample.is_empty() {
            (all(), 1.0)
        } else {
            (sample, ratio)
        }
    }
}

/// Exact nearest-center label for every point of the full cloud.
fn assign_nearest(cloud: &PointCloud, centers: &[[f64; 2]]) -> Result<Vec<usize>> {
    let mut tree: KdTree<f64, usize, [f64; 2]> = KdTree::new(2);
    for (i, &c) in centers.iter().enumerate() {
        tree.add(c, i)
            .map_err(|e| SegmentationError::SpatialIndex(format!("{e:?}")))?;
    }

    cloud
        .points
        .par_iter()
        .map(|p| {
            let hits = tree
                .nearest(&[p.x, p.y], 1, &squared_euclidean)
                .map_err(|e| SegmentationError::SpatialIndex(format!("{e:?}")))?;
            hits.first()
                .map(|&(_, &label)| label)
                .ok_or_else(|| SegmentationError::SpatialIndex("no centers".into()))
        })
        .collect()
}

/// Group points by label, drop centers that own nothing and renumber the
/// rest by (-Y, X) so ids run north to south, then west to east.
fn build_tiles(cloud: &PointCloud, centers: &[[f64; 2]], labels: &[usize]) -> TileGraph {
    let mut members: Vec<Vec<usize>> = vec![Vec::new(); centers.len()];
    for (i, &l) in labels.iter().enumerate() {
        members[l].push(i);
    }

    let mut order: Vec<usize> = (0..centers.len())
        .filter(|&c| !members[c].is_empty())
        .collect();
    order.sort_by(|&a, &b| {
        (-centers[a][1])
            .total_cmp(&-centers[b][1])
            .then(centers[a][0].total_cmp(&centers[b][0]))
    });

    let tiles = order
        .into_iter()
        .enumerate()
        .map(|(id, old)| Tile {
            id,
            center: centers[old],
            cloud: cloud.select(&members[old]),
            neighbors: Vec::new(),
        })
        .collect();
    TileGraph { tiles }
}
