//! Tile arena and centroid neighbor graph.
use crate::cloud::PointCloud;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NeighborEdge {
    pub id: usize,
    pub dist: f64,
}

/// One spatial partition. Membership is frozen once the tiler returns.
#[derive(Debug, Clone)]
pub struct Tile {
    pub id: usize,
    pub center: [f64; 2],
    pub cloud: PointCloud,
    /// Nearest other tiles, ascending by centroid distance.
    pub neighbors: Vec<NeighborEdge>,
}

/// Tiles indexed by id (`tiles[i].id == i`).
#[derive(Debug, Clone, Default)]
pub struct TileGraph {
    pub tiles: Vec<Tile>,
}

impl TileGraph {
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn total_points(&self) -> usize {
        self.tiles.iter().map(|t| t.cloud.len()).sum()
    }

    /// Fill every tile's neighbor list with its `k` nearest other centroids.
    /// Equal distances are ordered by id.
    pub fn link_neighbors(&mut self, k: usize) {
        let centers: Vec<[f64; 2]> = self.tiles.iter().map(|t| t.center).collect();
        for tile in &mut self.tiles {
            tile.neighbors = nearest_centers(&centers, tile.id, k);
        }
    }
}

fn nearest_centers(centers: &[[f64; 2]], id: usize, k: usize) -> Vec<NeighborEdge> {
    let c = centers[id];
    let mut edges: Vec<NeighborEdge> = centers
        .iter()
        .enumerate()
        .filter(|&(j, _)| j != id)
        .map(|(j, o)| NeighborEdge {
            id: j,
            dist: ((o[0] - c[0]).powi(2) + (o[1] - c[1]).powi(2)).sqrt(),
        })
        .collect();
    edges.sort_by(|a, b| a.dist.total_cmp(&b.dist).then(a.id.cmp(&b.id)));
    edges.truncate(k);
    edges
}

/// Neighbor reference inside the persisted graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeighborRef {
    pub id: usize,
    pub dist: f64,
    pub cloud_file: String,
}

/// Persisted form of one tile: center, data reference, ordered neighbors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeighborRecord {
    pub center: [f64; 2],
    pub cloud_file: String,
    pub neighbors: Vec<NeighborRef>,
}

/// `neighbors.json`, keyed by tile id.
pub type NeighborGraphArtifact = BTreeMap<usize, NeighborRecord>;

/// Build the artifact; `cloud_file` maps a tile id to its stored cloud path.
pub fn to_artifact(
    graph: &TileGraph,
    cloud_file: impl Fn(usize) -> String,
) -> NeighborGraphArtifact {
    graph
        .tiles
        .iter()
        .map(|tile| {
            let record = NeighborRecord {
                center: tile.center,
                cloud_file: cloud_file(tile.id),
                neighbors: tile
                    .neighbors
                    .iter()
                    .map(|e| NeighborRef {
                        id: e.id,
                        dist: e.dist,
                        cloud_file: cloud_file(e.id),
                    })
                    .collect(),
            };
            (tile.id, record)
        })
        .collect()
}
