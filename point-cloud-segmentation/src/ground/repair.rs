//! Cross-tile consistency check. Reads only the pre-repair snapshot so the
//! outcome does not depend on tile processing order.
use super::plane::{Plane, PlaneStatus, TilePlane, angle_deg};
use super::ransac::prefilter_candidates;
use crate::config::GroundConfig;
use crate::stats::median;
use crate::tiler::{Tile, TileGraph};
use nalgebra::Vector3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Before/after record of one repaired tile (`suspects.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspectRecord {
    pub tile_id: usize,
    pub n_orig: [f64; 3],
    pub d_orig: f64,
    pub n_fixed: [f64; 3],
    pub d_fixed: f64,
    pub inlier_ratio: f64,
    pub max_angle_to_neighbors: f64,
    pub median_angle_to_neighbors: f64,
}

#[derive(Debug, Clone)]
pub struct Repair {
    pub tile_id: usize,
    pub plane: TilePlane,
    pub record: SuspectRecord,
}

/// Compute every repair against `snapshot` (indexed by tile id).
/// The result is sorted by tile id.
pub fn plan_repairs(
    graph: &TileGraph,
    snapshot: &[Option<TilePlane>],
    config: &GroundConfig,
) -> Vec<Repair> {
    let mut repairs: Vec<Repair> = graph
        .tiles
        .par_iter()
        .filter_map(|tile| {
            let current = snapshot.get(tile.id).copied().flatten()?;
            if !current.good {
                return None;
            }
            let neighbor_normals: Vec<Vector3<f64>> = tile
                .neighbors
                .iter()
                .filter_map(|e| snapshot.get(e.id).copied().flatten())
                .filter(|p| p.good)
                .map(|p| p.plane.normal)
                .collect();
            if neighbor_normals.is_empty() {
                return None;
            }

            let angles: Vec<f64> = neighbor_normals
                .iter()
                .map(|n| angle_deg(&current.plane.normal, n))
                .collect();
            let max_ang = angles.iter().copied().fold(f64::MIN, f64::max);
            let med_ang = median(&angles)?;

            let suspicious = max_ang > config.angle_hard_deg
                || (med_ang > config.angle_soft_deg && current.inlier_ratio < config.inlier_min);
            if !suspicious {
                return None;
            }

            let fixed = consensus_plane(&neighbor_normals, tile, config)?;
            let plane = TilePlane {
                plane: fixed,
                nz: fixed.nz(),
                status: PlaneStatus::Repaired,
                ..current
            };
            let record = SuspectRecord {
                tile_id: tile.id,
                n_orig: current.plane.normal.into(),
                d_orig: current.plane.offset,
                n_fixed: fixed.normal.into(),
                d_fixed: fixed.offset,
                inlier_ratio: current.inlier_ratio,
                max_angle_to_neighbors: max_ang,
                median_angle_to_neighbors: med_ang,
            };
            Some(Repair {
                tile_id: tile.id,
                plane,
                record,
            })
        })
        .collect();
    repairs.sort_by_key(|r| r.tile_id);
    repairs
}

/// Component-wise median of the neighbor normals, re-anchored on the tile's
/// own ground candidates.
fn consensus_plane(
    normals: &[Vector3<f64>],
    tile: &Tile,
    config: &GroundConfig,
) -> Option<Plane> {
    let component = |i: usize| median(&normals.iter().map(|n| n[i]).collect::<Vec<_>>());
    let v = Vector3::new(component(0)?, component(1)?, component(2)?);
    let norm = v.norm();
    if norm < 1e-9 {
        return None;
    }
    let n = v / (norm + 1e-9);
    let n = if n.z < 0.0 { -n } else { n };

    let cand = prefilter_candidates(&tile.cloud.points, config);
    if cand.is_empty() {
        return None;
    }
    let d = -cand.iter().map(|p| n.dot(&p.coords)).sum::<f64>() / cand.len() as f64;
    Plane::new(n, d)
}

/// Overwrite repaired entries in place. Repairs are terminal.
pub fn apply_repairs(planes: &mut [Option<TilePlane>], repairs: &[Repair]) {
    for repair in repairs {
        if let Some(slot) = planes.get_mut(repair.tile_id) {
            *slot = Some(repair.plane);
        }
    }
}
