//! Robust ground plane fit for a single tile.
use super::plane::{Plane, PlaneStatus, TilePlane};
use crate::config::GroundConfig;
use crate::error::{Result, SegmentationError};
use crate::stats::{median, quantile};
use nalgebra::Point3;
use rand::rngs::StdRng;
use rand::seq::index::sample;

/// Ground candidates: points at or below the configured z quantile plus a
/// slack band. Falls back to every point when too few survive.
pub fn prefilter_candidates(points: &[Point3<f64>], config: &GroundConfig) -> Vec<Point3<f64>> {
    let z: Vec<f64> = points.iter().map(|p| p.z).collect();
    let Some(z_cut) = quantile(&z, config.prefilter_quantile) else {
        return Vec::new();
    };
    let limit = z_cut + config.prefilter_slack;
    let cand: Vec<Point3<f64>> = points.iter().filter(|p| p.z <= limit).copied().collect();
    if cand.len() < config.min_points {
        points.to_vec()
    } else {
        cand
    }
}

fn inlier_mask(plane: &Plane, points: &[Point3<f64>], threshold: f64) -> (Vec<bool>, usize) {
    let mask: Vec<bool> = points
        .iter()
        .map(|p| plane.signed_distance(p).abs() < threshold)
        .collect();
    let count = mask.iter().filter(|&&m| m).count();
    (mask, count)
}

/// Fit the dominant plane of a tile by consensus sampling over the ground
/// candidates, refine it by least squares on the winning inliers and orient
/// it upward.
pub fn fit_ground_plane(
    points: &[Point3<f64>],
    config: &GroundConfig,
    rng: &mut StdRng,
) -> Result<TilePlane> {
    if points.len() < config.min_points {
        return Err(SegmentationError::DegenerateInput {
            needed: config.min_points,
            got: points.len(),
        });
    }

    let thinned: Vec<Point3<f64>>;
    let points = if points.len() > config.max_fit_points {
        thinned = sample(rng, points.len(), config.max_fit_points)
            .into_iter()
            .map(|i| points[i])
            .collect();
        &thinned[..]
    } else {
        points
    };

    let cand = prefilter_candidates(points, config);
    let n = cand.len();
    if n < 3 {
        return Err(SegmentationError::DegenerateInput { needed: 3, got: n });
    }

    let mut best: Option<(Plane, usize)> = None;
    for _ in 0..config.iterations {
        let idx = sample(rng, n, 3);
        let Some(plane) =
            Plane::through_points(&cand[idx.index(0)], &cand[idx.index(1)], &cand[idx.index(2)])
        else {
            continue;
        };
        let (_, count) = inlier_mask(&plane, &cand, config.distance_threshold);
        if best.as_ref().is_none_or(|(_, c)| count > *c) {
            best = Some((plane, count));
        }
    }
    let Some((mut plane, _)) = best else {
        return Err(SegmentationError::DegenerateInput {
            needed: 3,
            got: 0,
        });
    };

    let (mut mask, mut count) = inlier_mask(&plane, &cand, config.distance_threshold);
    let inliers: Vec<Point3<f64>> = cand
        .iter()
        .zip(&mask)
        .filter(|&(_, &m)| m)
        .map(|(p, _)| *p)
        .collect();
    if let Some(refined) = Plane::least_squares(&inliers) {
        let (refined_mask, refined_count) =
            inlier_mask(&refined, &cand, config.distance_threshold);
        if refined_count >= count {
            plane = refined;
            mask = refined_mask;
            count = refined_count;
        }
    }

    let inlier_z: Vec<f64> = cand
        .iter()
        .zip(&mask)
        .filter(|&(_, &m)| m)
        .map(|(p, _)| p.z)
        .collect();
    let z_median = if inlier_z.is_empty() {
        median(&cand.iter().map(|p| p.z).collect::<Vec<_>>())
    } else {
        median(&inlier_z)
    }
    .unwrap_or(0.0);

    let nz = plane.nz();
    Ok(TilePlane {
        plane,
        inlier_ratio: count as f64 / n.max(1) as f64,
        nz,
        z_median,
        good: nz >= config.min_nz,
        status: PlaneStatus::Estimated,
    })
}
