//! Seeded k-means over XY positions.
use rand::Rng;
use rand::rngs::StdRng;
use rayon::prelude::*;

#[derive(Debug, Clone)]
pub struct KMeansResult {
    pub centers: Vec<[f64; 2]>,
    pub labels: Vec<usize>,
    pub inertia: f64,
}

impl KMeansResult {
    /// Members per center.
    pub fn counts(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.centers.len()];
        for &l in &self.labels {
            counts[l] += 1;
        }
        counts
    }
}

fn dist2(a: [f64; 2], b: [f64; 2]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    dx * dx + dy * dy
}

/// Index of the closest center and its squared distance; ties go to the
/// lower index.
pub fn nearest_center(p: [f64; 2], centers: &[[f64; 2]]) -> (usize, f64) {
    let mut best = (0usize, f64::INFINITY);
    for (i, &c) in centers.iter().enumerate() {
        let d = dist2(p, c);
        if d < best.1 {
            best = (i, d);
        }
    }
    best
}

/// k-means++ seeding: each new center is drawn with probability
/// proportional to its squared distance from the closest chosen center.
fn seed_centers(points: &[[f64; 2]], k: usize, rng: &mut StdRng) -> Vec<[f64; 2]> {
    let n = points.len();
    let mut centers = Vec::with_capacity(k);
    centers.push(points[rng.random_range(0..n)]);

    let mut d2: Vec<f64> = points.iter().map(|&p| dist2(p, centers[0])).collect();
    while centers.len() < k {
        let total: f64 = d2.iter().sum();
        let next = if total > 0.0 {
            let mut target = rng.random::<f64>() * total;
            let mut chosen = n - 1;
            for (i, &w) in d2.iter().enumerate() {
                if target < w {
                    chosen = i;
                    break;
                }
                target -= w;
            }
            chosen
        } else {
            // every point already coincides with a center
            rng.random_range(0..n)
        };
        let c = points[next];
        centers.push(c);
        for (slot, &p) in d2.iter_mut().zip(points) {
            *slot = slot.min(dist2(p, c));
        }
    }
    centers
}

fn lloyd(
    points: &[[f64; 2]],
    mut centers: Vec<[f64; 2]>,
    max_iterations: usize,
) -> KMeansResult {
    let k = centers.len();
    let mut labels = vec![usize::MAX; points.len()];

    for _ in 0..max_iterations.max(1) {
        let new_labels: Vec<usize> = points
            .par_iter()
            .map(|&p| nearest_center(p, &centers).0)
            .collect();
        let converged = new_labels == labels;
        labels = new_labels;
        if converged {
            break;
        }

        let mut sums = vec![[0.0f64; 3]; k];
        for (&p, &l) in points.iter().zip(&labels) {
            sums[l][0] += p[0];
            sums[l][1] += p[1];
            sums[l][2] += 1.0;
        }
        for (c, s) in centers.iter_mut().zip(&sums) {
            // empty clusters keep their previous position
            if s[2] > 0.0 {
                *c = [s[0] / s[2], s[1] / s[2]];
            }
        }
    }

    let inertia = points
        .par_iter()
        .zip(labels.par_iter())
        .map(|(&p, &l)| dist2(p, centers[l]))
        .sum();

    KMeansResult {
        centers,
        labels,
        inertia,
    }
}

/// Cluster `points` into `k` groups, keeping the best of `restarts` runs by
/// inertia. `k` is clamped to `1..=points.len()`.
pub fn kmeans(
    points: &[[f64; 2]],
    k: usize,
    restarts: usize,
    max_iterations: usize,
    rng: &mut StdRng,
) -> KMeansResult {
    if points.is_empty() {
        return KMeansResult {
            centers: Vec::new(),
            labels: Vec::new(),
            inertia: 0.0,
        };
    }
    let k = k.clamp(1, points.len());

    let mut best: Option<KMeansResult> = None;
    for _ in 0..restarts.max(1) {
        let seeds = seed_centers(points, k, rng);
        let run = lloyd(points, seeds, max_iterations);
        if best.as_ref().is_none_or(|b| run.inertia < b.inertia) {
            best = Some(run);
        }
    }
    best.unwrap_or_else(|| lloyd(points, vec![points[0]], max_iterations))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn blob(cx: f64, cy: f64, n: usize, rng: &mut StdRng) -> Vec<[f64; 2]> {
        (0..n)
            .map(|_| {
                [
                    cx + rng.random_range(-1.0..1.0),
                    cy + rng.random_range(-1.0..1.0),
                ]
            })
            .collect()
    }

    #[test]
    fn separates_two_blobs() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut pts = blob(0.0, 0.0, 200, &mut rng);
        pts.extend(blob(50.0, 0.0, 200, &mut rng));

        let result = kmeans(&pts, 2, 3, 100, &mut rng);
        assert_eq!(result.centers.len(), 2);
        let mut xs: Vec<f64> = result.centers.iter().map(|c| c[0]).collect();
        xs.sort_by(|a, b| a.total_cmp(b));
        assert!(xs[0].abs() < 1.0, "left center {}", xs[0]);
        assert!((xs[1] - 50.0).abs() < 1.0, "right center {}", xs[1]);
        assert_eq!(result.counts(), vec![200, 200]);
    }

    #[test]
    fn same_seed_same_result() {
        let mut data_rng = StdRng::seed_from_u64(1);
        let pts = blob(0.0, 0.0, 300, &mut data_rng);
        let a = kmeans(&pts, 4, 2, 50, &mut StdRng::seed_from_u64(9));
        let b = kmeans(&pts, 4, 2, 50, &mut StdRng::seed_from_u64(9));
        assert_eq!(a.centers, b.centers);
        assert_eq!(a.labels, b.labels);
    }

    #[test]
    fn k_is_clamped_to_point_count() {
        let pts = vec![[0.0, 0.0], [1.0, 1.0]];
        let result = kmeans(&pts, 5, 1, 10, &mut StdRng::seed_from_u64(0));
        assert_eq!(result.centers.len(), 2);
    }

    #[test]
    fn nearest_center_prefers_lower_index_on_tie() {
        let centers = [[1.0, 0.0], [-1.0, 0.0]];
        assert_eq!(nearest_center([0.0, 0.0], &centers).0, 0);
    }
}
