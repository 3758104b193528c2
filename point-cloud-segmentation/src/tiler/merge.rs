//! Greedy merging of under-populated clusters.

/// A centroid with its (estimated) absolute population.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cluster {
    pub center: [f64; 2],
    pub count: f64,
}

impl Cluster {
    /// Count-weighted combination of two clusters.
    pub fn absorb(self, other: Cluster) -> Cluster {
        let count = self.count + other.count;
        let center = if count > 0.0 {
            [
                (self.center[0] * self.count + other.center[0] * other.count) / count,
                (self.center[1] * self.count + other.center[1] * other.count) / count,
            ]
        } else {
            [
                0.5 * (self.center[0] + other.center[0]),
                0.5 * (self.center[1] + other.center[1]),
            ]
        };
        Cluster { center, count }
    }
}

/// Nearest other cluster by centroid distance; ties go to the lower index.
fn nearest_other(clusters: &[Cluster], idx: usize) -> Option<usize> {
    let c = clusters[idx].center;
    let mut best: Option<(usize, f64)> = None;
    for (j, other) in clusters.iter().enumerate() {
        if j == idx {
            continue;
        }
        let dx = other.center[0] - c[0];
        let dy = other.center[1] - c[1];
        let d2 = dx * dx + dy * dy;
        if best.is_none_or(|(_, bd)| d2 < bd) {
            best = Some((j, d2));
        }
    }
    best.map(|(j, _)| j)
}

/// Repeatedly fold the smallest cluster that fits into its nearest neighbor
/// while the combined population stays within `target`. Visits clusters in
/// ascending population order and restarts after every merge; stops when a
/// full pass merges nothing or one cluster remains.
pub fn merge_until_stable(mut clusters: Vec<Cluster>, target: f64) -> Vec<Cluster> {
    let mut changed = true;
    while changed && clusters.len() > 1 {
        changed = false;

        let mut order: Vec<usize> = (0..clusters.len()).collect();
        order.sort_by(|&a, &b| clusters[a].count.total_cmp(&clusters[b].count));

        for idx in order {
            let small = clusters[idx];
            if small.count >= target {
                continue;
            }
            let Some(j) = nearest_other(&clusters, idx) else {
                continue;
            };
            if small.count + clusters[j].count <= target {
                clusters[j] = clusters[j].absorb(small);
                clusters.remove(idx);
                changed = true;
                break;
            }
        }
    }
    clusters
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn cluster(x: f64, y: f64, count: f64) -> Cluster {
        Cluster {
            center: [x, y],
            count,
        }
    }

    #[test]
    fn merged_center_is_count_weighted() {
        let merged = cluster(0.0, 0.0, 30.0).absorb(cluster(10.0, 0.0, 10.0));
        assert_relative_eq!(merged.center[0], 2.5);
        assert_relative_eq!(merged.center[1], 0.0);
        assert_relative_eq!(merged.count, 40.0);
    }

    #[test]
    fn small_cluster_folds_into_nearest() {
        let clusters = vec![
            cluster(0.0, 0.0, 80.0),
            cluster(1.0, 0.0, 10.0),
            cluster(100.0, 0.0, 80.0),
        ];
        let merged = merge_until_stable(clusters, 100.0);
        assert_eq!(merged.len(), 2);
        assert_relative_eq!(merged[0].count, 90.0);
        // lies on the segment between its inputs
        assert!(merged[0].center[0] > 0.0 && merged[0].center[0] < 1.0);
        assert_relative_eq!(merged[1].count, 80.0);
    }

    #[test]
    fn never_exceeds_target_and_never_grows() {
        let clusters: Vec<Cluster> = (0..10)
            .map(|i| cluster(i as f64 * 3.0, 0.0, 30.0 + i as f64))
            .collect();
        let merged = merge_until_stable(clusters.clone(), 100.0);
        assert!(merged.len() <= clusters.len());
        assert!(merged.iter().all(|c| c.count <= 100.0));
        let total: f64 = merged.iter().map(|c| c.count).sum();
        assert_relative_eq!(total, clusters.iter().map(|c| c.count).sum::<f64>());
    }

    #[test]
    fn full_clusters_are_left_alone() {
        let clusters = vec![cluster(0.0, 0.0, 100.0), cluster(1.0, 0.0, 100.0)];
        assert_eq!(merge_until_stable(clusters.clone(), 100.0), clusters);
    }

    #[test]
    fn coincident_clusters_merge() {
        let clusters = vec![cluster(5.0, 5.0, 0.0), cluster(5.0, 5.0, 0.0)];
        let merged = merge_until_stable(clusters, 10.0);
        assert_eq!(merged, vec![cluster(5.0, 5.0, 0.0)]);
    }
}
