//! Batch k-means (Lloyd's algorithm) with a fixed seed, used by
//! [`super::ModeInferer`] to cluster standardized feature vectors
//! deterministically. No clustering crate is available in the inherited
//! dependency stack, so this is hand-rolled in the style of the reference
//! crate's online k-means regime clusterer, adapted to batch/offline use.

use rand::seq::SliceRandom;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Result of one clustering pass: a cluster index per input point plus the
/// centroids themselves (in the same dimensional space as the input).
#[derive(Debug, Clone)]
pub struct ClusterResult {
    pub assignments: Vec<usize>,
    pub centroids: Vec<Vec<f64>>,
}

fn sq_dist(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Run k-means with a fixed seed so repeated calls on the same input
/// produce identical assignments (the determinism contract in §4.2).
///
/// `points` must all share the same dimensionality and `k >= 1`. Returns
/// `None` if `points` is empty or `k` exceeds the point count.
pub fn kmeans(points: &[Vec<f64>], k: usize, seed: u64, max_iterations: usize) -> Option<ClusterResult> {
    if points.is_empty() || k == 0 || k > points.len() {
        return None;
    }

    let dim = points[0].len();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    // Deterministic seeding: shuffle indices with the fixed-seed RNG and
    // take the first k distinct points as initial centroids.
    let mut indices: Vec<usize> = (0..points.len()).collect();
    indices.shuffle(&mut rng);
    let mut centroids: Vec<Vec<f64>> = indices[..k].iter().map(|&i| points[i].clone()).collect();

    let mut assignments = vec![0usize; points.len()];

    for _ in 0..max_iterations {
        let mut changed = false;

        for (i, point) in points.iter().enumerate() {
            let mut best = 0usize;
            let mut best_dist = f64::MAX;
            for (c_idx, centroid) in centroids.iter().enumerate() {
                let d = sq_dist(point, centroid);
                if d < best_dist {
                    best_dist = d;
                    best = c_idx;
                }
            }
            if assignments[i] != best {
                assignments[i] = best;
                changed = true;
            }
        }

        let mut sums = vec![vec![0.0f64; dim]; k];
        let mut counts = vec![0usize; k];
        for (point, &cluster) in points.iter().zip(assignments.iter()) {
            for d in 0..dim {
                sums[cluster][d] += point[d];
            }
            counts[cluster] += 1;
        }

        for c in 0..k {
            if counts[c] > 0 {
                for d in 0..dim {
                    centroids[c][d] = sums[c][d] / counts[c] as f64;
                }
            }
            // Empty clusters keep their previous centroid rather than
            // being re-seeded — with k capped at 3 over small peer groups
            // this is rare and re-seeding would break determinism ordering.
        }

        if !changed {
            break;
        }
    }

    Some(ClusterResult {
        assignments,
        centroids,
    })
}

/// Euclidean distance from a point to its assigned centroid, used for the
/// confidence formula in §4.2.
pub fn distance_to_centroid(point: &[f64], centroid: &[f64]) -> f64 {
    sq_dist(point, centroid).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_across_reruns() {
        let points = vec![
            vec![0.0, 0.0],
            vec![0.1, -0.1],
            vec![10.0, 10.0],
            vec![10.1, 9.9],
        ];
        let first = kmeans(&points, 2, 42, 100).unwrap();
        let second = kmeans(&points, 2, 42, 100).unwrap();
        assert_eq!(first.assignments, second.assignments);
    }

    #[test]
    fn separates_obviously_distinct_clusters() {
        let points = vec![
            vec![0.0, 0.0],
            vec![0.05, -0.05],
            vec![-0.05, 0.05],
            vec![20.0, 20.0],
            vec![20.05, 19.95],
            vec![19.95, 20.05],
        ];
        let result = kmeans(&points, 2, 42, 100).unwrap();
        assert_eq!(result.assignments[0], result.assignments[1]);
        assert_eq!(result.assignments[1], result.assignments[2]);
        assert_eq!(result.assignments[3], result.assignments[4]);
        assert_eq!(result.assignments[4], result.assignments[5]);
        assert_ne!(result.assignments[0], result.assignments[3]);
    }
}
