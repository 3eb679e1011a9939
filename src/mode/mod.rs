//! ModeInferer — K-means clustering of operational modes (§4.2).
//!
//! Infers each miner's operating mode (`eco` | `normal` | `perf` |
//! `unknown`) within its peer group so baseline/fleet comparisons stay
//! apples-to-apples across throttled vs. overclocked configurations.

pub mod kmeans;

use std::collections::HashMap;

use sqlx::PgPool;

use crate::baseline::repo as baseline_repo;
use crate::config::{defaults, Settings};
use crate::types::FeatureVector;

/// Inferred mode + confidence for one miner, returned alongside the
/// mutated feature vectors so the orchestrator can carry them forward
/// without a second read.
#[derive(Debug, Clone)]
pub struct ModeAssignment {
    pub miner_id: String,
    pub inferred_mode: String,
    pub mode_confidence: f64,
}

pub struct ModeInferer {
    pool: PgPool,
    min_group_size: usize,
    max_clusters: usize,
    seed: u64,
    max_iterations: usize,
}

impl ModeInferer {
    pub fn new(pool: PgPool, _settings: &Settings) -> Self {
        Self {
            pool,
            min_group_size: defaults::MIN_GROUP_SIZE_FOR_CLUSTERING,
            max_clusters: defaults::MAX_CLUSTERS,
            seed: defaults::KMEANS_SEED,
            max_iterations: defaults::KMEANS_MAX_ITERATIONS,
        }
    }

    /// `inferModes` — groups by `(site_id, model, firmware)` (note: *not*
    /// including mode, unlike FleetBaseliner's grouping), clusters each
    /// qualifying group, and persists `inferred_mode`/`mode_confidence`
    /// onto the baseline rows.
    pub async fn infer_modes(
        &self,
        features: &mut [FeatureVector],
    ) -> Result<Vec<ModeAssignment>, crate::error::ClusteringError> {
        let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, f) in features.iter().enumerate() {
            groups.entry(f.base_group_key()).or_default().push(i);
        }

        let mut assignments = Vec::with_capacity(features.len());

        for (group_key, indices) in groups {
            let assigned = self.cluster_group(features, &indices, &group_key);
            assignments.extend(assigned);
        }

        for assignment in &assignments {
            if let Some(f) = features.iter_mut().find(|f| f.miner_id == assignment.miner_id) {
                f.inferred_mode = assignment.inferred_mode.clone();
            }
            baseline_repo::update_mode(
                &self.pool,
                &assignment.miner_id,
                &assignment.inferred_mode,
                assignment.mode_confidence,
            )
            .await
            .ok(); // a mode-persist failure shouldn't fail the whole cycle
        }

        Ok(assignments)
    }

    fn cluster_group(
        &self,
        features: &[FeatureVector],
        indices: &[usize],
        group_key: &str,
    ) -> Vec<ModeAssignment> {
        let unknown = |miner_id: &str| ModeAssignment {
            miner_id: miner_id.to_string(),
            inferred_mode: "unknown".to_string(),
            mode_confidence: 0.0,
        };

        if indices.len() < self.min_group_size {
            return indices
                .iter()
                .map(|&i| unknown(&features[i].miner_id))
                .collect();
        }

        // Records lacking any of the three required features stay unknown.
        let mut valid: Vec<usize> = Vec::new();
        let mut invalid: Vec<usize> = Vec::new();
        for &i in indices {
            let f = &features[i];
            if f.hashrate_ratio.is_some() && f.temp_max.is_some() {
                valid.push(i);
            } else {
                invalid.push(i);
            }
        }

        let mut results: Vec<ModeAssignment> = invalid
            .iter()
            .map(|&i| unknown(&features[i].miner_id))
            .collect();

        let n = valid.len();
        let k = self.max_clusters.min(n / 3);
        if k < 2 {
            results.extend(valid.iter().map(|&i| unknown(&features[i].miner_id)));
            return results;
        }

        let raw: Vec<Vec<f64>> = valid
            .iter()
            .map(|&i| {
                let f = &features[i];
                vec![
                    f.hashrate_ratio.unwrap_or(0.0),
                    f.temp_max.unwrap_or(0.0),
                    f.efficiency.unwrap_or(0.0),
                ]
            })
            .collect();

        let standardized = standardize(&raw);

        let clustering = match kmeans::kmeans(&standardized, k, self.seed, self.max_iterations) {
            Some(c) => c,
            None => {
                tracing::warn!(group_key, "k-means failed to converge, marking group unknown");
                results.extend(valid.iter().map(|&i| unknown(&features[i].miner_id)));
                return results;
            }
        };

        // Sort clusters by mean hashrate_ratio (raw, not standardized)
        // ascending, then assign labels by rank.
        let mut cluster_means: Vec<(usize, f64)> = (0..k)
            .map(|c| {
                let members: Vec<f64> = (0..n)
                    .filter(|&i| clustering.assignments[i] == c)
                    .map(|i| raw[i][0])
                    .collect();
                let mean = if members.is_empty() {
                    0.0
                } else {
                    members.iter().sum::<f64>() / members.len() as f64
                };
                (c, mean)
            })
            .collect();
        cluster_means.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        let labels: Vec<&str> = match k {
            2 => vec!["eco", "perf"],
            _ => vec!["eco", "normal", "perf"],
        };
        let mut label_of_cluster = vec!["unknown"; k];
        for (rank, &(cluster, _)) in cluster_means.iter().enumerate() {
            label_of_cluster[cluster] = labels.get(rank).copied().unwrap_or("unknown");
        }

        // Max distance to centroid within each cluster, for the
        // confidence formula.
        let mut max_dist_in_cluster = vec![0.0f64; k];
        for (i, point) in standardized.iter().enumerate() {
            let c = clustering.assignments[i];
            let d = kmeans::distance_to_centroid(point, &clustering.centroids[c]);
            if d > max_dist_in_cluster[c] {
                max_dist_in_cluster[c] = d;
            }
        }

        for (i, &idx) in valid.iter().enumerate() {
            let c = clustering.assignments[i];
            let d_self = kmeans::distance_to_centroid(&standardized[i], &clustering.centroids[c]);
            let d_max = max_dist_in_cluster[c];
            let confidence = if d_max > 0.0 {
                (1.0 - d_self / d_max).clamp(0.3, 1.0)
            } else {
                1.0
            };
            results.push(ModeAssignment {
                miner_id: features[idx].miner_id.clone(),
                inferred_mode: label_of_cluster[c].to_string(),
                mode_confidence: confidence,
            });
        }

        results
    }
}

/// Z-scale each dimension independently across the input points.
fn standardize(points: &[Vec<f64>]) -> Vec<Vec<f64>> {
    if points.is_empty() {
        return Vec::new();
    }
    let dim = points[0].len();
    let n = points.len() as f64;

    let mut means = vec![0.0; dim];
    for p in points {
        for d in 0..dim {
            means[d] += p[d];
        }
    }
    for m in &mut means {
        *m /= n;
    }

    let mut variances = vec![0.0; dim];
    for p in points {
        for d in 0..dim {
            let diff = p[d] - means[d];
            variances[d] += diff * diff;
        }
    }
    for v in &mut variances {
        *v /= n;
    }
    let stds: Vec<f64> = variances.iter().map(|v| v.sqrt()).collect();

    points
        .iter()
        .map(|p| {
            (0..dim)
                .map(|d| {
                    if stds[d] > 0.0 {
                        (p[d] - means[d]) / stds[d]
                    } else {
                        0.0
                    }
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feature(miner_id: &str, hashrate_ratio: f64, temp_max: f64) -> FeatureVector {
        FeatureVector {
            miner_id: miner_id.to_string(),
            site_id: 1,
            model: "S19".to_string(),
            firmware: "v1".to_string(),
            is_online: true,
            hashrate_ratio: Some(hashrate_ratio),
            boards_ratio: Some(1.0),
            temp_max: Some(temp_max),
            efficiency: Some(30.0),
            fan_speed_min: Some(3000),
            fleet_z_hashrate: None,
            inferred_mode: "unknown".to_string(),
        }
    }

    #[test]
    fn small_groups_are_unknown() {
        let inferer_min_group = defaults::MIN_GROUP_SIZE_FOR_CLUSTERING;
        let features: Vec<FeatureVector> = (0..inferer_min_group - 1)
            .map(|i| feature(&format!("m{i}"), 0.9, 60.0))
            .collect();
        let indices: Vec<usize> = (0..features.len()).collect();

        // Build a throwaway inferer purely to call the pure clustering fn.
        let results = dummy_inferer().cluster_group(&features, &indices, "test");
        assert!(results.iter().all(|r| r.inferred_mode == "unknown"));
    }

    #[test]
    fn separates_eco_and_perf_clusters() {
        let mut features = Vec::new();
        for i in 0..8 {
            features.push(feature(&format!("eco{i}"), 0.55, 52.0));
        }
        for i in 0..8 {
            features.push(feature(&format!("perf{i}"), 1.08, 78.0));
        }
        let indices: Vec<usize> = (0..features.len()).collect();
        let results = dummy_inferer().cluster_group(&features, &indices, "test");

        for r in &results {
            if r.miner_id.starts_with("eco") {
                assert_eq!(r.inferred_mode, "eco");
            } else {
                assert_eq!(r.inferred_mode, "perf");
            }
        }
    }

    fn dummy_inferer() -> ModeInfererLogic {
        ModeInfererLogic {
            min_group_size: defaults::MIN_GROUP_SIZE_FOR_CLUSTERING,
            max_clusters: defaults::MAX_CLUSTERS,
            seed: defaults::KMEANS_SEED,
            max_iterations: defaults::KMEANS_MAX_ITERATIONS,
        }
    }

    // Mirrors `ModeInferer`'s clustering logic without requiring a pool,
    // so unit tests don't need a database connection.
    struct ModeInfererLogic {
        min_group_size: usize,
        max_clusters: usize,
        seed: u64,
        max_iterations: usize,
    }

    impl ModeInfererLogic {
        fn cluster_group(
            &self,
            features: &[FeatureVector],
            indices: &[usize],
            group_key: &str,
        ) -> Vec<ModeAssignment> {
            let stub = ModeInferer {
                pool: unreachable_pool(),
                min_group_size: self.min_group_size,
                max_clusters: self.max_clusters,
                seed: self.seed,
                max_iterations: self.max_iterations,
            };
            stub.cluster_group(features, indices, group_key)
        }
    }

    fn unreachable_pool() -> PgPool {
        // `cluster_group` never touches `self.pool`; this lazily-connecting
        // pool is constructed but never awaited against the network.
        PgPool::connect_lazy("postgres://unused/unused").expect("lazy pool construction")
    }
}
