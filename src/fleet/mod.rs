//! FleetBaseliner — peer-group statistics (§4.3).
//!
//! Provides robust (median/MAD-based) fleet context so outliers can be
//! detected without assuming normality.

pub mod cache;

use std::collections::HashMap;

use chrono::Utc;
use rayon::prelude::*;
use serde::Serialize;

use cache::{CachedGroup, MetricStats, PeerCache};

use crate::config::Settings;
use crate::types::FeatureVector;

const TRACKED_METRICS: [&str; 4] = ["hashrate_ratio", "boards_ratio", "temp_max", "efficiency"];

#[derive(Debug, Clone, Serialize)]
pub struct PeerMetricEntry {
    pub value: f64,
    pub group_median: f64,
    pub robust_z: f64,
    pub percentile_rank: f64,
    pub group_p10: f64,
    pub group_p90: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeerMetricsBlock {
    pub group_key: String,
    pub group_size: usize,
    pub metrics: HashMap<String, PeerMetricEntry>,
}

pub struct FleetBaseliner {
    cache: PeerCache,
}

impl FleetBaseliner {
    pub fn new(settings: &Settings) -> Self {
        Self {
            cache: PeerCache::new(settings.fleet_cache_ttl_seconds),
        }
    }

    /// `group_key = site:model:firmware[:mode]`. The `:mode` segment is
    /// appended only when `inferred_mode` is present and not `unknown`.
    pub fn group_key(site_id: i64, model: &str, firmware: &str, inferred_mode: &str) -> String {
        if !inferred_mode.is_empty() && inferred_mode != "unknown" {
            format!("{site_id}:{model}:{firmware}:{inferred_mode}")
        } else {
            format!("{site_id}:{model}:{firmware}")
        }
    }

    /// `computeAllGroups` — groups records by peer group key and
    /// recomputes/caches stats for each group. Existing cache entries for
    /// groups not present in `features` are left untouched (they simply
    /// expire on TTL). Groups are independent, so recomputation fans out
    /// across a rayon pool rather than running group-by-group.
    pub fn compute_all_groups(&self, features: &[FeatureVector]) {
        let mut groups: HashMap<String, Vec<&FeatureVector>> = HashMap::new();
        for f in features {
            let key = Self::group_key(f.site_id, &f.model, &f.firmware, &f.inferred_mode);
            groups.entry(key).or_default().push(f);
        }

        groups
            .into_par_iter()
            .for_each(|(group_key, members)| self.compute_peer_metrics(&group_key, &members));
    }

    fn compute_peer_metrics(&self, group_key: &str, members: &[&FeatureVector]) {
        let mut metrics = HashMap::new();
        let mut raw_values = HashMap::new();

        for metric_name in TRACKED_METRICS {
            let mut values: Vec<f64> = members
                .iter()
                .filter_map(|f| metric_value(f, metric_name))
                .filter(|v| v.is_finite())
                .collect();

            if values.is_empty() {
                continue;
            }
            values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

            let median = cache::compute_median(&values);
            let mad = cache::compute_mad(&values, median);
            let stats = MetricStats {
                median,
                mad,
                p10: cache::percentile(&values, 10.0),
                p25: cache::percentile(&values, 25.0),
                p75: cache::percentile(&values, 75.0),
                p90: cache::percentile(&values, 90.0),
                count: values.len(),
            };
            metrics.insert(metric_name.to_string(), stats);
            raw_values.insert(metric_name.to_string(), values);
        }

        self.cache.insert(
            group_key.to_string(),
            CachedGroup {
                metrics,
                raw_values,
                computed_at: Utc::now(),
            },
        );
    }

    /// `computeRobustZ` — returns 0 when the group/metric isn't cached or
    /// MAD is 0, per the CacheMissError recovery policy (§7): never fail
    /// rule evaluation over a cold cache.
    pub fn compute_robust_z(&self, value: f64, group_key: &str, metric_name: &str) -> f64 {
        let now = Utc::now();
        let Some(entry) = self.cache.get(group_key, now) else {
            return 0.0;
        };
        let Some(stats) = entry.metrics.get(metric_name) else {
            return 0.0;
        };
        cache::robust_z(value, stats.median, stats.mad)
    }

    /// `buildPeerMetrics` — the per-miner peer comparison block stored
    /// onto problem events.
    pub fn build_peer_metrics(&self, features: &FeatureVector, group_key: &str) -> PeerMetricsBlock {
        let now = Utc::now();
        let Some(entry) = self.cache.get(group_key, now) else {
            return PeerMetricsBlock {
                group_key: group_key.to_string(),
                group_size: 0,
                metrics: HashMap::new(),
            };
        };

        let mut output = HashMap::new();
        let mut group_size = 0usize;

        for metric_name in TRACKED_METRICS {
            let Some(value) = metric_value(features, metric_name) else {
                continue;
            };
            let Some(stats) = entry.metrics.get(metric_name) else {
                continue;
            };
            group_size = stats.count;

            let robust_z = cache::robust_z(value, stats.median, stats.mad);
            let rank = entry
                .raw_values
                .get(metric_name)
                .map(|values| cache::percentile_rank(value, values))
                .unwrap_or(0.0);

            output.insert(
                metric_name.to_string(),
                PeerMetricEntry {
                    value,
                    group_median: stats.median,
                    robust_z: (robust_z * 100.0).round() / 100.0,
                    percentile_rank: (rank * 10.0).round() / 10.0,
                    group_p10: stats.p10,
                    group_p90: stats.p90,
                },
            );
        }

        PeerMetricsBlock {
            group_key: group_key.to_string(),
            group_size,
            metrics: output,
        }
    }

    pub fn invalidate_cache(&self, group_key: Option<&str>) {
        self.cache.invalidate(group_key);
    }
}

fn metric_value(f: &FeatureVector, metric_name: &str) -> Option<f64> {
    match metric_name {
        "hashrate_ratio" => f.hashrate_ratio,
        "boards_ratio" => f.boards_ratio,
        "temp_max" => f.temp_max,
        "efficiency" => f.efficiency,
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feature(miner_id: &str, hashrate_ratio: f64) -> FeatureVector {
        FeatureVector {
            miner_id: miner_id.to_string(),
            site_id: 1,
            model: "S19".to_string(),
            firmware: "v1".to_string(),
            is_online: true,
            hashrate_ratio: Some(hashrate_ratio),
            boards_ratio: Some(1.0),
            temp_max: Some(60.0),
            efficiency: Some(30.0),
            fan_speed_min: Some(3000),
            fleet_z_hashrate: None,
            inferred_mode: "unknown".to_string(),
        }
    }

    fn settings() -> Settings {
        Settings {
            database_url: "postgres://unused".into(),
            debounce_threshold: 2,
            resolve_threshold: 3,
            cooldown_hours: 24,
            evidence_max: 100,
            ewma_span: 12.0,
            soft_rule_min_samples: 6,
            fleet_cache_ttl_seconds: 300,
            max_notifications_per_cycle: 20,
            max_tickets_per_cycle: 5,
            p2_duration_gate_minutes: 30,
            p2_pfail_ticket_threshold: 0.5,
            min_train_samples: 50,
            min_positive_labels: 5,
            ml_retrain_interval_cycles: 288,
            scheduler_lock_timeout_seconds: 300,
            scheduler_heartbeat_seconds: 60,
            cycle_interval_seconds: 300,
            holder_id: "test".into(),
        }
    }

    #[test]
    fn fleet_outlier_yields_large_negative_robust_z() {
        let baseliner = FleetBaseliner::new(&settings());
        let mut members: Vec<FeatureVector> = (0..15).map(|i| feature(&format!("m{i}"), 0.92)).collect();
        members.push(feature("outlier", 0.50));

        baseliner.compute_all_groups(&members);
        let group_key = FleetBaseliner::group_key(1, "S19", "v1", "unknown");
        let z = baseliner.compute_robust_z(0.50, &group_key, "hashrate_ratio");

        assert!(z < -3.0, "expected strongly negative robust z, got {z}");
    }

    #[test]
    fn cache_miss_returns_zero_not_error() {
        let baseliner = FleetBaseliner::new(&settings());
        let z = baseliner.compute_robust_z(1.0, "nonexistent:group:key", "hashrate_ratio");
        assert_eq!(z, 0.0);
    }

    #[test]
    fn group_key_omits_mode_when_unknown() {
        assert_eq!(FleetBaseliner::group_key(1, "S19", "v1", "unknown"), "1:S19:v1");
        assert_eq!(FleetBaseliner::group_key(1, "S19", "v1", ""), "1:S19:v1");
        assert_eq!(FleetBaseliner::group_key(1, "S19", "v1", "eco"), "1:S19:v1:eco");
    }
}
