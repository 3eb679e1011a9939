//! In-memory peer group cache, TTL 300s, protected by a single mutex
//! (§4.3, §5). Reads return a snapshot copy so callers never hold the
//! lock while computing.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::config::defaults::MAD_CONSISTENCY_CONSTANT;

#[derive(Debug, Clone)]
pub struct MetricStats {
    pub median: f64,
    pub mad: f64,
    pub p10: f64,
    pub p25: f64,
    pub p75: f64,
    pub p90: f64,
    pub count: usize,
}

#[derive(Debug, Clone)]
pub struct CachedGroup {
    pub metrics: HashMap<String, MetricStats>,
    pub raw_values: HashMap<String, Vec<f64>>,
    pub computed_at: DateTime<Utc>,
}

pub struct PeerCache {
    ttl_seconds: i64,
    cache: Mutex<HashMap<String, CachedGroup>>,
}

impl PeerCache {
    pub fn new(ttl_seconds: i64) -> Self {
        Self {
            ttl_seconds,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn is_valid(&self, entry: &CachedGroup, now: DateTime<Utc>) -> bool {
        (now - entry.computed_at).num_seconds() < self.ttl_seconds
    }

    pub fn insert(&self, group_key: String, entry: CachedGroup) {
        let mut guard = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        guard.insert(group_key, entry);
    }

    /// Returns a cloned snapshot of the cached group's metrics, or `None`
    /// if missing/expired (evicting it if expired).
    pub fn get(&self, group_key: &str, now: DateTime<Utc>) -> Option<CachedGroup> {
        let mut guard = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        let valid = guard.get(group_key).map(|e| self.is_valid(e, now)).unwrap_or(false);
        if valid {
            guard.get(group_key).cloned()
        } else {
            guard.remove(group_key);
            None
        }
    }

    pub fn invalidate(&self, group_key: Option<&str>) {
        let mut guard = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        match group_key {
            Some(key) => {
                guard.remove(key);
            }
            None => guard.clear(),
        }
    }
}

pub fn compute_median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Linear-interpolation percentile, matching numpy's default
/// `np.percentile` method (the original source's implementation).
pub fn percentile(sorted: &[f64], pct: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n == 1 {
        return sorted[0];
    }
    let rank = (pct / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let frac = rank - lower as f64;
        sorted[lower] + (sorted[upper] - sorted[lower]) * frac
    }
}

pub fn compute_mad(values: &[f64], median: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut deviations: Vec<f64> = values.iter().map(|v| (v - median).abs()).collect();
    deviations.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    compute_median(&deviations)
}

pub fn robust_z(value: f64, median: f64, mad: f64) -> f64 {
    if mad == 0.0 {
        0.0
    } else {
        (value - median) / (mad * MAD_CONSISTENCY_CONSTANT)
    }
}

pub fn percentile_rank(value: f64, values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let count_lte = values.iter().filter(|&&v| v <= value).count();
    (count_lte as f64 / values.len() as f64) * 100.0
}
