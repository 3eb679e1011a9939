//! Per-Miner Baseline State — one row per (miner_id, metric_name),
//! holding EWMA and variance for incremental updates (§3.3).

use chrono::{DateTime, Utc};

/// The four metrics BaselineService tracks an EWMA for.
pub const TRACKED_METRICS: [&str; 4] =
    ["hashrate_ratio", "boards_ratio", "temp_max", "efficiency"];

/// One (miner, metric) baseline row. Never reads history beyond this row.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct BaselineState {
    pub miner_id: String,
    pub site_id: i64,
    pub metric_name: String,
    pub ewma_value: f64,
    pub ewma_variance: f64,
    pub sample_count: i64,
    pub last_raw_value: f64,
    pub last_residual: f64,
    pub inferred_mode: Option<String>,
    pub mode_confidence: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

impl BaselineState {
    /// Z-score of the current residual, or 0 when variance has not
    /// accumulated yet (matches the update formula's own guard).
    pub fn z_score(&self) -> f64 {
        if self.ewma_variance > 0.0 {
            self.last_residual / self.ewma_variance.sqrt()
        } else {
            0.0
        }
    }
}

/// Result of `BaselineService::update_baseline` for one metric: the fresh
/// numbers callers (RulesEngine, WeakSupervisor) consume directly without
/// re-reading the row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaselineUpdate {
    pub ewma: f64,
    pub residual: f64,
    pub z_score: f64,
    pub sample_count: i64,
}
