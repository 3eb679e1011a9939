//! ML Model Registry — one row per trained model version (§3.8).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Feature names the classifier is trained/predicted on. Baseline values
/// only — never event-window data, to avoid time leakage (§4.7).
pub const FEATURE_NAMES: [&str; 9] = [
    "hashrate_ratio_ewma",
    "hashrate_ratio_variance",
    "boards_ratio_ewma",
    "boards_ratio_variance",
    "temp_max_ewma",
    "temp_max_variance",
    "efficiency_ewma",
    "efficiency_variance",
    "mode_encoded",
];

/// Encodes `inferred_mode` as a numeric feature: unknown/absent -> -1.
pub fn encode_mode(mode: &str) -> f64 {
    match mode {
        "eco" => 0.0,
        "normal" => 1.0,
        "perf" => 2.0,
        _ => -1.0,
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ModelRegistryEntry {
    pub model_name: String,
    pub version: String,
    pub model_type: String,
    pub metrics_json: serde_json::Value,
    pub blob_path: String,
    pub is_active: bool,
    pub trained_at: DateTime<Utc>,
    pub sample_count: i64,
    pub feature_names: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub sample_count: usize,
    pub positive_count: usize,
    pub negative_count: usize,
    pub auc: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub scale_pos_weight: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeatureImportance {
    pub name: String,
    pub importance: f64,
}

/// Per-miner prediction result (§4.7 `predict`).
#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub p_fail_24h: f64,
    pub top_features: Vec<FeatureImportance>,
    pub model_version: String,
}

/// Status returned from `WeakSupervisor::train` describing whether
/// training actually ran.
#[derive(Debug, Clone, PartialEq)]
pub enum TrainOutcome {
    Success(TrainingMetrics, String),
    InsufficientData { sample_count: usize, positive_count: usize },
}
