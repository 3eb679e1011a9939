//! WeakSupervisor — periodically retrained failure-probability classifier
//! (§4.7). Training and prediction never touch the hot path: a missing or
//! stale model degrades to a flat `p_fail_24h = 0.0` rather than failing
//! the cycle.

pub mod classifier;
pub mod labels;
pub mod registry;

use std::collections::HashMap;
use std::fs;

use chrono::Utc;
use gbdt::gradient_boost::GBDT;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::config::Settings;
use crate::error::MlError;
use crate::types::{encode_mode, BaselineState, Prediction, TrainOutcome, FEATURE_NAMES, TRACKED_METRICS};

/// Turn one miner's baseline rows into the fixed [`FEATURE_NAMES`]
/// ordering, filling missing metrics with 0 (per the prediction
/// contract) and encoding `inferred_mode` numerically.
pub fn feature_vector_from_baselines(rows: &[BaselineState]) -> Vec<f64> {
    let mut by_metric: HashMap<&str, &BaselineState> = HashMap::new();
    let mut mode = "unknown".to_string();
    for row in rows {
        by_metric.insert(row.metric_name.as_str(), row);
        if let Some(m) = &row.inferred_mode {
            mode = m.clone();
        }
    }

    let mut out = Vec::with_capacity(FEATURE_NAMES.len());
    for metric in TRACKED_METRICS {
        let (ewma, variance) = by_metric
            .get(metric)
            .map(|r| (r.ewma_value, r.ewma_variance))
            .unwrap_or((0.0, 0.0));
        out.push(ewma);
        out.push(variance);
    }
    out.push(encode_mode(&mode));
    out
}

/// The Training gate: below either threshold, training is skipped and
/// `train` returns `InsufficientData` without touching the database or
/// the classifier. Pure so it's testable without a live model/pool.
fn training_gate(
    samples: &[labels::LabeledSample],
    min_train_samples: usize,
    min_positive_labels: usize,
) -> Option<TrainOutcome> {
    let sample_count = samples.len();
    let positive_count = samples.iter().filter(|s| s.label == 1).count();
    if sample_count < min_train_samples || positive_count < min_positive_labels {
        Some(TrainOutcome::InsufficientData { sample_count, positive_count })
    } else {
        None
    }
}

pub struct WeakSupervisor {
    pool: PgPool,
    blob_dir: String,
    min_train_samples: usize,
    min_positive_labels: usize,
    loaded: Option<(String, GBDT)>,
}

impl WeakSupervisor {
    pub fn new(pool: PgPool, settings: &Settings, blob_dir: impl Into<String>) -> Self {
        Self {
            pool,
            blob_dir: blob_dir.into(),
            min_train_samples: settings.min_train_samples,
            min_positive_labels: settings.min_positive_labels,
            loaded: None,
        }
    }

    /// `train` — builds weak labels from the current baseline snapshot and
    /// the last 24h of P0/P1 events, then fits a fresh model version.
    pub async fn train(
        &self,
        baselines_by_miner: &HashMap<String, Vec<BaselineState>>,
    ) -> Result<TrainOutcome, MlError> {
        let as_of = Utc::now();
        let positives = labels::positive_miner_ids(&self.pool, as_of)
            .await
            .map_err(MlError::Database)?;
        let samples = labels::build_samples(baselines_by_miner, &positives);

        if let Some(outcome) = training_gate(&samples, self.min_train_samples, self.min_positive_labels) {
            if let TrainOutcome::InsufficientData { sample_count, positive_count } = &outcome {
                info!(sample_count = *sample_count, positive_count = *positive_count, "skipping training, insufficient data");
            }
            return Ok(outcome);
        }

        let (model, metrics) = classifier::train(&samples);
        let version = as_of.format("%Y%m%d_%H%M%S").to_string();
        let blob_path = format!("{}/{}_{}.bin", self.blob_dir, classifier::MODEL_NAME, version);

        self.write_blob_atomic(&model, &blob_path)
            .map_err(|reason| MlError::ModelLoad {
                model_name: classifier::MODEL_NAME.to_string(),
                version: version.clone(),
                reason,
            })?;

        let metrics_json = serde_json::to_value(&metrics).unwrap_or_else(|_| serde_json::json!({}));
        let feature_names_json = serde_json::to_value(FEATURE_NAMES).unwrap_or_else(|_| serde_json::json!([]));

        registry::promote(
            &self.pool,
            classifier::MODEL_NAME,
            &version,
            classifier::MODEL_TYPE,
            metrics_json,
            &blob_path,
            as_of,
            samples.len() as i64,
            feature_names_json,
        )
        .await
        .map_err(MlError::Database)?;

        info!(version = %version, auc = metrics.auc, "trained new model version");
        Ok(TrainOutcome::Success(metrics, version))
    }

    fn write_blob_atomic(&self, model: &GBDT, path: &str) -> Result<(), String> {
        fs::create_dir_all(&self.blob_dir).map_err(|e| e.to_string())?;
        let tmp_path = format!("{path}.tmp");
        model.save_model(&tmp_path).map_err(|e| e.to_string())?;
        fs::rename(&tmp_path, path).map_err(|e| e.to_string())
    }

    /// `predict` — load the active model once and reuse it for the whole
    /// batch; returns the graceful-degradation prediction for everyone if
    /// no active model exists.
    pub async fn predict(
        &mut self,
        baselines_by_miner: &HashMap<String, Vec<BaselineState>>,
    ) -> HashMap<String, Prediction> {
        self.ensure_loaded().await;

        let Some((version, model)) = &self.loaded else {
            return baselines_by_miner
                .keys()
                .map(|miner_id| {
                    (
                        miner_id.clone(),
                        Prediction {
                            p_fail_24h: 0.0,
                            top_features: Vec::new(),
                            model_version: "none".to_string(),
                        },
                    )
                })
                .collect();
        };

        let samples: Vec<labels::LabeledSample> = baselines_by_miner
            .iter()
            .map(|(miner_id, rows)| labels::LabeledSample {
                miner_id: miner_id.clone(),
                features: feature_vector_from_baselines(rows),
                label: 0,
            })
            .collect();

        let predictions: Vec<f64> = samples
            .iter()
            .map(|s| classifier::predict_one(model, &s.features))
            .collect();

        let importances = classifier::top_features(&samples, &predictions);

        samples
            .iter()
            .zip(predictions.iter())
            .map(|(sample, &p_fail_24h)| {
                (
                    sample.miner_id.clone(),
                    Prediction {
                        p_fail_24h,
                        top_features: importances.clone(),
                        model_version: version.clone(),
                    },
                )
            })
            .collect()
    }

    async fn ensure_loaded(&mut self) {
        if self.loaded.is_some() {
            return;
        }
        match registry::get_active(&self.pool, classifier::MODEL_NAME).await {
            Ok(Some(entry)) => match GBDT::load_model(&entry.blob_path) {
                Ok(model) => self.loaded = Some((entry.version, model)),
                Err(err) => warn!(error = ?err, blob_path = %entry.blob_path, "failed to load active model blob"),
            },
            Ok(None) => {}
            Err(err) => warn!(error = %err, "failed to query active model registry row"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(label: u8) -> labels::LabeledSample {
        labels::LabeledSample {
            miner_id: "m1".to_string(),
            features: vec![0.0; FEATURE_NAMES.len()],
            label,
        }
    }

    fn samples_with(count: usize, label: u8) -> Vec<labels::LabeledSample> {
        (0..count).map(|_| sample(label)).collect()
    }

    #[test]
    fn training_gate_blocks_below_min_samples() {
        let samples = samples_with(10, 1);
        let outcome = training_gate(&samples, 50, 5);
        assert_eq!(
            outcome,
            Some(TrainOutcome::InsufficientData { sample_count: 10, positive_count: 10 })
        );
    }

    #[test]
    fn training_gate_blocks_below_min_positive_labels() {
        let mut samples = samples_with(48, 0);
        samples.extend(samples_with(2, 1));
        let outcome = training_gate(&samples, 50, 5);
        assert_eq!(
            outcome,
            Some(TrainOutcome::InsufficientData { sample_count: 50, positive_count: 2 })
        );
    }

    #[test]
    fn training_gate_passes_when_both_thresholds_met() {
        let mut samples = samples_with(45, 0);
        samples.extend(samples_with(5, 1));
        assert_eq!(training_gate(&samples, 50, 5), None);
    }

    #[test]
    fn feature_vector_fills_missing_metrics_with_zero_and_encodes_mode() {
        let rows = vec![BaselineState {
            miner_id: "m1".to_string(),
            site_id: 1,
            metric_name: "hashrate_ratio".to_string(),
            ewma_value: 0.95,
            ewma_variance: 0.01,
            sample_count: 20,
            last_raw_value: 0.95,
            last_residual: 0.0,
            inferred_mode: Some("eco".to_string()),
            mode_confidence: Some(0.9),
            updated_at: Utc::now(),
        }];

        let features = feature_vector_from_baselines(&rows);
        assert_eq!(features.len(), FEATURE_NAMES.len());
        assert_eq!(features[0], 0.95);
        assert_eq!(features[1], 0.01);
        let hashrate_idx = TRACKED_METRICS.iter().position(|&m| m == "boards_ratio").unwrap();
        assert_eq!(features[hashrate_idx * 2], 0.0);
    }
}
