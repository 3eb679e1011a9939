//! Gradient-boosted tree classifier wrapping the `gbdt` crate (§4.7). No
//! gradient-boosting crate appeared anywhere in scope for this pipeline's
//! existing stack, so this is the one subsystem pulling in a dependency
//! the rest of the codebase doesn't otherwise need.

use gbdt::config::Config;
use gbdt::decision_tree::{Data, DataVec};
use gbdt::gradient_boost::GBDT;

use crate::types::{FeatureImportance, TrainingMetrics, FEATURE_NAMES};

use super::labels::LabeledSample;

pub const MODEL_NAME: &str = "p_fail_24h";
pub const MODEL_TYPE: &str = "gbdt";

const MAX_DEPTH: u32 = 4;
const ITERATIONS: usize = 100;
const SHRINKAGE: f32 = 0.1;
const DATA_SAMPLE_RATIO: f64 = 0.8;
const FEATURE_SAMPLE_RATIO: f64 = 0.8;

fn build_config(feature_size: usize, positives: usize, negatives: usize) -> Config {
    let mut config = Config::new();
    config.set_feature_size(feature_size);
    config.set_max_depth(MAX_DEPTH);
    config.set_iterations(ITERATIONS);
    config.set_shrinkage(SHRINKAGE);
    config.set_loss("LogLikelyhood");
    config.set_debug(false);
    config.set_data_sample_ratio(DATA_SAMPLE_RATIO);
    config.set_feature_sample_ratio(FEATURE_SAMPLE_RATIO);
    let _ = (positives, negatives); // scale_pos_weight is applied via per-sample weight below
    config
}

fn to_train_data(samples: &[LabeledSample], pos_weight: f64) -> DataVec {
    samples
        .iter()
        .map(|s| {
            let feature: Vec<f32> = s.features.iter().map(|v| *v as f32).collect();
            let label = s.label as f32;
            let weight = if s.label == 1 { pos_weight as f32 } else { 1.0 };
            Data::new_training_data(feature, weight, label, None)
        })
        .collect()
}

fn to_test_data(features: &[f64]) -> DataVec {
    let feature: Vec<f32> = features.iter().map(|v| *v as f32).collect();
    vec![Data::new_test_data(feature, None)]
}

/// Train on `samples`, returning the fitted model and the training-set
/// metrics recorded alongside the registry row.
pub fn train(samples: &[LabeledSample]) -> (GBDT, TrainingMetrics) {
    let positive_count = samples.iter().filter(|s| s.label == 1).count();
    let negative_count = samples.len() - positive_count;
    let scale_pos_weight = if positive_count > 0 {
        negative_count as f64 / positive_count as f64
    } else {
        1.0
    };

    let feature_size = FEATURE_NAMES.len();
    let config = build_config(feature_size, positive_count, negative_count);
    let mut train_data = to_train_data(samples, scale_pos_weight);

    let mut model = GBDT::new(&config);
    model.fit(&mut train_data);

    let predictions = model.predict(&train_data);
    let labels: Vec<f32> = samples.iter().map(|s| s.label as f32).collect();
    let metrics = score(&predictions, &labels, positive_count, negative_count, scale_pos_weight);

    (model, metrics)
}

/// Predict `p_fail_24h` for a single feature vector, 0 when missing
/// values are filled with 0 upstream already.
pub fn predict_one(model: &GBDT, features: &[f64]) -> f64 {
    let test_data = to_test_data(features);
    model
        .predict(&test_data)
        .first()
        .copied()
        .map(|v| v.clamp(0.0, 1.0) as f64)
        .unwrap_or(0.0)
}

/// Top-3 feature importances by absolute correlation with the predicted
/// score across the training batch — a model-agnostic stand-in for the
/// tree ensemble's internal split-gain importances.
pub fn top_features(samples: &[LabeledSample], predictions: &[f64]) -> Vec<FeatureImportance> {
    let n = samples.len() as f64;
    if n == 0.0 {
        return Vec::new();
    }
    let mean_pred = predictions.iter().sum::<f64>() / n;

    let mut scored: Vec<(usize, f64)> = (0..FEATURE_NAMES.len())
        .map(|idx| {
            let values: Vec<f64> = samples.iter().map(|s| s.features[idx]).collect();
            let mean_feat = values.iter().sum::<f64>() / n;
            let cov: f64 = values
                .iter()
                .zip(predictions.iter())
                .map(|(x, y)| (x - mean_feat) * (y - mean_pred))
                .sum::<f64>()
                / n;
            (idx, cov.abs())
        })
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    scored
        .into_iter()
        .take(3)
        .map(|(idx, importance)| FeatureImportance {
            name: FEATURE_NAMES[idx].to_string(),
            importance,
        })
        .collect()
}

fn score(
    predictions: &[f32],
    labels: &[f32],
    positive_count: usize,
    negative_count: usize,
    scale_pos_weight: f64,
) -> TrainingMetrics {
    let threshold = 0.5_f32;
    let mut tp = 0usize;
    let mut fp = 0usize;
    let mut fn_ = 0usize;
    let mut tn = 0usize;

    for (&p, &y) in predictions.iter().zip(labels.iter()) {
        let predicted_positive = p >= threshold;
        let actual_positive = y >= 0.5;
        match (predicted_positive, actual_positive) {
            (true, true) => tp += 1,
            (true, false) => fp += 1,
            (false, true) => fn_ += 1,
            (false, false) => tn += 1,
        }
    }

    let precision = if tp + fp > 0 { tp as f64 / (tp + fp) as f64 } else { 0.0 };
    let recall = if tp + fn_ > 0 { tp as f64 / (tp + fn_) as f64 } else { 0.0 };
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };
    let auc = auc_roc(predictions, labels);
    let _ = tn;

    TrainingMetrics {
        sample_count: predictions.len(),
        positive_count,
        negative_count,
        auc,
        precision,
        recall,
        f1,
        scale_pos_weight,
    }
}

/// Mann-Whitney U formulation of AUC: fraction of positive/negative pairs
/// correctly ordered.
fn auc_roc(predictions: &[f32], labels: &[f32]) -> f64 {
    let positives: Vec<f32> = predictions
        .iter()
        .zip(labels.iter())
        .filter(|(_, &y)| y >= 0.5)
        .map(|(&p, _)| p)
        .collect();
    let negatives: Vec<f32> = predictions
        .iter()
        .zip(labels.iter())
        .filter(|(_, &y)| y < 0.5)
        .map(|(&p, _)| p)
        .collect();

    if positives.is_empty() || negatives.is_empty() {
        return 0.5;
    }

    let mut concordant = 0.0;
    let mut total = 0.0;
    for &p in &positives {
        for &n in &negatives {
            total += 1.0;
            if p > n {
                concordant += 1.0;
            } else if (p - n).abs() < f32::EPSILON {
                concordant += 0.5;
            }
        }
    }
    concordant / total
}
