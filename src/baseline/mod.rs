//! BaselineService — per-miner EWMA (§4.1).
//!
//! Maintains, for each (miner, metric) pair, an incrementally updated
//! exponentially weighted mean and variance. Never scans history: every
//! update reads only the current row.

pub mod repo;

use std::collections::HashMap;

use chrono::Utc;
use sqlx::PgPool;
use tracing::warn;

use crate::config::Settings;
use crate::error::{BaselineError, TelemetryError};
use crate::types::{BaselineUpdate, FeatureVector, TelemetryRecord, TRACKED_METRICS};

/// `extractFeatures` — applies the §3.2 definitions; every derived value
/// is either numerically valid or `None`.
pub struct FeatureExtractor;

impl FeatureExtractor {
    pub fn extract(record: &TelemetryRecord) -> Result<FeatureVector, TelemetryError> {
        record.validate()?;

        let hashrate_ratio = match (record.hashrate_current, record.hashrate_expected) {
            (Some(cur), Some(exp)) if exp > 0.0 => Some(cur / exp),
            _ => None,
        };

        let boards_ratio = match (record.boards_healthy, record.boards_total) {
            (Some(healthy), Some(total)) if total > 0 => Some(f64::from(healthy) / f64::from(total)),
            _ => None,
        };

        let temp_max = record.temperature_max;

        let efficiency = match (record.power_draw, record.hashrate_current) {
            (Some(power), Some(hr)) if hr > 0.0 => Some(power / hr),
            _ => None,
        };

        let fan_speed_min = record.fan_speeds.iter().copied().min();

        Ok(FeatureVector {
            miner_id: record.miner_id.clone(),
            site_id: record.site_id,
            model: record.model_or_unknown().to_string(),
            firmware: record.firmware_or_unknown().to_string(),
            is_online: record.is_online,
            hashrate_ratio,
            boards_ratio,
            temp_max,
            efficiency,
            fan_speed_min,
            fleet_z_hashrate: None,
            inferred_mode: "unknown".to_string(),
        })
    }
}

/// A present (metric_name, raw_value) pair extracted from a feature vector.
fn present_metrics(features: &FeatureVector) -> Vec<(&'static str, f64)> {
    let mut out = Vec::with_capacity(TRACKED_METRICS.len());
    if let Some(v) = features.hashrate_ratio {
        out.push(("hashrate_ratio", v));
    }
    if let Some(v) = features.boards_ratio {
        out.push(("boards_ratio", v));
    }
    if let Some(v) = features.temp_max {
        out.push(("temp_max", v));
    }
    if let Some(v) = features.efficiency {
        out.push(("efficiency", v));
    }
    out
}

pub struct BaselineService {
    pool: PgPool,
    ewma_span: f64,
}

impl BaselineService {
    pub fn new(pool: PgPool, settings: &Settings) -> Self {
        Self {
            pool,
            ewma_span: settings.ewma_span,
        }
    }

    fn alpha(&self) -> f64 {
        2.0 / (self.ewma_span + 1.0)
    }

    /// Pure EWMA/variance recursion, independent of storage — exposed so
    /// `updateBaseline`'s replay-equivalence property can be tested
    /// without a database.
    pub fn step(
        alpha: f64,
        raw: f64,
        prev_ewma: f64,
        prev_variance: f64,
        sample_count: i64,
    ) -> BaselineUpdate {
        if sample_count == 0 {
            return BaselineUpdate {
                ewma: raw,
                residual: 0.0,
                z_score: 0.0,
                sample_count: 1,
            };
        }
        let ewma_new = alpha * raw + (1.0 - alpha) * prev_ewma;
        let residual = raw - ewma_new;
        let variance_new = alpha * residual * residual + (1.0 - alpha) * prev_variance;
        let z_score = if variance_new > 0.0 {
            residual / variance_new.sqrt()
        } else {
            0.0
        };
        BaselineUpdate {
            ewma: ewma_new,
            residual,
            z_score,
            sample_count: sample_count + 1,
        }
    }

    /// `updateBaseline` — updates every present metric for one miner and
    /// returns the fresh per-metric results.
    pub async fn update_baseline(
        &self,
        miner_id: &str,
        site_id: i64,
        features: &FeatureVector,
    ) -> Result<HashMap<String, BaselineUpdate>, BaselineError> {
        let mut results = HashMap::new();
        let alpha = self.alpha();
        let now = Utc::now();

        for (metric_name, raw) in present_metrics(features) {
            let existing = repo::get(&self.pool, miner_id, metric_name)
                .await
                .map_err(|source| BaselineError::Database {
                    miner_id: miner_id.to_string(),
                    source,
                })?;

            let (prev_ewma, prev_variance, prev_count) = existing
                .as_ref()
                .map(|row| (row.ewma_value, row.ewma_variance, row.sample_count))
                .unwrap_or((0.0, 0.0, 0));

            let update = Self::step(alpha, raw, prev_ewma, prev_variance, prev_count);

            let variance_new = variance_from(alpha, update, prev_variance, prev_count);

            repo::upsert(
                &self.pool,
                miner_id,
                site_id,
                metric_name,
                update.ewma,
                variance_new,
                update.sample_count,
                raw,
                update.residual,
                now,
            )
            .await
            .map_err(|source| BaselineError::Database {
                miner_id: miner_id.to_string(),
                source,
            })?;

            results.insert(metric_name.to_string(), update);
        }

        Ok(results)
    }

    /// `bulkUpdate` — wraps a batch in a single transaction at the
    /// connection-pool level; per-miner failures are logged and skipped
    /// without aborting the rest of the batch.
    pub async fn bulk_update(
        &self,
        records: &[(String, i64, FeatureVector)],
    ) -> Result<usize, BaselineError> {
        let mut updated = 0usize;
        for (miner_id, site_id, features) in records {
            match self.update_baseline(miner_id, *site_id, features).await {
                Ok(_) => updated += 1,
                Err(err) => {
                    warn!(miner_id = %miner_id, error = %err, "baseline update failed, skipping miner");
                }
            }
        }
        Ok(updated)
    }

    pub async fn get_baselines(
        &self,
        miner_id: &str,
    ) -> Result<Vec<crate::types::BaselineState>, sqlx::Error> {
        repo::get_all_for_miner(&self.pool, miner_id).await
    }
}

/// Recompute `variance_new` directly (kept out of `step`'s public return
/// value since callers only need z_score/residual, but the persisted row
/// needs the raw variance too).
fn variance_from(alpha: f64, update: BaselineUpdate, prev_variance: f64, prev_count: i64) -> f64 {
    if prev_count == 0 {
        0.0
    } else {
        alpha * update.residual * update.residual + (1.0 - alpha) * prev_variance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cold_start_sets_ewma_to_raw_with_zero_variance() {
        let update = BaselineService::step(2.0 / 13.0, 42.0, 0.0, 0.0, 0);
        assert_eq!(update.ewma, 42.0);
        assert_eq!(update.residual, 0.0);
        assert_eq!(update.z_score, 0.0);
        assert_eq!(update.sample_count, 1);
    }

    #[test]
    fn ewma_matches_closed_form_recursion() {
        let alpha = 2.0 / 13.0;
        let samples = [1.0, 1.2, 0.9, 1.1, 1.05, 0.95, 1.3];

        let mut ewma = 0.0;
        let mut variance = 0.0;
        let mut count = 0i64;
        for &raw in &samples {
            let update = BaselineService::step(alpha, raw, ewma, variance, count);
            variance = variance_from(alpha, update, variance, count);
            ewma = update.ewma;
            count = update.sample_count;
        }

        // Closed-form replay: recompute independently and compare.
        let mut ref_ewma = 0.0;
        let mut ref_variance = 0.0;
        for (i, &raw) in samples.iter().enumerate() {
            if i == 0 {
                ref_ewma = raw;
                ref_variance = 0.0;
            } else {
                let residual = raw - (alpha * raw + (1.0 - alpha) * ref_ewma);
                let ewma_new = alpha * raw + (1.0 - alpha) * ref_ewma;
                ref_variance = alpha * residual * residual + (1.0 - alpha) * ref_variance;
                ref_ewma = ewma_new;
            }
        }

        assert!((ewma - ref_ewma).abs() < 1e-9);
        assert!((variance - ref_variance).abs() < 1e-9);
    }

    #[test]
    fn extract_features_leaves_undefined_ratios_absent() {
        let record = TelemetryRecord {
            miner_id: "m1".into(),
            site_id: 1,
            model: None,
            firmware: None,
            is_online: true,
            hashrate_current: Some(10.0),
            hashrate_expected: Some(0.0),
            boards_healthy: None,
            boards_total: None,
            temperature_max: Some(60.0),
            fan_speeds: vec![],
            power_draw: None,
        };
        let features = FeatureExtractor::extract(&record).unwrap();
        assert_eq!(features.hashrate_ratio, None);
        assert_eq!(features.boards_ratio, None);
        assert_eq!(features.temp_max, Some(60.0));
        assert_eq!(features.fan_speed_min, None);
    }
}
