//! Weak-label construction: "did this miner have a P0/P1 event in the
//! last 24h" (§4.7). Features must reflect baseline state *before* that
//! window, never data generated inside it.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use sqlx::PgPool;

/// One training row: features keyed by name, label 0/1.
pub struct LabeledSample {
    pub miner_id: String,
    pub features: Vec<f64>,
    pub label: u8,
}

/// Miners with at least one P0/P1 `problem_events` row whose `start_ts`
/// falls within `(as_of - 24h, as_of]`.
pub async fn positive_miner_ids(
    pool: &PgPool,
    as_of: DateTime<Utc>,
) -> Result<HashSet<String>, sqlx::Error> {
    let cutoff = as_of - chrono::Duration::hours(24);
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT DISTINCT miner_id FROM problem_events \
         WHERE severity IN ('P0', 'P1') AND start_ts > $1 AND start_ts <= $2",
    )
    .bind(cutoff)
    .bind(as_of)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Assemble `(features, label)` pairs for every miner with baseline rows,
/// using `feature_vector_for` to turn a miner's baseline rows into the
/// fixed [`crate::types::FEATURE_NAMES`] ordering.
pub fn build_samples(
    baselines_by_miner: &HashMap<String, Vec<crate::types::BaselineState>>,
    positives: &HashSet<String>,
) -> Vec<LabeledSample> {
    baselines_by_miner
        .iter()
        .map(|(miner_id, rows)| {
            let features = super::feature_vector_from_baselines(rows);
            let label = if positives.contains(miner_id) { 1 } else { 0 };
            LabeledSample {
                miner_id: miner_id.clone(),
                features,
                label,
            }
        })
        .collect()
}
