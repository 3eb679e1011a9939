//! Raw SQL for `miner_baseline_state`, upsert-only per the shared-resource
//! policy (§5): `(miner_id, metric_name)` is the only write path.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::types::BaselineState;

pub async fn get(
    pool: &PgPool,
    miner_id: &str,
    metric_name: &str,
) -> Result<Option<BaselineState>, sqlx::Error> {
    sqlx::query_as::<_, BaselineState>(
        "SELECT miner_id, site_id, metric_name, ewma_value, ewma_variance, sample_count, \
         last_raw_value, last_residual, inferred_mode, mode_confidence, updated_at \
         FROM miner_baseline_state WHERE miner_id = $1 AND metric_name = $2",
    )
    .bind(miner_id)
    .bind(metric_name)
    .fetch_optional(pool)
    .await
}

pub async fn get_all_for_miner(
    pool: &PgPool,
    miner_id: &str,
) -> Result<Vec<BaselineState>, sqlx::Error> {
    sqlx::query_as::<_, BaselineState>(
        "SELECT miner_id, site_id, metric_name, ewma_value, ewma_variance, sample_count, \
         last_raw_value, last_residual, inferred_mode, mode_confidence, updated_at \
         FROM miner_baseline_state WHERE miner_id = $1",
    )
    .bind(miner_id)
    .fetch_all(pool)
    .await
}

pub async fn get_all(pool: &PgPool) -> Result<Vec<BaselineState>, sqlx::Error> {
    sqlx::query_as::<_, BaselineState>(
        "SELECT miner_id, site_id, metric_name, ewma_value, ewma_variance, sample_count, \
         last_raw_value, last_residual, inferred_mode, mode_confidence, updated_at \
         FROM miner_baseline_state",
    )
    .fetch_all(pool)
    .await
}

#[allow(clippy::too_many_arguments)]
pub async fn upsert(
    pool: &PgPool,
    miner_id: &str,
    site_id: i64,
    metric_name: &str,
    ewma_value: f64,
    ewma_variance: f64,
    sample_count: i64,
    last_raw_value: f64,
    last_residual: f64,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO miner_baseline_state \
         (miner_id, site_id, metric_name, ewma_value, ewma_variance, sample_count, \
          last_raw_value, last_residual, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
         ON CONFLICT (miner_id, metric_name) DO UPDATE SET \
           site_id = EXCLUDED.site_id, \
           ewma_value = EXCLUDED.ewma_value, \
           ewma_variance = EXCLUDED.ewma_variance, \
           sample_count = EXCLUDED.sample_count, \
           last_raw_value = EXCLUDED.last_raw_value, \
           last_residual = EXCLUDED.last_residual, \
           updated_at = EXCLUDED.updated_at",
    )
    .bind(miner_id)
    .bind(site_id)
    .bind(metric_name)
    .bind(ewma_value)
    .bind(ewma_variance)
    .bind(sample_count)
    .bind(last_raw_value)
    .bind(last_residual)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn update_mode(
    pool: &PgPool,
    miner_id: &str,
    inferred_mode: &str,
    mode_confidence: f64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE miner_baseline_state SET inferred_mode = $2, mode_confidence = $3 \
         WHERE miner_id = $1",
    )
    .bind(miner_id)
    .bind(inferred_mode)
    .bind(mode_confidence)
    .execute(pool)
    .await?;
    Ok(())
}
