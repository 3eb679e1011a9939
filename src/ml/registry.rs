//! `ml_model_registry` CRUD. Deactivate-then-insert keeps the partial
//! unique index on `is_active` satisfied across the version flip.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::types::ModelRegistryEntry;

pub async fn get_active(pool: &PgPool, model_name: &str) -> Result<Option<ModelRegistryEntry>, sqlx::Error> {
    sqlx::query_as::<_, ModelRegistryEntry>(
        "SELECT model_name, version, model_type, metrics_json, blob_path, is_active, \
         trained_at, sample_count, feature_names \
         FROM ml_model_registry WHERE model_name = $1 AND is_active = true",
    )
    .bind(model_name)
    .fetch_optional(pool)
    .await
}

/// Deactivate the current active row (if any) and insert the freshly
/// trained version as active, inside a transaction so no window exists
/// with zero or two active rows.
#[allow(clippy::too_many_arguments)]
pub async fn promote(
    pool: &PgPool,
    model_name: &str,
    version: &str,
    model_type: &str,
    metrics_json: serde_json::Value,
    blob_path: &str,
    trained_at: DateTime<Utc>,
    sample_count: i64,
    feature_names: serde_json::Value,
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query("UPDATE ml_model_registry SET is_active = false WHERE model_name = $1 AND is_active = true")
        .bind(model_name)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        "INSERT INTO ml_model_registry \
         (model_name, version, model_type, metrics_json, blob_path, is_active, trained_at, sample_count, feature_names) \
         VALUES ($1, $2, $3, $4, $5, true, $6, $7, $8)",
    )
    .bind(model_name)
    .bind(version)
    .bind(model_type)
    .bind(metrics_json)
    .bind(blob_path)
    .bind(trained_at)
    .bind(sample_count)
    .bind(feature_names)
    .execute(&mut *tx)
    .await?;

    tx.commit().await
}
