//! `event_outbox` writes. An independent relay drains this table; the
//! pipeline's job ends at the insert.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::types::OutboxKind;

pub async fn insert(
    pool: &PgPool,
    id: Uuid,
    kind: OutboxKind,
    payload: serde_json::Value,
    created_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO event_outbox (id, kind, payload, created_at) VALUES ($1, $2, $3, $4)")
        .bind(id)
        .bind(kind.as_str())
        .bind(payload)
        .bind(created_at)
        .execute(pool)
        .await?;
    Ok(())
}
