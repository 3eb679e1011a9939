//! Raw SQL for `problem_events`. Every write either inserts a brand-new
//! row or updates by `id`; the unique partial index on `dedup_key` for
//! active statuses is what turns a racing insert into a constraint
//! violation the caller retries as an update (§5).

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::types::ProblemEvent;

const COLUMNS: &str = "id, dedup_key, site_id, miner_id, issue_code, severity, status, \
    start_ts, last_seen_ts, resolved_ts, recurrence_count, consecutive_fail, consecutive_ok, \
    evidence_json, peer_metrics_json, ml_json, suppress_until, maintenance_flag";

pub async fn get_active(pool: &PgPool, dedup_key: &str) -> Result<Option<ProblemEvent>, sqlx::Error> {
    let query = format!(
        "SELECT {COLUMNS} FROM problem_events WHERE dedup_key = $1 \
         AND status IN ('ack', 'open', 'in_progress')"
    );
    sqlx::query_as::<_, ProblemEvent>(&query)
        .bind(dedup_key)
        .fetch_optional(pool)
        .await
}

pub async fn get_resolved_within_cooldown(
    pool: &PgPool,
    dedup_key: &str,
    cutoff: DateTime<Utc>,
) -> Result<Option<ProblemEvent>, sqlx::Error> {
    let query = format!(
        "SELECT {COLUMNS} FROM problem_events WHERE dedup_key = $1 \
         AND status = 'resolved' AND resolved_ts > $2 \
         ORDER BY resolved_ts DESC LIMIT 1"
    );
    sqlx::query_as::<_, ProblemEvent>(&query)
        .bind(dedup_key)
        .bind(cutoff)
        .fetch_optional(pool)
        .await
}

/// Any row for this miner with an active maintenance flag or unexpired
/// suppression window, regardless of issue_code or status.
pub async fn miner_is_suppressed(
    pool: &PgPool,
    miner_id: &str,
    now: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let row: Option<(bool,)> = sqlx::query_as(
        "SELECT true FROM problem_events WHERE miner_id = $1 \
         AND (maintenance_flag = true OR suppress_until > $2) LIMIT 1",
    )
    .bind(miner_id)
    .bind(now)
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some())
}

#[allow(clippy::too_many_arguments)]
pub async fn insert_new(
    pool: &PgPool,
    id: Uuid,
    dedup_key: &str,
    site_id: i64,
    miner_id: &str,
    issue_code: &str,
    severity: &str,
    status: &str,
    now: DateTime<Utc>,
    evidence_json: serde_json::Value,
    peer_metrics_json: Option<serde_json::Value>,
    ml_json: Option<serde_json::Value>,
) -> Result<ProblemEvent, sqlx::Error> {
    let query = format!(
        "INSERT INTO problem_events \
         (id, dedup_key, site_id, miner_id, issue_code, severity, status, start_ts, \
          last_seen_ts, recurrence_count, consecutive_fail, consecutive_ok, evidence_json, \
          peer_metrics_json, ml_json, maintenance_flag) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8, 0, 1, 0, $9, $10, $11, false) \
         RETURNING {COLUMNS}"
    );
    sqlx::query_as::<_, ProblemEvent>(&query)
        .bind(id)
        .bind(dedup_key)
        .bind(site_id)
        .bind(miner_id)
        .bind(issue_code)
        .bind(severity)
        .bind(status)
        .bind(now)
        .bind(evidence_json)
        .bind(peer_metrics_json)
        .bind(ml_json)
        .fetch_one(pool)
        .await
}

#[allow(clippy::too_many_arguments)]
pub async fn update_active(
    pool: &PgPool,
    id: Uuid,
    severity: &str,
    status: &str,
    consecutive_fail: i32,
    consecutive_ok: i32,
    last_seen_ts: DateTime<Utc>,
    evidence_json: serde_json::Value,
    peer_metrics_json: Option<serde_json::Value>,
    ml_json: Option<serde_json::Value>,
) -> Result<ProblemEvent, sqlx::Error> {
    let query = format!(
        "UPDATE problem_events SET severity = $2, status = $3, consecutive_fail = $4, \
         consecutive_ok = $5, last_seen_ts = $6, evidence_json = $7, \
         peer_metrics_json = COALESCE($8, peer_metrics_json), \
         ml_json = COALESCE($9, ml_json) \
         WHERE id = $1 RETURNING {COLUMNS}"
    );
    sqlx::query_as::<_, ProblemEvent>(&query)
        .bind(id)
        .bind(severity)
        .bind(status)
        .bind(consecutive_fail)
        .bind(consecutive_ok)
        .bind(last_seen_ts)
        .bind(evidence_json)
        .bind(peer_metrics_json)
        .bind(ml_json)
        .fetch_one(pool)
        .await
}

/// Bump the pending-reopen counter on a resolved-within-cooldown row
/// without changing its status (used while gating reopen eligibility).
pub async fn bump_resolved_counter(
    pool: &PgPool,
    id: Uuid,
    consecutive_fail: i32,
) -> Result<ProblemEvent, sqlx::Error> {
    let query = format!(
        "UPDATE problem_events SET consecutive_fail = $2 WHERE id = $1 RETURNING {COLUMNS}"
    );
    sqlx::query_as::<_, ProblemEvent>(&query)
        .bind(id)
        .bind(consecutive_fail)
        .fetch_one(pool)
        .await
}

#[allow(clippy::too_many_arguments)]
pub async fn reopen(
    pool: &PgPool,
    id: Uuid,
    severity: &str,
    recurrence_count: i32,
    last_seen_ts: DateTime<Utc>,
    evidence_json: serde_json::Value,
    peer_metrics_json: Option<serde_json::Value>,
    ml_json: Option<serde_json::Value>,
) -> Result<ProblemEvent, sqlx::Error> {
    let query = format!(
        "UPDATE problem_events SET status = 'open', resolved_ts = NULL, \
         consecutive_fail = 1, consecutive_ok = 0, recurrence_count = $3, \
         severity = $2, last_seen_ts = $4, evidence_json = $5, \
         peer_metrics_json = $6, ml_json = $7 \
         WHERE id = $1 RETURNING {COLUMNS}"
    );
    sqlx::query_as::<_, ProblemEvent>(&query)
        .bind(id)
        .bind(severity)
        .bind(recurrence_count)
        .bind(last_seen_ts)
        .bind(evidence_json)
        .bind(peer_metrics_json)
        .bind(ml_json)
        .fetch_one(pool)
        .await
}

pub async fn resolve(pool: &PgPool, id: Uuid, resolved_ts: DateTime<Utc>) -> Result<ProblemEvent, sqlx::Error> {
    let query = format!(
        "UPDATE problem_events SET status = 'resolved', resolved_ts = $2, consecutive_fail = 0 \
         WHERE id = $1 RETURNING {COLUMNS}"
    );
    sqlx::query_as::<_, ProblemEvent>(&query)
        .bind(id)
        .bind(resolved_ts)
        .fetch_one(pool)
        .await
}

pub async fn update_resolving(
    pool: &PgPool,
    id: Uuid,
    consecutive_ok: i32,
    last_seen_ts: DateTime<Utc>,
) -> Result<ProblemEvent, sqlx::Error> {
    let query = format!(
        "UPDATE problem_events SET consecutive_ok = $2, consecutive_fail = 0, last_seen_ts = $3 \
         WHERE id = $1 RETURNING {COLUMNS}"
    );
    sqlx::query_as::<_, ProblemEvent>(&query)
        .bind(id)
        .bind(consecutive_ok)
        .bind(last_seen_ts)
        .fetch_one(pool)
        .await
}

pub async fn suppress_miner(
    pool: &PgPool,
    miner_id: &str,
    until: Option<DateTime<Utc>>,
    maintenance: bool,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE problem_events SET suppress_until = $2, maintenance_flag = $3 WHERE miner_id = $1",
    )
    .bind(miner_id)
    .bind(until)
    .bind(maintenance)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn unsuppress_miner(pool: &PgPool, miner_id: &str) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE problem_events SET suppress_until = NULL, maintenance_flag = false WHERE miner_id = $1",
    )
    .bind(miner_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Worst severity first: severities are stored as `P0`..`P3` text, so
/// ascending lexicographic order already matches descending rank order.
pub async fn get_active_for_site(pool: &PgPool, site_id: i64) -> Result<Vec<ProblemEvent>, sqlx::Error> {
    let query = format!(
        "SELECT {COLUMNS} FROM problem_events WHERE site_id = $1 \
         AND status IN ('ack', 'open', 'in_progress') ORDER BY severity ASC, start_ts ASC"
    );
    sqlx::query_as::<_, ProblemEvent>(&query)
        .bind(site_id)
        .fetch_all(pool)
        .await
}

/// `23505` is Postgres's unique_violation SQLSTATE.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505"))
}
