//! Per-component error types.
//!
//! Each engine owns a narrow `thiserror` enum so callers can match on
//! recovery semantics explicitly instead of unwinding. `OrchestratorError`
//! aggregates all of them for the cycle boundary in [`crate::orchestrator`].

use thiserror::Error;

/// A telemetry record failed basic schema validation (missing `miner_id`
/// or `site_id`). Recovery: skip the record, log once, continue the batch.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("telemetry record missing miner_id")]
    MissingMinerId,
    #[error("telemetry record missing site_id")]
    MissingSiteId,
}

/// BaselineService upsert failure. Recovery: rollback the per-miner change,
/// the rest of the batch continues.
#[derive(Debug, Error)]
pub enum BaselineError {
    #[error("database error updating baseline for miner {miner_id}: {source}")]
    Database {
        miner_id: String,
        #[source]
        source: sqlx::Error,
    },
}

/// ModeInferer clustering failure or degenerate result. Recovery: mark all
/// group members `unknown`.
#[derive(Debug, Error)]
pub enum ClusteringError {
    #[error("k-means failed to converge for group {group_key}")]
    FailedToConverge { group_key: String },
    #[error("group {group_key} has no members with valid features")]
    NoValidMembers { group_key: String },
}

/// FleetBaseliner cache miss for a requested group. Recovery: return
/// `robust_z = 0` and an empty peer block; never fail rule evaluation.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("no cached peer metrics for group {group_key}")]
    CacheMiss { group_key: String },
}

/// EventEngine write-path failure. `Race` is the dedup_key uniqueness
/// violation: recover by re-reading the active event and applying as an
/// update rather than an insert.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("dedup_key {dedup_key} raced on insert")]
    Race { dedup_key: String },
    #[error("database error processing event for {dedup_key}: {source}")]
    Database {
        dedup_key: String,
        #[source]
        source: sqlx::Error,
    },
}

/// PolicyEngine dispatch failure. `OutboxUnavailable` must never drop a
/// P0/P1 notification silently; callers fall back to logging at WARN.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("event_outbox table unavailable: {source}")]
    OutboxUnavailable {
        #[source]
        source: sqlx::Error,
    },
}

/// WeakSupervisor failure. `ModelLoad` degrades to p_fail_24h = 0.0 for the
/// whole batch rather than failing the cycle.
#[derive(Debug, Error)]
pub enum MlError {
    #[error("model blob missing or corrupt for {model_name} v{version}: {reason}")]
    ModelLoad {
        model_name: String,
        version: String,
        reason: String,
    },
    #[error("database error in model registry: {0}")]
    Database(#[from] sqlx::Error),
}

/// Distributed scheduler lock failure. `Lost` is fatal to the current
/// cycle: any pending commits must be abandoned, not flushed.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock {lock_key} is currently held by another worker")]
    AlreadyHeld { lock_key: String },
    #[error("lock {lock_key} was lost (lease expired before release)")]
    Lost { lock_key: String },
    #[error("database error acquiring lock {lock_key}: {source}")]
    Database {
        lock_key: String,
        #[source]
        source: sqlx::Error,
    },
}

/// Top-level error crossing the orchestrator boundary into `main`.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("failed to acquire scheduler lock")]
    Lock(#[from] LockError),
    #[error("lock lost mid-cycle, aborting without commit")]
    LockLost,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Event(#[from] EventError),
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Ml(#[from] MlError),
}
