//! Named default values for every tunable knob in the pipeline.
//!
//! Grouped by subsystem, mirroring the reference crate's flat
//! `pub const` layout. [`crate::config::Settings::from_env`] overrides any
//! of these from the environment variable named after the constant.

// ==================== EventEngine lifecycle ====================

/// Consecutive detections required before an event flips `ack` -> `open`.
pub const DEBOUNCE_THRESHOLD: i32 = 2;
/// Consecutive healthy signals required to resolve an active event.
pub const RESOLVE_THRESHOLD: i32 = 3;
/// Hours after `resolved_ts` during which a new detection reopens the event.
pub const COOLDOWN_HOURS: i64 = 24;
/// Maximum number of evidence snapshots retained per event.
pub const EVIDENCE_MAX: usize = 100;

// ==================== BaselineService EWMA ====================

/// EWMA span in samples; alpha = 2 / (span + 1). 12 samples ~= 1 hour
/// at a 5-minute telemetry cadence.
pub const EWMA_SPAN: f64 = 12.0;
/// Minimum sample_count before cold-start-gated soft rules may fire.
pub const SOFT_RULE_MIN_SAMPLES: i64 = 6;

// ==================== FleetBaseliner cache ====================

/// Peer group cache entry lifetime, in seconds.
pub const FLEET_CACHE_TTL_SECONDS: i64 = 300;
/// MAD-to-sigma consistency constant for the normal distribution.
pub const MAD_CONSISTENCY_CONSTANT: f64 = 1.4826;

// ==================== PolicyEngine budget ====================

/// Maximum notifications dispatched per site per cycle.
pub const MAX_NOTIFICATIONS_PER_CYCLE: usize = 20;
/// Maximum tickets created per site per cycle.
pub const MAX_TICKETS_PER_CYCLE: usize = 5;
/// Minutes an event must stay open before P2 duration-gated dispatch fires.
pub const P2_DURATION_GATE_MINUTES: i64 = 30;
/// p_fail_24h threshold above which a P2 event is ticket-eligible.
pub const P2_PFAIL_TICKET_THRESHOLD: f64 = 0.5;

// ==================== WeakSupervisor training ====================

/// Minimum total samples required to attempt training.
pub const MIN_TRAIN_SAMPLES: usize = 50;
/// Minimum positive-labeled samples required to attempt training.
pub const MIN_POSITIVE_LABELS: usize = 5;
/// Cycles between retraining attempts; 288 * 5min = 24h, matching the
/// label window training draws from.
pub const ML_RETRAIN_INTERVAL_CYCLES: u64 = 288;

// ==================== Orchestrator / scheduler lock ====================

/// Lock lease duration, in seconds, before it is considered expired.
pub const SCHEDULER_LOCK_TIMEOUT_SECONDS: i64 = 300;
/// Heartbeat interval for renewing the lock lease mid-cycle, in seconds.
pub const SCHEDULER_HEARTBEAT_SECONDS: u64 = 60;
/// Default cycle cadence for the `run` daemon loop, in seconds.
pub const CYCLE_INTERVAL_SECONDS: u64 = 300;

// ==================== ModeInferer clustering ====================

/// Peer groups smaller than this get `unknown` mode with confidence 0.
pub const MIN_GROUP_SIZE_FOR_CLUSTERING: usize = 5;
/// Upper bound on k for the k-means pass.
pub const MAX_CLUSTERS: usize = 3;
/// Fixed seed for deterministic k-means (spec requires stable re-runs).
pub const KMEANS_SEED: u64 = 42;
/// Maximum Lloyd's-algorithm iterations before giving up on convergence.
pub const KMEANS_MAX_ITERATIONS: usize = 100;
