//! Pipeline configuration.
//!
//! `Settings` is constructed once in `main` and threaded explicitly through
//! the orchestrator and every engine constructor. There is deliberately no
//! global/`OnceLock` config here: the pipeline tolerates multiple instances
//! running against the same database, coordinated only through the
//! scheduler lock, so a process-wide config singleton would be the wrong
//! shape.

pub mod defaults;

use std::env;

/// Typed, validated runtime configuration for one pipeline process.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,

    pub debounce_threshold: i32,
    pub resolve_threshold: i32,
    pub cooldown_hours: i64,
    pub evidence_max: usize,

    pub ewma_span: f64,
    pub soft_rule_min_samples: i64,

    pub fleet_cache_ttl_seconds: i64,

    pub max_notifications_per_cycle: usize,
    pub max_tickets_per_cycle: usize,
    pub p2_duration_gate_minutes: i64,
    pub p2_pfail_ticket_threshold: f64,

    pub min_train_samples: usize,
    pub min_positive_labels: usize,
    pub ml_retrain_interval_cycles: u64,

    pub scheduler_lock_timeout_seconds: i64,
    pub scheduler_heartbeat_seconds: u64,
    pub cycle_interval_seconds: u64,

    /// Identity recorded as `holder_id` when this process takes the
    /// scheduler lock; defaults to `hostname:pid`.
    pub holder_id: String,
}

impl Settings {
    /// Load configuration from the environment, falling back to
    /// [`defaults`] for anything unset. `DATABASE_URL` is the only
    /// required variable.
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

        Ok(Self {
            database_url,
            debounce_threshold: env_or("DEBOUNCE_THRESHOLD", defaults::DEBOUNCE_THRESHOLD),
            resolve_threshold: env_or("RESOLVE_THRESHOLD", defaults::RESOLVE_THRESHOLD),
            cooldown_hours: env_or("COOLDOWN_HOURS", defaults::COOLDOWN_HOURS),
            evidence_max: env_or("EVIDENCE_MAX", defaults::EVIDENCE_MAX as i64) as usize,

            ewma_span: env_or("EWMA_SPAN", defaults::EWMA_SPAN),
            soft_rule_min_samples: env_or(
                "SOFT_RULE_MIN_SAMPLES",
                defaults::SOFT_RULE_MIN_SAMPLES,
            ),

            fleet_cache_ttl_seconds: env_or(
                "FLEET_CACHE_TTL_SECONDS",
                defaults::FLEET_CACHE_TTL_SECONDS,
            ),

            max_notifications_per_cycle: env_or(
                "MAX_NOTIFICATIONS_PER_CYCLE",
                defaults::MAX_NOTIFICATIONS_PER_CYCLE as i64,
            ) as usize,
            max_tickets_per_cycle: env_or(
                "MAX_TICKETS_PER_CYCLE",
                defaults::MAX_TICKETS_PER_CYCLE as i64,
            ) as usize,
            p2_duration_gate_minutes: env_or(
                "P2_DURATION_GATE_MINUTES",
                defaults::P2_DURATION_GATE_MINUTES,
            ),
            p2_pfail_ticket_threshold: env_or(
                "P2_PFAIL_TICKET_THRESHOLD",
                defaults::P2_PFAIL_TICKET_THRESHOLD,
            ),

            min_train_samples: env_or(
                "MIN_TRAIN_SAMPLES",
                defaults::MIN_TRAIN_SAMPLES as i64,
            ) as usize,
            min_positive_labels: env_or(
                "MIN_POSITIVE_LABELS",
                defaults::MIN_POSITIVE_LABELS as i64,
            ) as usize,
            ml_retrain_interval_cycles: env_or(
                "ML_RETRAIN_INTERVAL_CYCLES",
                defaults::ML_RETRAIN_INTERVAL_CYCLES as i64,
            ) as u64,

            scheduler_lock_timeout_seconds: env_or(
                "SCHEDULER_LOCK_TIMEOUT_SECONDS",
                defaults::SCHEDULER_LOCK_TIMEOUT_SECONDS,
            ),
            scheduler_heartbeat_seconds: env_or(
                "SCHEDULER_HEARTBEAT_SECONDS",
                defaults::SCHEDULER_HEARTBEAT_SECONDS as i64,
            ) as u64,
            cycle_interval_seconds: env_or(
                "CYCLE_INTERVAL_SECONDS",
                defaults::CYCLE_INTERVAL_SECONDS as i64,
            ) as u64,

            holder_id: env::var("SCHEDULER_HOLDER_ID").unwrap_or_else(|_| default_holder_id()),
        })
    }
}

fn default_holder_id() -> String {
    let host = env::var("HOSTNAME").unwrap_or_else(|_| "unknown-host".to_string());
    format!("{host}:{}", std::process::id())
}

/// Parse an env var of any `FromStr` type, falling back to `default` when
/// unset or unparsable (a malformed override should not crash startup).
fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
