//! Connection pool + migration runner.
//!
//! Grounded on the reference crate's hub pool constructor: a bounded
//! `PgPoolOptions` with a connect timeout, plus `sqlx::migrate!` over a
//! fixed `migrations/` directory checked into the repo.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

/// Build the shared connection pool. 20 connections is enough headroom
/// for one orchestrator cycle's per-miner batch work plus any concurrent
/// read-only query callers.
pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await
}

/// Apply pending migrations. Safe to call on every startup; `sqlx::migrate!`
/// is a no-op once the schema is current.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
