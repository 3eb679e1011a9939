//! FHPEP - Fleet Health & Problem Event Pipeline
//!
//! Telemetry-driven anomaly detection and event lifecycle engine for a
//! fleet of mining machines. Ticks every `CYCLE_INTERVAL_SECONDS` (default
//! 300s), guarded by a distributed scheduler lock so only one instance in
//! the cluster runs a cycle body at a time.
//!
//! # Usage
//!
//! ```bash
//! DATABASE_URL=postgres://localhost/fhpep fhpep migrate
//! DATABASE_URL=postgres://localhost/fhpep fhpep run --telemetry-path ./telemetry.jsonl
//! DATABASE_URL=postgres://localhost/fhpep fhpep run-once
//! ```
//!
//! # Environment Variables
//!
//! See `src/config/defaults.rs` for the full list of tunables; `DATABASE_URL`
//! is the only one without a default.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

use fhpep::config::Settings;
use fhpep::db;
use fhpep::orchestrator::telemetry_source::JsonlTelemetrySource;
use fhpep::orchestrator::FeatureStoreJob;

#[derive(Parser, Debug)]
#[command(name = "fhpep")]
#[command(about = "Fleet Health & Problem Event Pipeline")]
#[command(version)]
struct CliArgs {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pipeline continuously, ticking every `CYCLE_INTERVAL_SECONDS`.
    Run {
        /// Path to a newline-delimited JSON telemetry file, drained each cycle.
        #[arg(long, default_value = "./telemetry.jsonl")]
        telemetry_path: String,

        /// Directory ML model blobs are written to / loaded from.
        #[arg(long, default_value = "./data/models")]
        model_blob_dir: String,
    },
    /// Run exactly one cycle and exit, for cron-external scheduling or
    /// scripted testing.
    RunOnce {
        #[arg(long, default_value = "./telemetry.jsonl")]
        telemetry_path: String,

        #[arg(long, default_value = "./data/models")]
        model_blob_dir: String,
    },
    /// Apply schema migrations and exit.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    let settings = Settings::from_env().context("failed to load configuration")?;

    info!(holder_id = %settings.holder_id, "starting fleet health pipeline");

    let pool = db::create_pool(&settings.database_url)
        .await
        .context("failed to create database pool")?;
    db::run_migrations(&pool)
        .await
        .context("failed to run migrations")?;

    match args.command {
        Command::Migrate => {
            info!("migrations applied, exiting");
            Ok(())
        }
        Command::RunOnce { telemetry_path, model_blob_dir } => {
            let telemetry_source = Arc::new(JsonlTelemetrySource::new(telemetry_path));
            let mut job = FeatureStoreJob::new(pool, settings, telemetry_source, model_blob_dir);
            job.run_cycle().await.context("cycle failed")?;
            info!("single cycle complete, exiting");
            Ok(())
        }
        Command::Run { telemetry_path, model_blob_dir } => {
            let cycle_interval = settings.cycle_interval_seconds;
            let telemetry_source = Arc::new(JsonlTelemetrySource::new(telemetry_path));
            let mut job = FeatureStoreJob::new(pool, settings, telemetry_source, model_blob_dir);

            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(cycle_interval));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(err) = job.run_cycle().await {
                            error!(error = %err, "cycle failed, will retry next tick");
                        }
                    }
                    _ = signal::ctrl_c() => {
                        info!("received shutdown signal, exiting after current tick");
                        break;
                    }
                }
            }

            Ok(())
        }
    }
}
