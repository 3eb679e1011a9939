//! Telemetry ingestion (the device-side agent protocol, §6.3) is out of
//! scope for this pipeline; the orchestrator only needs *a* supplier of
//! normalized records with age bounded by the cycle window. `TelemetrySource`
//! is that seam, injected so step 2 of the cycle doesn't hard-code where
//! records come from.

use async_trait::async_trait;
use chrono::Duration;

use crate::types::TelemetryRecord;

#[async_trait]
pub trait TelemetrySource: Send + Sync {
    async fn fetch_latest(&self, cycle_window: Duration) -> anyhow::Result<Vec<TelemetryRecord>>;
}

/// Reads newline-delimited JSON telemetry records from a file, the
/// simplest standing-in supplier for local runs and `run-once` scripted
/// testing. A real deployment's agent-facing ingestion process would
/// populate this file (or an equivalent queue) outside the pipeline core.
pub struct JsonlTelemetrySource {
    path: String,
}

impl JsonlTelemetrySource {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TelemetrySource for JsonlTelemetrySource {
    async fn fetch_latest(&self, _cycle_window: Duration) -> anyhow::Result<Vec<TelemetryRecord>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut records = Vec::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            records.push(serde_json::from_str::<TelemetryRecord>(line)?);
        }
        Ok(records)
    }
}
