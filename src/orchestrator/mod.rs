//! FeatureStoreJob — the cron-triggered orchestrator (§4.8). Wires every
//! engine together for one 5-minute cycle: lock, fetch, extract, baseline,
//! mode, fleet, predict, rules, events, dispatch, release.

pub mod lock;
pub mod telemetry_source;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use tracing::{info, instrument, warn};

use crate::baseline::BaselineService;
use crate::config::Settings;
use crate::error::OrchestratorError;
use crate::events::{DetectionInput, EventEngine, HealthyInput};
use crate::fleet::FleetBaseliner;
use crate::ml::WeakSupervisor;
use crate::mode::ModeInferer;
use crate::policy::{EngineResult, PolicyEngine};
use crate::rules::RulesEngine;
use crate::types::{BaselineState, FeatureVector, Prediction};
use lock::SchedulerLock;
use telemetry_source::TelemetrySource;

pub struct FeatureStoreJob {
    pool: sqlx::PgPool,
    settings: Settings,
    telemetry_source: Arc<dyn TelemetrySource>,
    baseline_service: BaselineService,
    mode_inferer: ModeInferer,
    fleet_baseliner: FleetBaseliner,
    rules_engine: RulesEngine,
    event_engine: EventEngine,
    policy_engine: PolicyEngine,
    weak_supervisor: WeakSupervisor,
    cycle_count: u64,
}

impl FeatureStoreJob {
    pub fn new(pool: sqlx::PgPool, settings: Settings, telemetry_source: Arc<dyn TelemetrySource>, model_blob_dir: impl Into<String>) -> Self {
        let baseline_service = BaselineService::new(pool.clone(), &settings);
        let mode_inferer = ModeInferer::new(pool.clone(), &settings);
        let fleet_baseliner = FleetBaseliner::new(&settings);
        let rules_engine = RulesEngine::new(&settings);
        let event_engine = EventEngine::new(pool.clone(), &settings);
        let policy_engine = PolicyEngine::new(pool.clone(), &settings);
        let weak_supervisor = WeakSupervisor::new(pool.clone(), &settings, model_blob_dir);

        Self {
            pool,
            settings,
            telemetry_source,
            baseline_service,
            mode_inferer,
            fleet_baseliner,
            rules_engine,
            event_engine,
            policy_engine,
            weak_supervisor,
            cycle_count: 0,
        }
    }

    /// Run one full cycle. Returns `Ok(())` both when the cycle completed
    /// and when another instance already held the lock (§4.8 step 1: "if
    /// acquisition fails, return immediately").
    #[instrument(skip(self))]
    pub async fn run_cycle(&mut self) -> Result<(), OrchestratorError> {
        let mut lock = match SchedulerLock::acquire(
            self.pool.clone(),
            lock::FEATURE_STORE_JOB_KEY,
            &self.settings.holder_id,
            self.settings.scheduler_lock_timeout_seconds,
        )
        .await
        {
            Ok(lock) => lock,
            Err(crate::error::LockError::AlreadyHeld { lock_key }) => {
                info!(lock_key, "another instance holds the scheduler lock, skipping cycle");
                return Ok(());
            }
            Err(err) => return Err(OrchestratorError::Lock(err)),
        };

        let result = self.run_cycle_body(&mut lock).await;

        match &result {
            Ok(()) => {
                if let Err(err) = lock.release().await {
                    warn!(error = %err, "failed to release scheduler lock");
                }
            }
            Err(OrchestratorError::LockLost) => {
                warn!("lock lost mid-cycle, skipping release (another instance now owns it)");
            }
            Err(_) => {
                // best effort: release on any other failure so the next
                // tick isn't blocked by a stale lease unnecessarily
                let _ = lock.release().await;
            }
        }

        result
    }

    async fn run_cycle_body(&mut self, lock: &mut SchedulerLock) -> Result<(), OrchestratorError> {
        let this_cycle = self.cycle_count;
        self.cycle_count += 1;
        let cycle_window = Duration::seconds(self.settings.cycle_interval_seconds as i64);

        let telemetry = self
            .telemetry_source
            .fetch_latest(cycle_window)
            .await
            .unwrap_or_else(|err| {
                warn!(error = %err, "telemetry fetch failed, continuing with empty batch");
                Vec::new()
            });

        let mut features: Vec<FeatureVector> = Vec::with_capacity(telemetry.len());
        for record in &telemetry {
            match crate::baseline::FeatureExtractor::extract(record) {
                Ok(f) => features.push(f),
                Err(err) => warn!(miner_id = %record.miner_id, error = %err, "skipping record, feature extraction failed"),
            }
        }

        let records_for_baseline: Vec<(String, i64, FeatureVector)> = features
            .iter()
            .map(|f| (f.miner_id.clone(), f.site_id, f.clone()))
            .collect();
        self.baseline_service.bulk_update(&records_for_baseline).await.ok();

        if !lock.is_valid(chrono::Utc::now()) {
            return Err(OrchestratorError::LockLost);
        }
        lock.heartbeat().await?;

        self.mode_inferer
            .infer_modes(&mut features)
            .await
            .unwrap_or_default();

        self.fleet_baseliner.compute_all_groups(&features);
        for f in &mut features {
            if let Some(hashrate_ratio) = f.hashrate_ratio {
                let group_key = FleetBaseliner::group_key(f.site_id, &f.model, &f.firmware, &f.inferred_mode);
                f.fleet_z_hashrate = Some(
                    self.fleet_baseliner
                        .compute_robust_z(hashrate_ratio, &group_key, "hashrate_ratio"),
                );
            }
        }

        let fetches = features
            .iter()
            .map(|f| async { (f.miner_id.clone(), self.baseline_service.get_baselines(&f.miner_id).await) });
        let fetched = futures::future::join_all(fetches).await;
        let mut baselines_by_miner: HashMap<String, Vec<BaselineState>> = HashMap::new();
        for (miner_id, rows) in fetched {
            baselines_by_miner.insert(miner_id, rows.unwrap_or_default());
        }

        if !lock.is_valid(chrono::Utc::now()) {
            return Err(OrchestratorError::LockLost);
        }
        lock.heartbeat().await?;

        let predictions = self.weak_supervisor.predict(&baselines_by_miner).await;

        if this_cycle % self.settings.ml_retrain_interval_cycles.max(1) == 0 {
            match self.weak_supervisor.train(&baselines_by_miner).await {
                Ok(outcome) => info!(?outcome, "model training attempt complete"),
                Err(err) => warn!(error = %err, "model training failed, keeping previous active model"),
            }
        }

        let mut detections = Vec::new();
        let mut healthy = Vec::new();
        let mut prediction_by_miner: HashMap<String, Prediction> = predictions.clone();

        for f in &features {
            let baseline_map: HashMap<String, BaselineState> = baselines_by_miner
                .get(&f.miner_id)
                .map(|rows| rows.iter().map(|r| (r.metric_name.clone(), r.clone())).collect())
                .unwrap_or_default();

            let evaluation = self.rules_engine.evaluate_all(f, &baseline_map);
            let prediction = prediction_by_miner.get(&f.miner_id);
            let group_key = FleetBaseliner::group_key(f.site_id, &f.model, &f.firmware, &f.inferred_mode);
            let peer_metrics_json = serde_json::to_value(self.fleet_baseliner.build_peer_metrics(f, &group_key)).ok();
            let ml_json = prediction.and_then(|p| serde_json::to_value(p).ok());

            for d in evaluation.detections {
                detections.push(DetectionInput {
                    site_id: f.site_id,
                    miner_id: f.miner_id.clone(),
                    issue_code: d.issue_code,
                    severity: d.severity,
                    evidence: d.evidence,
                    peer_metrics: peer_metrics_json.clone(),
                    ml_data: ml_json.clone(),
                });
            }
            for code in evaluation.healthy_codes {
                healthy.push(HealthyInput {
                    site_id: f.site_id,
                    miner_id: f.miner_id.clone(),
                    issue_code: code,
                });
            }
        }

        let results = self.event_engine.bulk_process(detections, healthy).await;
        let tally = crate::events::EventEngine::summarize(&results);
        info!(
            created = tally.created,
            updated = tally.updated,
            escalated = tally.escalated,
            reopened = tally.reopened,
            resolved = tally.resolved,
            "cycle event processing complete"
        );

        let mut site_miner_counts: HashMap<i64, i64> = HashMap::new();
        for f in &features {
            *site_miner_counts.entry(f.site_id).or_insert(0) += 1;
        }

        let engine_results: Vec<EngineResult> = results
            .into_iter()
            .filter_map(|r| {
                let event = r.event?;
                let prediction = prediction_by_miner.remove(&event.miner_id);
                Some(EngineResult {
                    action: r.action,
                    event,
                    prediction,
                })
            })
            .collect();

        if !lock.is_valid(chrono::Utc::now()) {
            return Err(OrchestratorError::LockLost);
        }

        let dispatch_tally = self.policy_engine.evaluate_batch(engine_results, &site_miner_counts).await;
        info!(
            notifications_sent = dispatch_tally.notifications_sent,
            tickets_sent = dispatch_tally.tickets_sent,
            notifications_suppressed = dispatch_tally.notifications_suppressed,
            tickets_suppressed = dispatch_tally.tickets_suppressed,
            "cycle dispatch complete"
        );

        self.log_health_summary(&features, &prediction_by_miner, &site_miner_counts)
            .await;

        Ok(())
    }

    /// Builds a [`HealthObject`](crate::types::HealthObject) per miner seen
    /// this cycle and logs aggregate counts by `health_state` (§3.6). There
    /// is no query API in this pipeline's core, so this is the only place
    /// health objects are materialized; a read surface would serve them
    /// straight off `problem_events`/`ml_registry` rather than recomputing.
    async fn log_health_summary(
        &self,
        features: &[FeatureVector],
        prediction_by_miner: &HashMap<String, Prediction>,
        site_miner_counts: &HashMap<i64, i64>,
    ) {
        use crate::types::HealthObject;

        let mut state_counts: HashMap<String, u32> = HashMap::new();
        let now = chrono::Utc::now();

        for site_id in site_miner_counts.keys() {
            let active = match self.event_engine.get_active_events(*site_id).await {
                Ok(events) => events,
                Err(err) => {
                    warn!(site_id = *site_id, error = %err, "failed to fetch active events for health summary");
                    continue;
                }
            };

            let mut by_miner: HashMap<&str, Vec<&crate::types::ProblemEvent>> = HashMap::new();
            for event in &active {
                by_miner.entry(event.miner_id.as_str()).or_default().push(event);
            }

            for f in features.iter().filter(|f| f.site_id == *site_id) {
                let miner_events = by_miner.get(f.miner_id.as_str());
                let worst_active = miner_events
                    .and_then(|evs| evs.iter().map(|e| e.severity()).max());
                let issues: Vec<String> = miner_events
                    .map(|evs| evs.iter().map(|e| e.issue_code.clone()).collect())
                    .unwrap_or_default();
                let p_fail_24h = prediction_by_miner
                    .get(&f.miner_id)
                    .map(|p| p.p_fail_24h)
                    .unwrap_or(0.0);

                let health = HealthObject {
                    site_id: *site_id,
                    miner_id: f.miner_id.clone(),
                    health_state: HealthObject::compute_health_state(worst_active, p_fail_24h),
                    issues,
                    p_fail_24h,
                    last_seen_ts: now,
                    assessed_at: now,
                };
                *state_counts.entry(health.health_state.clone()).or_insert(0) += 1;
            }
        }

        info!(?state_counts, "cycle health summary");
    }
}
