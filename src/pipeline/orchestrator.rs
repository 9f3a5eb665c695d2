//! Fleet-wide provisioning run.
//!
//! Every device gets its own worker task. A worker walks its device through
//! the L3 and BGP stages strictly in order and never lets an error escape:
//! whatever happens ends in a terminal `DeviceState`. Results are written
//! back once every worker has finished.

use anyhow::Context;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::executor::apply_stage;
use super::parsers::{find_rejection, parse_show_interfaces};
use super::report::RunReport;
use super::retry::{RetryPolicy, Sleeper, TokioSleeper};
use super::state::{DeviceRun, DeviceState, IllegalTransition};
use super::validator::Validator;
use crate::error::IntentError;
use crate::models::{Device, FailureReason, Intent, StageKind, StageOutcome};
use crate::render::{ConfigRenderer, RenderedConfig};
use crate::session::{DeviceSession, SessionPool};
use crate::store::IntentStore;
use crate::utils::is_valid_hostname;

const SAVE_COMMAND: &str = "write memory";
/// Read back after BGP converges; feeds promotion
const SHOW_INTERFACES_DETAIL: &str = "show interfaces";

/// Run-wide pipeline knobs
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub l3_policy: RetryPolicy,
    pub bgp_policy: RetryPolicy,
    /// Upper bound for apply + validate of a single stage
    pub stage_budget: Duration,
    /// Persist running-config on devices that reach BgpReady
    pub save_config: bool,
    /// Where rendered configs are written; `None` disables artifacts
    pub configs_dir: Option<PathBuf>,
    /// Promote BgpReady devices in the source-of-truth
    pub promote: bool,
}

impl PipelineSettings {
    fn policy(&self, stage: StageKind) -> &RetryPolicy {
        match stage {
            StageKind::L3 => &self.l3_policy,
            StageKind::Bgp => &self.bgp_policy,
        }
    }
}

pub struct Orchestrator {
    store: Arc<dyn IntentStore>,
    renderer: Arc<ConfigRenderer>,
    pool: SessionPool,
    sleeper: Arc<dyn Sleeper>,
    settings: Arc<PipelineSettings>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn IntentStore>,
        renderer: Arc<ConfigRenderer>,
        pool: SessionPool,
        settings: PipelineSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            renderer,
            pool,
            sleeper: Arc::new(TokioSleeper),
            settings: Arc::new(settings),
            cancel,
        }
    }

    #[cfg(test)]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Provision every selected device. Only inventory loading errors are
    /// returned; per-device problems end up in the report.
    pub async fn run(&self) -> anyhow::Result<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = chrono::Utc::now();

        let devices = self
            .store
            .list_devices()
            .await
            .context("Failed to load device inventory")?;
        if devices.is_empty() {
            anyhow::bail!("No devices selected for provisioning");
        }
        let names: Vec<&str> = devices.iter().map(|d| d.name.as_str()).collect();
        tracing::info!("Run {} starting for {} devices: {}", run_id, devices.len(), names.join(", "));

        let mut tasks = JoinSet::new();
        for device in devices {
            let worker = self.worker();
            let span = tracing::info_span!("device", name = %device.name);
            tasks.spawn(worker.run(device).instrument(span));
        }

        let mut runs = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(run) => runs.push(run),
                Err(e) => tracing::error!("Device task did not complete: {}", e),
            }
        }
        runs.sort_by(|a, b| a.device.name.cmp(&b.device.name));

        for run in &runs {
            self.write_back(run_id, run).await;
        }

        Ok(RunReport::new(run_id, started_at, runs))
    }

    fn worker(&self) -> DeviceWorker {
        DeviceWorker {
            store: self.store.clone(),
            renderer: self.renderer.clone(),
            pool: self.pool.clone(),
            validator: Arc::new(Validator::new(self.sleeper.clone(), self.cancel.clone())),
            settings: self.settings.clone(),
            cancel: self.cancel.clone(),
        }
    }

    /// Persist results, status and promotion. Store errors are logged and
    /// never change the in-memory outcome.
    async fn write_back(&self, run_id: Uuid, run: &DeviceRun) {
        let device = &run.device;
        debug_assert!(
            *run.state() != DeviceState::BgpReady || run.passed_through(&DeviceState::L3Ready),
            "{} reached bgp_ready without l3_ready",
            device.name
        );
        for result in run.results() {
            let record = result.to_record(&device.name);
            if let Err(e) = self.store.write_result(run_id, device, &record).await {
                tracing::warn!("{}: failed to write {} result: {}", device.name, result.stage, e);
            }
        }

        let status = run.state().status();
        if let Err(e) = self.store.write_status(device, status).await {
            tracing::warn!("{}: failed to write status {}: {}", device.name, status, e);
        }

        if !self.settings.promote || *run.state() != DeviceState::BgpReady {
            return;
        }
        if let Some(intent) = &run.intent {
            match self.store.promote(device, intent, &run.observed).await {
                Ok(()) => tracing::info!("{}: promoted to production", device.name),
                Err(e) => tracing::error!("{}: promotion failed: {}", device.name, e),
            }
        }
    }
}

/// Everything one device's worker needs; cheap to clone per device
#[derive(Clone)]
struct DeviceWorker {
    store: Arc<dyn IntentStore>,
    renderer: Arc<ConfigRenderer>,
    pool: SessionPool,
    validator: Arc<Validator>,
    settings: Arc<PipelineSettings>,
    cancel: CancellationToken,
}

impl DeviceWorker {
    /// Drive one device to a terminal state. A panic inside the pipeline
    /// fails the device in the stage it was in, keeping what it recorded.
    async fn run(self, device: Device) -> DeviceRun {
        let mut run = DeviceRun::new(device);
        let outcome = AssertUnwindSafe(self.drive(&mut run)).catch_unwind().await;
        if outcome.is_err() {
            tracing::error!("Device worker panicked in state {}", run.state().name());
            run.abandon(FailureReason::Internal("device worker panicked".to_string()));
        }
        run
    }

    async fn drive(&self, run: &mut DeviceRun) {
        let Some((intent, config)) = self.prepare(run).await else {
            return;
        };
        run.intent = Some(intent.clone());

        let checkout = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            checkout = self.pool.checkout(&run.device) => Some(checkout),
        };
        let mut session = match checkout {
            None => {
                run.fail(StageKind::L3, FailureReason::Cancelled);
                return;
            }
            Some(Err(e)) => {
                run.fail(StageKind::L3, FailureReason::Apply(e.to_string()));
                return;
            }
            Some(Ok(session)) => session,
        };

        let mut connected = false;
        for stage in StageKind::ALL {
            let budget = self.settings.stage_budget;
            let outcome = tokio::time::timeout(
                budget,
                self.run_stage(&mut *session, run, stage, config.for_stage(stage), &intent, &mut connected),
            )
            .await;

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!("{}", e);
                    run.fail(stage, FailureReason::Internal(e.to_string()));
                }
                Err(_) => run.fail(
                    stage,
                    FailureReason::StageBudgetExceeded(format!("{} stage exceeded {:?}", stage, budget)),
                ),
            }

            if *run.state() != DeviceState::ready(stage) {
                break;
            }
        }

        if connected {
            self.finish_session(&mut *session, run).await;
        }
    }

    /// Fetch intent and render both stages. Failures here happen before the
    /// device is contacted.
    async fn prepare(&self, run: &mut DeviceRun) -> Option<(Intent, RenderedConfig)> {
        if self.cancel.is_cancelled() {
            run.fail(StageKind::L3, FailureReason::Cancelled);
            return None;
        }

        let intent = match self.store.fetch_intent(&run.device).await {
            Ok(intent) => intent,
            Err(IntentError::Malformed { reason, .. }) => {
                run.fail(StageKind::L3, FailureReason::MalformedIntent(reason));
                return None;
            }
            Err(e) => {
                run.fail(StageKind::L3, FailureReason::IntentUnavailable(e.to_string()));
                return None;
            }
        };

        let config = match self.renderer.render(&intent) {
            Ok(config) => config,
            Err(e) => {
                run.fail(StageKind::L3, FailureReason::Render(e.to_string()));
                return None;
            }
        };

        self.write_artifacts(&run.device.name, &config).await;
        Some((intent, config))
    }

    async fn write_artifacts(&self, name: &str, config: &RenderedConfig) {
        let Some(dir) = &self.settings.configs_dir else { return };
        if !is_valid_hostname(name) {
            tracing::warn!("Not writing config artifacts for unsafe device name {:?}", name);
            return;
        }
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            tracing::warn!("Failed to create {}: {}", dir.display(), e);
            return;
        }
        for (suffix, text) in [("intf", &config.interfaces), ("bgp", &config.bgp)] {
            let path = dir.join(format!("{}_{}.txt", name, suffix));
            match tokio::fs::write(&path, text).await {
                Ok(()) => tracing::debug!("Wrote {}", path.display()),
                Err(e) => tracing::warn!("Failed to write {}: {}", path.display(), e),
            }
        }
    }

    /// Apply then validate one stage. Returns an error only for illegal
    /// transitions; every device-level problem is recorded on `run`.
    async fn run_stage(
        &self,
        session: &mut dyn DeviceSession,
        run: &mut DeviceRun,
        stage: StageKind,
        config: &str,
        intent: &Intent,
        connected: &mut bool,
    ) -> Result<(), IllegalTransition> {
        run.advance(DeviceState::applying(stage))?;

        if self.cancel.is_cancelled() {
            run.fail(stage, FailureReason::Cancelled);
            return Ok(());
        }

        if !*connected {
            if let Err(e) = session.connect().await {
                run.fail(stage, FailureReason::Apply(e.to_string()));
                return Ok(());
            }
            *connected = true;
        }

        match apply_stage(session, stage, config).await {
            Ok(transcript) => tracing::debug!("{} push transcript:\n{}", stage, transcript),
            Err(e) => {
                run.fail(stage, FailureReason::Apply(e.to_string()));
                return Ok(());
            }
        }

        run.advance(DeviceState::validating(stage))?;
        let result = self
            .validator
            .validate(session, stage, intent, self.settings.policy(stage))
            .await;

        if result.is_success() {
            run.record(result);
            return run.advance(DeviceState::ready(stage));
        }

        let detail = result.evidence.lines().collect::<Vec<_>>().join("; ");
        let reason = if self.cancel.is_cancelled() {
            FailureReason::Cancelled
        } else if result.outcome == StageOutcome::Timeout {
            FailureReason::ValidationTimeout(detail)
        } else {
            FailureReason::ValidationFailure(detail)
        };
        run.fail_with(stage, reason, result);
        Ok(())
    }

    /// Read back and save fully validated devices, then close
    async fn finish_session(&self, session: &mut dyn DeviceSession, run: &mut DeviceRun) {
        if *run.state() == DeviceState::BgpReady {
            if self.settings.promote {
                match session.run_command(SHOW_INTERFACES_DETAIL).await {
                    Ok(output) => match find_rejection(&output) {
                        Some(line) => tracing::warn!("Could not read back interfaces: {}", line),
                        None => run.observed = parse_show_interfaces(&output),
                    },
                    Err(e) => tracing::warn!("Could not read back interfaces: {}", e),
                }
            }
            if self.settings.save_config {
                match session.run_command(SAVE_COMMAND).await {
                    Ok(output) => match find_rejection(&output) {
                        Some(line) => tracing::warn!("Device refused to save running config: {}", line),
                        None => {
                            run.saved = true;
                            tracing::info!("Running config saved");
                        }
                    },
                    Err(e) => tracing::warn!("Failed to save running config: {}", e),
                }
            }
        }
        if let Err(e) = session.close().await {
            tracing::warn!("Failed to close session: {}", e);
        }
    }
}
