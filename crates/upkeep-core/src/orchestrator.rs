//! ---
//! upkeep_section: "01-core-functionality"
//! upkeep_subsection: "module"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Update orchestration and lifecycle management."
//! upkeep_version: "v0.0.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};
use upkeep_common::config::UpdateConfig;
use upkeep_metrics::UpdaterMetrics;
use upkeep_rt::{DeadlineTimer, TimerHandle, DEFAULT_RESOLUTION};
use upkeep_versioning::{CheckOutcome, UpdateBackend};

use crate::error::{ApplyPhase, Result, UpdateError};
use crate::state::{UpdateSnapshot, UpdateStatus};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5_000);
const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Orchestrator tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub passive: bool,
    pub max_attempts: u32,
    pub poll_interval: Duration,
    pub timer_resolution: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            passive: false,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            poll_interval: DEFAULT_POLL_INTERVAL,
            timer_resolution: DEFAULT_RESOLUTION,
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &UpdateConfig) -> Self {
        Self {
            passive: config.passive,
            max_attempts: config.max_attempts,
            poll_interval: config.poll_interval,
            timer_resolution: config.timer_resolution,
        }
    }

    pub fn passive(mut self, passive: bool) -> Self {
        self.passive = passive;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Startup,
    Timer { fired_at: tokio::time::Instant },
    Manual,
}

impl Trigger {
    fn as_str(&self) -> &'static str {
        match self {
            Trigger::Startup => "startup",
            Trigger::Timer { .. } => "timer",
            Trigger::Manual => "manual",
        }
    }
}

struct Shared {
    backend: Arc<dyn UpdateBackend>,
    passive: AtomicBool,
    closed: AtomicBool,
    state: watch::Sender<UpdateSnapshot>,
    // Held for the whole duration of a check so overlapping requests queue.
    check_gate: tokio::sync::Mutex<()>,
    // Completion instant of the latest manual check; supersedes older timer fires.
    last_manual: Mutex<Option<tokio::time::Instant>>,
    metrics: Option<UpdaterMetrics>,
}

impl Shared {
    fn wants_check(&self) -> bool {
        let passive = self.passive.load(Ordering::SeqCst);
        self.state.borrow().wants_check(passive)
    }

    fn superseded(&self, trigger: Trigger) -> bool {
        match (trigger, *self.last_manual.lock()) {
            (Trigger::Timer { fired_at }, Some(manual)) => manual >= fired_at,
            _ => false,
        }
    }

    /// Evaluate the trigger predicate and check if it holds. Returns whether a
    /// check ran.
    async fn evaluate(&self, trigger: Trigger) -> bool {
        let _gate = self.check_gate.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        if self.superseded(trigger) {
            trace!("timer fire superseded by a manual re-check");
            return false;
        }
        if !self.wants_check() {
            trace!(trigger = trigger.as_str(), "update check not due");
            return false;
        }
        self.perform_check(trigger).await;
        true
    }

    /// Runs on its own task so dropping the caller's future never cuts a
    /// backend call short.
    async fn recheck(self: &Arc<Self>) {
        let shared = self.clone();
        let task = tokio::spawn(async move {
            let _gate = shared.check_gate.lock().await;
            shared.state.send_modify(UpdateSnapshot::arm_manual_recheck);
            if let Some(metrics) = &shared.metrics {
                metrics.set_retry_attempts(0);
            }
            shared.perform_check(Trigger::Manual).await;
            *shared.last_manual.lock() = Some(tokio::time::Instant::now());
        });
        if let Err(err) = task.await {
            error!(error = %err, "manual update check task failed");
        }
    }

    /// Sole writer of status and retry state. Caller holds the check gate.
    async fn perform_check(&self, trigger: Trigger) {
        debug!(trigger = trigger.as_str(), "checking for update");
        let started = Instant::now();
        let result = self
            .backend
            .check_for_update()
            .await
            .and_then(resolve_status);
        let elapsed = started.elapsed();
        let at = Utc::now();

        match result {
            Ok(status) => {
                let outcome = status.as_str();
                if let Some(manifest) = status.manifest() {
                    info!(
                        trigger = trigger.as_str(),
                        version = %manifest.version,
                        published_at = manifest.published_at.as_deref().unwrap_or("unknown"),
                        "update available"
                    );
                } else {
                    debug!(trigger = trigger.as_str(), "no update available");
                }
                self.state.send_modify(|snapshot| snapshot.record_success(status, at));
                if let Some(metrics) = &self.metrics {
                    metrics.record_check(outcome, elapsed, 0);
                }
            }
            Err(err) => {
                self.state.send_modify(|snapshot| snapshot.record_failure(at));
                let snapshot = self.state.borrow().clone();
                warn!(
                    trigger = trigger.as_str(),
                    error = %err,
                    attempts = snapshot.attempts(),
                    max_attempts = snapshot.retry.max_attempts(),
                    should_retry = snapshot.should_retry(),
                    "update check failed"
                );
                if snapshot.retry_exhausted() {
                    error!(
                        attempts = snapshot.attempts(),
                        "automatic update retries exhausted; waiting for manual re-check"
                    );
                }
                if let Some(metrics) = &self.metrics {
                    metrics.record_check("failed", elapsed, snapshot.attempts());
                }
            }
        }
    }
}

fn resolve_status(outcome: CheckOutcome) -> anyhow::Result<UpdateStatus> {
    match (outcome.should_update, outcome.manifest) {
        (true, Some(manifest)) => Ok(UpdateStatus::Available(manifest)),
        (true, None) => Err(anyhow!(
            "release source reported an update without a manifest"
        )),
        (false, _) => Ok(UpdateStatus::UpToDate),
    }
}

/// Drives update checks and the install-then-relaunch flow.
///
/// Must be started inside a tokio runtime. Dropping the orchestrator stops
/// all scheduled checks; a check already talking to the backend finishes and
/// its result is still recorded.
pub struct UpdateOrchestrator {
    shared: Arc<Shared>,
    timer: DeadlineTimer,
}

impl UpdateOrchestrator {
    /// Start polling and run the startup trigger.
    pub fn start(
        settings: OrchestratorSettings,
        backend: Arc<dyn UpdateBackend>,
        metrics: Option<UpdaterMetrics>,
    ) -> Self {
        let (state, _) = watch::channel(UpdateSnapshot::new(settings.max_attempts));
        let shared = Arc::new(Shared {
            backend,
            passive: AtomicBool::new(settings.passive),
            closed: AtomicBool::new(false),
            state,
            check_gate: tokio::sync::Mutex::new(()),
            last_manual: Mutex::new(None),
            metrics,
        });

        // The sender lives in the timer callback, so tearing the timer down
        // ends the poll loop once its current evaluation is done.
        let (fire_tx, fire_rx) = mpsc::unbounded_channel();
        let timer = DeadlineTimer::spawn(
            settings.poll_interval,
            settings.timer_resolution,
            move || {
                let _ = fire_tx.send(tokio::time::Instant::now());
            },
        );
        tokio::spawn(poll_loop(shared.clone(), fire_rx, timer.handle()));

        info!(
            passive = settings.passive,
            max_attempts = settings.max_attempts,
            poll_interval_ms = settings.poll_interval.as_millis() as u64,
            "update orchestrator started"
        );

        let orchestrator = Self { shared, timer };
        orchestrator.spawn_startup_trigger();
        orchestrator
    }

    fn spawn_startup_trigger(&self) {
        let shared = self.shared.clone();
        tokio::spawn(async move { shared.evaluate(Trigger::Startup).await });
    }

    /// Current read model.
    pub fn snapshot(&self) -> UpdateSnapshot {
        self.shared.state.borrow().clone()
    }

    /// Observe every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<UpdateSnapshot> {
        self.shared.state.subscribe()
    }

    pub fn is_passive(&self) -> bool {
        self.shared.passive.load(Ordering::SeqCst)
    }

    /// Whether the poll timer is armed.
    pub fn is_polling(&self) -> bool {
        self.timer.is_enabled()
    }

    /// Switch modes. Leaving passive mode runs the startup trigger again.
    pub fn set_passive(&self, passive: bool) {
        let was_passive = self.shared.passive.swap(passive, Ordering::SeqCst);
        if was_passive && !passive && !self.shared.closed.load(Ordering::SeqCst) {
            info!("update orchestrator entering active mode");
            self.spawn_startup_trigger();
        }
    }

    /// Reset retry bookkeeping and check now, regardless of mode. Waits for
    /// any check already in flight first.
    pub async fn recheck(&self) -> UpdateSnapshot {
        info!("manual update re-check requested");
        self.timer.reset();
        self.shared.recheck().await;
        self.snapshot()
    }

    /// Install the available update and relaunch. Never returns on success.
    ///
    /// Runs on its own task so dropping the returned future does not cancel
    /// an install that has already begun.
    pub async fn apply_update_and_restart(&self) -> Result<Infallible> {
        let shared = self.shared.clone();
        let task = tokio::spawn(async move { install_and_relaunch(shared).await });
        match task.await {
            Ok(result) => result,
            Err(join_err) => Err(UpdateError::install_failed(
                ApplyPhase::Install,
                anyhow::Error::new(join_err),
            )),
        }
    }

    /// Stop the timer so no further checks are scheduled. A check already
    /// in flight runs to completion and publishes its result.
    pub fn shutdown(&mut self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.timer.shutdown();
        debug!("update orchestrator shut down");
    }
}

impl Drop for UpdateOrchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for UpdateOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateOrchestrator")
            .field("passive", &self.is_passive())
            .field("snapshot", &self.snapshot())
            .finish_non_exhaustive()
    }
}

async fn poll_loop(
    shared: Arc<Shared>,
    mut fires: mpsc::UnboundedReceiver<tokio::time::Instant>,
    timer: TimerHandle,
) {
    while let Some(fired_at) = fires.recv().await {
        shared.evaluate(Trigger::Timer { fired_at }).await;
        if shared.closed.load(Ordering::SeqCst) {
            break;
        }
        timer.set_enabled(true);
    }
}

async fn install_and_relaunch(shared: Arc<Shared>) -> Result<Infallible> {
    info!("installing update");
    if let Err(err) = shared.backend.install_update().await {
        error!(error = %err, "update install failed");
        if let Some(metrics) = &shared.metrics {
            metrics.record_install("failure");
        }
        return Err(UpdateError::install_failed(ApplyPhase::Install, err));
    }
    if let Some(metrics) = &shared.metrics {
        metrics.record_install("success");
    }
    info!("update installed; relaunching");
    match shared.backend.relaunch_process().await {
        Ok(never) => match never {},
        Err(err) => {
            error!(error = %err, "relaunch after update failed");
            Err(UpdateError::install_failed(ApplyPhase::Relaunch, err))
        }
    }
}
