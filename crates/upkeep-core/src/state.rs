//! ---
//! upkeep_section: "01-core-functionality"
//! upkeep_subsection: "module"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Update orchestration and lifecycle management."
//! upkeep_version: "v0.0.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use upkeep_versioning::Manifest;

/// Result of the most recent update check.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum UpdateStatus {
    /// No check has completed yet.
    #[default]
    Unresolved,
    /// Last check succeeded and nothing newer is published.
    UpToDate,
    /// Last check succeeded and found a newer release.
    Available(Manifest),
    /// Last check raised an error.
    Failed,
}

impl UpdateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateStatus::Unresolved => "unresolved",
            UpdateStatus::UpToDate => "up_to_date",
            UpdateStatus::Available(_) => "available",
            UpdateStatus::Failed => "failed",
        }
    }

    pub fn manifest(&self) -> Option<&Manifest> {
        match self {
            UpdateStatus::Available(manifest) => Some(manifest),
            _ => None,
        }
    }
}

/// Consecutive-failure bookkeeping for automatic retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    attempts: u32,
    max_attempts: u32,
    should_retry: bool,
}

impl RetryState {
    /// `max_attempts` is clamped to at least one.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempts: 0,
            max_attempts: max_attempts.max(1),
            should_retry: false,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn should_retry(&self) -> bool {
        self.should_retry
    }

    /// A retry sequence is in progress and has budget left.
    pub fn is_pending(&self) -> bool {
        self.should_retry && self.attempts < self.max_attempts
    }

    fn record_success(&mut self) {
        self.attempts = 0;
        self.should_retry = false;
    }

    fn record_failure(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
        self.should_retry = self.attempts < self.max_attempts;
    }

    fn arm_manual(&mut self) {
        self.attempts = 0;
        self.should_retry = true;
    }
}

/// Read model published after every completed check.
///
/// Status and retry bookkeeping always travel together, so an observer never
/// sees a `Failed` status paired with a stale attempt count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSnapshot {
    pub status: UpdateStatus,
    pub retry: RetryState,
    /// When the last check completed.
    pub checked_at: Option<DateTime<Utc>>,
    /// Number of checks completed over the orchestrator's lifetime.
    pub checks_completed: u64,
}

impl UpdateSnapshot {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            status: UpdateStatus::Unresolved,
            retry: RetryState::new(max_attempts),
            checked_at: None,
            checks_completed: 0,
        }
    }

    pub fn manifest(&self) -> Option<&Manifest> {
        self.status.manifest()
    }

    pub fn has_check_failed(&self) -> bool {
        matches!(self.status, UpdateStatus::Failed)
    }

    /// `None` until a check succeeds, and again after a failure.
    pub fn should_update(&self) -> Option<bool> {
        match self.status {
            UpdateStatus::UpToDate => Some(false),
            UpdateStatus::Available(_) => Some(true),
            UpdateStatus::Unresolved | UpdateStatus::Failed => None,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.retry.attempts()
    }

    pub fn should_retry(&self) -> bool {
        self.retry.should_retry()
    }

    /// Automatic recovery gave up; only a manual re-check resumes checking.
    pub fn retry_exhausted(&self) -> bool {
        self.has_check_failed() && !self.retry.should_retry()
    }

    /// Trigger predicate shared by startup and every timer fire.
    pub fn wants_check(&self, passive: bool) -> bool {
        self.retry.is_pending() || (!passive && !self.retry_exhausted())
    }

    pub(crate) fn record_success(&mut self, status: UpdateStatus, at: DateTime<Utc>) {
        debug_assert!(!matches!(
            status,
            UpdateStatus::Failed | UpdateStatus::Unresolved
        ));
        self.status = status;
        self.retry.record_success();
        self.complete(at);
    }

    pub(crate) fn record_failure(&mut self, at: DateTime<Utc>) {
        self.status = UpdateStatus::Failed;
        self.retry.record_failure();
        self.complete(at);
    }

    pub(crate) fn arm_manual_recheck(&mut self) {
        self.retry.arm_manual();
    }

    fn complete(&mut self, at: DateTime<Utc>) {
        self.checked_at = Some(at);
        self.checks_completed += 1;
    }
}
