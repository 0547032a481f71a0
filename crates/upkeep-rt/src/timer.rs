//! ---
//! upkeep_section: "02-scheduling-runtime"
//! upkeep_subsection: "module"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Runtime helpers supporting the update orchestrator."
//! upkeep_version: "v0.0.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
//! One-shot deadline timer that must be explicitly re-armed after it fires.
//!
//! The timer polls a coarse clock (see [`DEFAULT_RESOLUTION`]) rather than
//! sleeping until the exact deadline, so a fire happens somewhere in
//! `(interval, interval + resolution]` after the timer was last armed. Firing
//! disables the timer; callers re-enable it through [`TimerHandle`] once they
//! have finished reacting to the fire.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;

use crate::scheduling::RateLimiter;

/// Polling resolution used when callers have no stronger requirement.
pub const DEFAULT_RESOLUTION: Duration = Duration::from_millis(50);

/// Pure timer state machine. [`DeadlineTimer`] drives it from a tick task.
#[derive(Debug, Clone)]
pub struct TimerState {
    enabled: bool,
    start_instant: Instant,
    interval: Duration,
    reset_requested: bool,
}

impl TimerState {
    /// Create an enabled timer whose countdown starts at `now`.
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            enabled: true,
            start_instant: now,
            interval,
            reset_requested: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn reset_requested(&self) -> bool {
        self.reset_requested
    }

    /// Instant at which the current countdown began.
    pub fn started_at(&self) -> Instant {
        self.start_instant
    }

    /// Arm or disarm. Arming restarts the countdown from zero; disarming
    /// leaves a pending reset in place.
    pub fn set_enabled(&mut self, enabled: bool, now: Instant) {
        if enabled == self.enabled {
            return;
        }
        self.enabled = enabled;
        if enabled {
            self.start_instant = now;
        }
    }

    /// Request a countdown restart on the next tick.
    pub fn request_reset(&mut self) {
        self.reset_requested = true;
    }

    /// Advance the state machine. Returns `true` when the caller must invoke
    /// the timer callback.
    pub fn tick(&mut self, now: Instant) -> bool {
        if !self.enabled {
            self.reset_requested = false;
            return false;
        }
        if self.reset_requested {
            self.reset_requested = false;
            self.start_instant = now;
            return false;
        }
        if now.saturating_duration_since(self.start_instant) > self.interval {
            self.start_instant = now;
            self.enabled = false;
            return true;
        }
        false
    }
}

/// Cloneable control surface shared between a [`DeadlineTimer`] and whoever
/// needs to re-arm it.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    state: Arc<Mutex<TimerState>>,
}

impl TimerHandle {
    fn new(interval: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(TimerState::new(interval, Instant::now()))),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.state.lock().set_enabled(enabled, Instant::now());
    }

    pub fn reset(&self) {
        self.state.lock().request_reset();
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().is_enabled()
    }

    pub fn interval(&self) -> Duration {
        self.state.lock().interval()
    }

    fn tick(&self, now: Instant) -> bool {
        self.state.lock().tick(now)
    }
}

/// Restartable one-shot alarm driven by a polling task on the current tokio
/// runtime. Dropping the timer cancels the task.
#[derive(Debug)]
pub struct DeadlineTimer {
    handle: TimerHandle,
    task: Option<JoinHandle<()>>,
}

impl DeadlineTimer {
    /// Start an enabled timer that invokes `callback` once `interval` has
    /// elapsed, checking every `resolution`.
    ///
    /// The callback runs on the tick task with no lock held, so it may use a
    /// [`TimerHandle`] to re-arm the timer. It must not block.
    pub fn spawn<F>(interval: Duration, resolution: Duration, callback: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let handle = TimerHandle::new(interval);
        let ticker = handle.clone();
        let task = tokio::spawn(async move {
            let mut callback = callback;
            let mut limiter = RateLimiter::new(resolution);
            loop {
                limiter.tick().await;
                if ticker.tick(Instant::now()) {
                    trace!(interval_ms = interval.as_millis() as u64, "deadline timer fired");
                    callback();
                }
            }
        });
        Self {
            handle,
            task: Some(task),
        }
    }

    /// Control handle for arming, disarming, and resetting this timer.
    pub fn handle(&self) -> TimerHandle {
        self.handle.clone()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.handle.set_enabled(enabled);
    }

    pub fn reset(&self) {
        self.handle.reset();
    }

    pub fn is_enabled(&self) -> bool {
        self.handle.is_enabled()
    }

    /// Whether the tick task is still alive.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Cancel the tick task. No callback runs after this returns.
    pub fn shutdown(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for DeadlineTimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
