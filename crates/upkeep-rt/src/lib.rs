//! ---
//! upkeep_section: "02-scheduling-runtime"
//! upkeep_subsection: "module"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Runtime helpers supporting the update orchestrator."
//! upkeep_version: "v0.0.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
//! Scheduling helpers for the Upkeep runtime: a fixed-cadence pacer and the
//! explicitly re-armed deadline timer built on top of it.

pub mod scheduling;
pub mod timer;

pub use scheduling::RateLimiter;
pub use timer::{DeadlineTimer, TimerHandle, TimerState, DEFAULT_RESOLUTION};
