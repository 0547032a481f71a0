//! ---
//! upkeep_section: "01-core-functionality"
//! upkeep_subsection: "module"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Update orchestration and lifecycle management."
//! upkeep_version: "v0.0.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
//! Update status tracking, bounded retries, periodic polling, and the
//! install-then-relaunch flow.

pub mod error;
pub mod orchestrator;
pub mod state;
pub mod update;

pub use error::{ApplyPhase, UpdateError};
pub use orchestrator::{OrchestratorSettings, UpdateOrchestrator};
pub use state::{RetryState, UpdateSnapshot, UpdateStatus};
pub use update::{backend_from_config, release_settings};
pub use upkeep_versioning::{CheckOutcome, Manifest, UpdateBackend};
