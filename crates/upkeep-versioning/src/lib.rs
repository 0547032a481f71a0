//! ---
//! upkeep_section: "14-versioning-release-system"
//! upkeep_subsection: "module"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Version metadata and release source helpers."
//! upkeep_version: "v0.0.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! Version metadata, release manifests, and the backend seam the update
//! orchestrator drives: checking a release source, staging an install, and
//! relaunching the running binary.

pub mod backend;
pub mod install;
pub mod manifest;
pub mod relaunch;
pub mod semver;
pub mod update;

pub use backend::{ReleaseBackend, UpdateBackend};
pub use install::{ReleaseInstaller, StagedRelease};
pub use manifest::{CheckOutcome, Manifest};
pub use relaunch::ProcessRelauncher;
pub use update::{ReleaseClient, ReleaseSettings, ReleaseSource};
