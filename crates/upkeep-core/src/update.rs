//! ---
//! upkeep_section: "01-core-functionality"
//! upkeep_subsection: "module"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Update orchestration and lifecycle management."
//! upkeep_version: "v0.0.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::{Context, Result};
use upkeep_common::config::UpdateConfig;
use upkeep_versioning::semver::VersionInfo;
use upkeep_versioning::{ReleaseBackend, ReleaseSettings};

/// Map workspace configuration onto release source settings.
#[must_use]
pub fn release_settings(config: &UpdateConfig) -> ReleaseSettings {
    ReleaseSettings {
        feed_path: config.feed_path.clone(),
        github_owner: config.github_owner.clone(),
        github_repo: config.github_repo.clone(),
        allow_apply: config.allow_apply,
        staging_dir: config.staging_dir.clone(),
        release_public_key: config.release_public_key.clone(),
    }
}

/// Build the release-backed update backend from configuration.
pub fn backend_from_config(
    config: &UpdateConfig,
    version: VersionInfo,
) -> Result<Arc<ReleaseBackend>> {
    let backend = ReleaseBackend::new(release_settings(config), version)
        .context("failed to initialise release backend")?;
    Ok(Arc::new(backend))
}
