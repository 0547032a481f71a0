//! ---
//! upkeep_section: "14-versioning-release-system"
//! upkeep_subsection: "module"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Version metadata and release source helpers."
//! upkeep_version: "v0.0.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
use std::convert::Infallible;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::install::{ReleaseInstaller, StagedRelease};
use crate::manifest::{CheckOutcome, Manifest};
use crate::relaunch::ProcessRelauncher;
use crate::semver::VersionInfo;
use crate::update::{ReleaseClient, ReleaseSettings};

/// Platform operations the update orchestrator drives.
#[async_trait]
pub trait UpdateBackend: Send + Sync + 'static {
    /// Query the release source.
    async fn check_for_update(&self) -> Result<CheckOutcome>;

    /// Install the update found by the most recent check.
    async fn install_update(&self) -> Result<()>;

    /// Replace the running process. Only returns on failure.
    async fn relaunch_process(&self) -> Result<Infallible>;
}

/// Backend that checks a feed or GitHub, stages signed releases, and
/// re-executes the current binary.
#[derive(Debug)]
pub struct ReleaseBackend {
    client: ReleaseClient,
    installer: ReleaseInstaller,
    relauncher: ProcessRelauncher,
    pending: Mutex<Option<Manifest>>,
    last_staged: Mutex<Option<StagedRelease>>,
}

impl ReleaseBackend {
    /// Build the backend from release settings and the running version.
    pub fn new(settings: ReleaseSettings, current: VersionInfo) -> Result<Self> {
        let installer = ReleaseInstaller::new(&settings)?;
        Ok(Self {
            client: ReleaseClient::new(settings, current),
            installer,
            relauncher: ProcessRelauncher::from_env(),
            pending: Mutex::new(None),
            last_staged: Mutex::new(None),
        })
    }

    /// Replace the relauncher, e.g. to pass different arguments.
    #[must_use]
    pub fn with_relauncher(mut self, relauncher: ProcessRelauncher) -> Self {
        self.relauncher = relauncher;
        self
    }

    /// Underlying release client.
    #[must_use]
    pub fn client(&self) -> &ReleaseClient {
        &self.client
    }

    /// Release that the next install will stage.
    #[must_use]
    pub fn pending(&self) -> Option<Manifest> {
        self.pending.lock().clone()
    }

    /// Most recent successful install.
    #[must_use]
    pub fn last_staged(&self) -> Option<StagedRelease> {
        self.last_staged.lock().clone()
    }
}

#[async_trait]
impl UpdateBackend for ReleaseBackend {
    async fn check_for_update(&self) -> Result<CheckOutcome> {
        let outcome = self.client.check().await?;
        let pending = if outcome.should_update {
            outcome.manifest.clone()
        } else {
            None
        };
        *self.pending.lock() = pending;
        Ok(outcome)
    }

    async fn install_update(&self) -> Result<()> {
        let manifest = self
            .pending()
            .ok_or_else(|| anyhow!("no update available to install"))?;
        let staged = self.installer.install(&manifest).await?;
        debug!(version = %staged.version, "install complete");
        *self.last_staged.lock() = Some(staged);
        Ok(())
    }

    async fn relaunch_process(&self) -> Result<Infallible> {
        self.relauncher.relaunch()
    }
}
