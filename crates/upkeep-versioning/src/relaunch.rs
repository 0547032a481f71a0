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
use std::ffi::OsString;
use std::process::Command;

use anyhow::{Context, Result};
use tracing::info;

/// Restarts the running binary with the arguments it was started with.
#[derive(Debug, Clone, Default)]
pub struct ProcessRelauncher {
    args: Vec<OsString>,
}

impl ProcessRelauncher {
    /// Capture the current process arguments.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            args: std::env::args_os().skip(1).collect(),
        }
    }

    /// Arguments the replacement process will receive.
    #[must_use]
    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// Spawn the replacement process and exit. Only returns on failure.
    pub fn relaunch(&self) -> Result<Infallible> {
        let exe = std::env::current_exe().context("unable to resolve current executable")?;
        info!(executable = %exe.display(), "relaunching process");
        Command::new(&exe)
            .args(&self.args)
            .spawn()
            .with_context(|| format!("failed to spawn {}", exe.display()))?;
        std::process::exit(0)
    }
}
