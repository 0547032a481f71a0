//! ---
//! upkeep_section: "01-core-functionality"
//! upkeep_subsection: "module"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Update orchestration and lifecycle management."
//! upkeep_version: "v0.0.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, UpdateError>;

/// Step of the install-then-relaunch sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyPhase {
    Install,
    Relaunch,
}

impl ApplyPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplyPhase::Install => "install",
            ApplyPhase::Relaunch => "relaunch",
        }
    }
}

impl fmt::Display for ApplyPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced to callers of the orchestrator. Check failures are not
/// here: they are recorded in the snapshot instead.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("update {phase} failed: {source}")]
    InstallFailed {
        phase: ApplyPhase,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

impl UpdateError {
    pub(crate) fn install_failed(phase: ApplyPhase, source: anyhow::Error) -> Self {
        UpdateError::InstallFailed {
            phase,
            source: source.into(),
        }
    }

    /// Phase that failed.
    pub fn phase(&self) -> ApplyPhase {
        match self {
            UpdateError::InstallFailed { phase, .. } => *phase,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_names_phase_and_cause() {
        let err = UpdateError::install_failed(ApplyPhase::Relaunch, anyhow::anyhow!("exec denied"));
        assert_eq!(err.to_string(), "update relaunch failed: exec denied");
        assert_eq!(err.phase(), ApplyPhase::Relaunch);
        assert!(std::error::Error::source(&err).is_some());
    }
}
