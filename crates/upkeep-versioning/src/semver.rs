//! ---
//! upkeep_section: "14-versioning-release-system"
//! upkeep_subsection: "module"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Version metadata and release source helpers."
//! upkeep_version: "v0.0.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
use std::fmt;

use anyhow::{Context, Result};
use semver::Version;
use serde::Serialize;

const SHORT_SHA_LEN: usize = 9;

/// Identity of the running build. Release candidates are compared against
/// `semver`; the rest is informational and absent when the build had no git
/// checkout or ran with idempotent vergen output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionInfo {
    pub semver: String,
    pub git_sha: Option<String>,
    pub built_at: Option<String>,
    pub target: Option<String>,
}

fn emitted(value: Option<&'static str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty() && *value != "VERGEN_IDEMPOTENT_OUTPUT")
        .map(str::to_owned)
}

impl VersionInfo {
    /// Metadata baked into this binary.
    #[must_use]
    pub fn current() -> Self {
        Self {
            semver: env!("CARGO_PKG_VERSION").to_owned(),
            git_sha: emitted(option_env!("VERGEN_GIT_SHA")),
            built_at: emitted(option_env!("VERGEN_BUILD_TIMESTAMP")),
            target: emitted(option_env!("VERGEN_CARGO_TARGET_TRIPLE")),
        }
    }

    /// Pin the version releases are compared against.
    #[must_use]
    pub fn with_semver(mut self, semver: impl Into<String>) -> Self {
        self.semver = semver.into();
        self
    }

    pub fn parsed(&self) -> Result<Version> {
        Version::parse(&self.semver)
            .with_context(|| format!("running version `{}` is not semver", self.semver))
    }

    /// True when `candidate` is a strictly newer release than this build.
    pub fn is_older_than(&self, candidate: &Version) -> Result<bool> {
        Ok(self.parsed()? < *candidate)
    }

    /// Abbreviated commit, `unknown` without git metadata.
    #[must_use]
    pub fn short_sha(&self) -> &str {
        match &self.git_sha {
            Some(sha) => sha.get(..SHORT_SHA_LEN).unwrap_or(sha),
            None => "unknown",
        }
    }

    /// Multi-line report for `--version`.
    #[must_use]
    pub fn extended(&self) -> String {
        let mut out = format!("upkeepd {self}");
        for (label, value) in [
            ("commit", &self.git_sha),
            ("built", &self.built_at),
            ("target", &self.target),
        ] {
            if let Some(value) = value {
                out.push_str(&format!("\n{label}: {value}"));
            }
        }
        out
    }
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.git_sha {
            Some(_) => write!(f, "{} ({})", self.semver, self.short_sha()),
            None => f.write_str(&self.semver),
        }
    }
}
