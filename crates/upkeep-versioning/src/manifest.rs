//! ---
//! upkeep_section: "14-versioning-release-system"
//! upkeep_subsection: "module"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Version metadata and release source helpers."
//! upkeep_version: "v0.0.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
use anyhow::{anyhow, Result};
use semver::Version;
use serde::{Deserialize, Serialize};

/// Release metadata returned by a release source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// SemVer string for the release.
    pub version: String,
    #[serde(default)]
    /// Optional release notes.
    pub notes: Option<String>,
    #[serde(default)]
    /// Optional RFC 3339 publish timestamp.
    pub published_at: Option<String>,
    #[serde(default)]
    /// Optional commit hash reference.
    pub commit: Option<String>,
    #[serde(default)]
    /// Optional payload location (http(s) URL or local path).
    pub download_url: Option<String>,
    #[serde(default)]
    /// Hex SHA-256 of the payload at `download_url`; covered by the signature.
    pub sha256: Option<String>,
    #[serde(default)]
    /// Optional base64 ed25519 signature over [`Manifest::signing_message`].
    pub signature: Option<String>,
}

impl Manifest {
    /// Minimal manifest carrying only a version.
    #[must_use]
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            notes: None,
            published_at: None,
            commit: None,
            download_url: None,
            sha256: None,
            signature: None,
        }
    }

    /// Parse the version string into a [`semver::Version`].
    pub fn semver(&self) -> Result<Version> {
        Version::parse(&self.version)
            .map_err(|err| anyhow!("invalid semver {}: {}", self.version, err))
    }

    /// Bytes covered by the release signature: `version|commit|sha256`, with
    /// `unknown` and `none` standing in for missing fields.
    #[must_use]
    pub fn signing_message(&self) -> String {
        format!(
            "{}|{}|{}",
            self.version,
            self.commit.as_deref().unwrap_or("unknown"),
            self.sha256.as_deref().map_or("none", str::trim)
        )
    }
}

/// Result of a single update check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    /// Whether the release source offers something newer than the running build.
    pub should_update: bool,
    /// Latest release seen, when the source published one.
    pub manifest: Option<Manifest>,
}

impl CheckOutcome {
    /// Outcome for a source with nothing newer to offer.
    #[must_use]
    pub fn up_to_date() -> Self {
        Self {
            should_update: false,
            manifest: None,
        }
    }

    /// Outcome carrying a newer release.
    #[must_use]
    pub fn available(manifest: Manifest) -> Self {
        Self {
            should_update: true,
            manifest: Some(manifest),
        }
    }
}
