//! ---
//! upkeep_section: "14-versioning-release-system"
//! upkeep_subsection: "module"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Version metadata and release source helpers."
//! upkeep_version: "v0.0.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use octocrab::Octocrab;
use serde::Deserialize;
use tokio::fs as async_fs;
use tracing::{debug, info};

use crate::manifest::{CheckOutcome, Manifest};
use crate::semver::VersionInfo;

/// Where releases are looked up and staged.
#[derive(Debug, Clone)]
pub struct ReleaseSettings {
    /// Local feed path listing published releases.
    pub feed_path: PathBuf,
    /// Optional GitHub owner.
    pub github_owner: Option<String>,
    /// Optional GitHub repository name.
    pub github_repo: Option<String>,
    /// Whether install operations are permitted at all.
    pub allow_apply: bool,
    /// Directory receiving staged release payloads.
    pub staging_dir: PathBuf,
    /// Base64 ed25519 public key releases must be signed with.
    pub release_public_key: Option<String>,
}

impl ReleaseSettings {
    /// Helper to determine if GitHub lookup is enabled.
    #[must_use]
    pub fn github(&self) -> Option<(&str, &str)> {
        self.github_owner
            .as_deref()
            .zip(self.github_repo.as_deref())
    }

    /// Source consulted when the local feed is absent.
    #[must_use]
    pub fn source(&self) -> ReleaseSource {
        if self.github().is_some() {
            ReleaseSource::GitHub
        } else {
            ReleaseSource::Local
        }
    }
}

/// Release source selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseSource {
    /// Local JSON feed.
    Local,
    /// GitHub releases endpoint.
    GitHub,
}

/// Client responsible for determining update availability.
#[derive(Debug, Clone)]
pub struct ReleaseClient {
    settings: ReleaseSettings,
    current: VersionInfo,
}

impl ReleaseClient {
    /// Construct a client from settings and the running version metadata.
    #[must_use]
    pub fn new(settings: ReleaseSettings, current: VersionInfo) -> Self {
        Self { settings, current }
    }

    /// Access the resolved settings for the client.
    #[must_use]
    pub fn settings(&self) -> &ReleaseSettings {
        &self.settings
    }

    /// Version the latest release is compared against.
    #[must_use]
    pub fn current(&self) -> &VersionInfo {
        &self.current
    }

    /// Check the local feed, then GitHub, for a release newer than the
    /// running build. Any lookup or parse failure is an error.
    pub async fn check(&self) -> Result<CheckOutcome> {
        let mut latest = self.check_local_feed().await?;
        if latest.is_none() {
            if let Some((owner, repo)) = self.settings.github() {
                latest = self.check_github(owner, repo).await?;
            }
        }
        let Some(latest) = latest else {
            debug!("no releases published");
            return Ok(CheckOutcome::up_to_date());
        };

        let candidate = latest.semver()?;
        let should_update = self.current.is_older_than(&candidate)?;
        if should_update {
            info!(current = %self.current, latest = %candidate, "newer release published");
        } else {
            debug!(current = %self.current, latest = %candidate, "running latest release");
        }
        Ok(CheckOutcome {
            should_update,
            manifest: Some(latest),
        })
    }

    async fn check_local_feed(&self) -> Result<Option<Manifest>> {
        let path = &self.settings.feed_path;
        if !async_fs::try_exists(path).await.unwrap_or(false) {
            debug!(path = %path.display(), "release feed missing");
            return Ok(None);
        }
        let raw = async_fs::read_to_string(path)
            .await
            .with_context(|| format!("failed reading release feed {}", path.display()))?;
        let feed: ReleaseFeed = serde_json::from_str(&raw)
            .with_context(|| format!("invalid release feed {}", path.display()))?;
        let mut releases = feed.releases;
        releases.sort_by(|a, b| match (a.semver(), b.semver()) {
            (Ok(a), Ok(b)) => b.cmp(&a),
            _ => b.version.cmp(&a.version),
        });
        Ok(releases.into_iter().next())
    }

    async fn check_github(&self, owner: &str, repo: &str) -> Result<Option<Manifest>> {
        let octo = Octocrab::builder()
            .build()
            .context("unable to construct GitHub client")?;
        let response = octo
            .repos(owner.to_owned(), repo.to_owned())
            .releases()
            .list()
            .per_page(5)
            .send()
            .await
            .with_context(|| format!("failed querying GitHub releases for {owner}/{repo}"))?;
        let Some(release) = response.items.into_iter().find(|rel| !rel.draft) else {
            return Ok(None);
        };
        let version = release.tag_name.trim_start_matches('v').to_owned();
        let download_url = release
            .assets
            .first()
            .map(|asset| asset.browser_download_url.to_string());
        Ok(Some(Manifest {
            version,
            notes: release.body,
            published_at: release
                .published_at
                .map(|dt| dt.with_timezone(&Utc).to_rfc3339()),
            commit: Some(release.target_commitish),
            download_url,
            sha256: None,
            signature: None,
        }))
    }
}

#[derive(Debug, Deserialize)]
struct ReleaseFeed {
    #[serde(default)]
    releases: Vec<Manifest>,
}
