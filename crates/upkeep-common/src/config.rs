//! ---
//! upkeep_section: "01-core-functionality"
//! upkeep_subsection: "module"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Shared primitives and utilities for the update runtime."
//! upkeep_version: "v0.0.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_max_attempts() -> u32 {
    5
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(5_000)
}

fn default_timer_resolution() -> Duration {
    Duration::from_millis(50)
}

fn default_feed_path() -> PathBuf {
    PathBuf::from("configs/release_feed.json")
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("target/update-staging")
}

fn default_log_file() -> bool {
    true
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9898))
}

/// Primary configuration object for the Upkeep runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub update: UpdateConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "UPKEEP_CONFIG";

    /// Load configuration from disk, respecting the `UPKEEP_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.update.validate()
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Update orchestration and release source settings.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Suppress proactive checks except to continue a retry sequence.
    #[serde(default)]
    pub passive: bool,
    /// Consecutive failed checks tolerated before automatic retries stop.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(rename = "poll_interval_ms", default = "default_poll_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub poll_interval: Duration,
    #[serde(rename = "timer_resolution_ms", default = "default_timer_resolution")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub timer_resolution: Duration,
    #[serde(default = "default_feed_path")]
    pub feed_path: PathBuf,
    #[serde(default)]
    pub github_owner: Option<String>,
    #[serde(default)]
    pub github_repo: Option<String>,
    #[serde(default)]
    pub allow_apply: bool,
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
    /// Base64 ed25519 key that release signatures are checked against.
    #[serde(default)]
    pub release_public_key: Option<String>,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            passive: false,
            max_attempts: default_max_attempts(),
            poll_interval: default_poll_interval(),
            timer_resolution: default_timer_resolution(),
            feed_path: default_feed_path(),
            github_owner: None,
            github_repo: None,
            allow_apply: false,
            staging_dir: default_staging_dir(),
            release_public_key: None,
        }
    }
}

impl UpdateConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(anyhow!("update.max_attempts must be at least 1"));
        }
        if self.poll_interval.is_zero() {
            return Err(anyhow!("update.poll_interval_ms must be positive"));
        }
        if self.timer_resolution.is_zero() {
            return Err(anyhow!("update.timer_resolution_ms must be positive"));
        }
        if self.timer_resolution > self.poll_interval {
            return Err(anyhow!(
                "update.timer_resolution_ms ({}) exceeds update.poll_interval_ms ({})",
                self.timer_resolution.as_millis(),
                self.poll_interval.as_millis()
            ));
        }
        if self.github_owner.is_some() != self.github_repo.is_some() {
            return Err(anyhow!(
                "update.github_owner and update.github_repo must be set together"
            ));
        }
        if let Some(key) = &self.release_public_key {
            let bytes = general_purpose::STANDARD
                .decode(key.trim())
                .context("update.release_public_key must be base64 encoded")?;
            if bytes.len() != 32 {
                return Err(anyhow!(
                    "update.release_public_key must decode to 32 bytes, got {}",
                    bytes.len()
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    /// Filter directive, e.g. `info,upkeep_core=debug`.
    #[serde(default)]
    pub filter: Option<String>,
    /// Also write JSON lines to a daily rolling file.
    #[serde(default = "default_log_file")]
    pub file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            filter: None,
            file: default_log_file(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: AppConfig = "".parse().unwrap();
        assert!(!config.update.passive);
        assert_eq!(config.update.max_attempts, 5);
        assert_eq!(config.update.poll_interval, Duration::from_millis(5_000));
        assert_eq!(config.update.timer_resolution, Duration::from_millis(50));
        assert_eq!(config.logging.format, LogFormat::StructuredJson);
        assert!(config.logging.file);
        assert!(config.logging.filter.is_none());
        assert!(config.metrics.enabled);
    }

    #[test]
    fn update_table_overrides_defaults() {
        let config: AppConfig = r#"
            [update]
            passive = true
            max_attempts = 3
            poll_interval_ms = 60000
            timer_resolution_ms = 250
            github_owner = "upkeep"
            github_repo = "upkeep"

            [logging]
            format = "pretty"
            filter = "info,upkeep_core=debug"
            file = false
        "#
        .parse()
        .unwrap();
        assert!(config.update.passive);
        assert_eq!(config.update.max_attempts, 3);
        assert_eq!(config.update.poll_interval, Duration::from_secs(60));
        assert_eq!(config.update.timer_resolution, Duration::from_millis(250));
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.logging.filter.as_deref(), Some("info,upkeep_core=debug"));
        assert!(!config.logging.file);
    }

    #[test]
    fn zero_attempts_rejected() {
        let err = "[update]\nmax_attempts = 0".parse::<AppConfig>().unwrap_err();
        assert!(err.to_string().contains("max_attempts"));
    }

    #[test]
    fn resolution_coarser_than_poll_rejected() {
        let err = "[update]\npoll_interval_ms = 100\ntimer_resolution_ms = 500"
            .parse::<AppConfig>()
            .unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }

    #[test]
    fn half_configured_github_rejected() {
        let err = "[update]\ngithub_owner = \"upkeep\""
            .parse::<AppConfig>()
            .unwrap_err();
        assert!(err.to_string().contains("set together"));
    }

    #[test]
    fn malformed_release_key_rejected() {
        let err = "[update]\nrelease_public_key = \"AAAA\""
            .parse::<AppConfig>()
            .unwrap_err();
        assert!(err.to_string().contains("32 bytes"));
    }

    #[test]
    fn first_existing_candidate_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("upkeep.toml");
        fs::write(&present, "[update]\npassive = true\n").unwrap();
        let candidates = [dir.path().join("missing.toml"), present.clone()];

        let loaded = AppConfig::load_with_source(&candidates).unwrap();
        assert_eq!(loaded.source, present);
        assert!(loaded.config.update.passive);
    }

    #[test]
    fn no_candidates_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = AppConfig::load(&[dir.path().join("missing.toml")]).unwrap_err();
        assert!(err.to_string().contains("no configuration files found"));
    }
}
