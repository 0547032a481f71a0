//! ---
//! upkeep_section: "01-core-functionality"
//! upkeep_subsection: "module"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Shared primitives and utilities for the update runtime."
//! upkeep_version: "v0.0.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

/// Environment override for the log filter. Beats the configured filter.
pub const LOG_ENV: &str = "UPKEEP_LOG";
const DEFAULT_DIRECTIVE: &str = "info";

/// Output format for the console layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

/// Keeps the rolling file writer flushing. Drop it last, after the final log
/// line has been emitted.
#[must_use = "dropping the guard stops the log file writer"]
#[derive(Debug)]
pub struct TracingGuard {
    _file: Option<WorkerGuard>,
}

/// Pick the filter directive: `UPKEEP_LOG`, then `logging.filter`, then
/// `RUST_LOG`, then `info`. Blank values are skipped.
pub fn filter_directive(
    env_override: Option<&str>,
    configured: Option<&str>,
    rust_log: Option<&str>,
) -> String {
    [env_override, configured, rust_log]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|directive| !directive.is_empty())
        .unwrap_or(DEFAULT_DIRECTIVE)
        .to_owned()
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let env_override = std::env::var(LOG_ENV).ok();
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let directive = filter_directive(
        env_override.as_deref(),
        config.filter.as_deref(),
        rust_log.as_deref(),
    );
    EnvFilter::try_new(&directive).with_context(|| format!("invalid log filter `{directive}`"))
}

/// Install the global subscriber for `service_name`.
///
/// The console gets `config.format`. When `config.file` is set, JSON lines are
/// also appended to a daily file under `config.directory`; the returned guard
/// owns that writer.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<TracingGuard> {
    let filter = build_filter(config)?;

    let console = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .json()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .boxed(),
    };

    let (file_layer, file_guard) = if config.file {
        std::fs::create_dir_all(&config.directory).with_context(|| {
            format!("creating log directory {}", config.directory.display())
        })?;
        let prefix = config.file_prefix.as_deref().unwrap_or(service_name);
        let appender = daily(&config.directory, format!("{prefix}.log"));
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer()
            .json()
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(writer)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    info!(
        service = service_name,
        format = ?config.format,
        log_file = config.file,
        "tracing initialised"
    );
    Ok(TracingGuard { _file: file_guard })
}
