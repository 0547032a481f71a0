//! ---
//! upkeep_section: "01-core-functionality"
//! upkeep_subsection: "binary"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Binary entrypoint for the Upkeep daemon."
//! upkeep_version: "v0.0.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{ArgAction, Parser, Subcommand};
use tokio::signal;
use tracing::{error, info, warn};
use upkeep_common::config::AppConfig;
use upkeep_common::logging::init_tracing;
use upkeep_core::{
    backend_from_config, Manifest, OrchestratorSettings, UpdateBackend, UpdateOrchestrator,
    UpdateSnapshot, UpdateStatus,
};
use upkeep_metrics::{new_registry, spawn_http_server, DaemonMetrics, UpdaterMetrics};
use upkeep_versioning::semver::VersionInfo;

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    version = concat!("Upkeep ", env!("CARGO_PKG_VERSION")),
    about = "Upkeep update daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Only check when asked or while a retry sequence is running")]
    passive: bool,

    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print extended version information and exit"
    )]
    version: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Poll for updates until interrupted")]
    Run {
        #[arg(long, help = "Install and relaunch as soon as an update is found")]
        auto_apply: bool,
    },
    #[command(about = "Check for updates once but do not apply them")]
    Check,
    #[command(about = "Check once and install any available update, then relaunch")]
    Apply,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let version = VersionInfo::current();
    if cli.version {
        println!("{}", version.extended());
        return Ok(());
    }
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/upkeep.toml"));

    let loaded = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    if cli.passive {
        config.update.passive = true;
    }
    let _tracing = init_tracing("upkeepd", &config.logging)?;
    info!(
        config_path = %loaded.source.display(),
        passive = config.update.passive,
        "configuration loaded"
    );

    let registry = new_registry();
    let daemon_metrics = DaemonMetrics::new(registry.clone())?;
    daemon_metrics.inc_start();
    daemon_metrics.set_build_info(&version.semver, version.short_sha());
    let updater_metrics = UpdaterMetrics::new(registry.clone())?;

    let backend: Arc<dyn UpdateBackend> = backend_from_config(&config.update, version.clone())?;
    let settings = OrchestratorSettings::from_config(&config.update);

    match cli.command.unwrap_or(Commands::Run { auto_apply: false }) {
        Commands::Run { auto_apply } => {
            let metrics_server = if config.metrics.enabled {
                let server = spawn_http_server(registry.clone(), config.metrics.listen)?;
                info!(address = %server.addr(), "metrics exporter enabled");
                Some(server)
            } else {
                info!("metrics exporter disabled by configuration");
                None
            };

            let mut orchestrator =
                UpdateOrchestrator::start(settings, backend, Some(updater_metrics));
            let result = run_daemon(&orchestrator, &version, auto_apply).await;
            orchestrator.shutdown();

            if let Some(server) = metrics_server {
                server.shutdown().await?;
            }
            result?;
        }
        Commands::Check => {
            // Manual checks run in passive mode so nothing is scheduled behind them.
            let orchestrator =
                UpdateOrchestrator::start(settings.passive(true), backend, Some(updater_metrics));
            let snapshot = orchestrator.recheck().await;
            println!("{}", describe_snapshot(&version, &snapshot));
            if snapshot.has_check_failed() {
                return Err(anyhow!("update check failed"));
            }
        }
        Commands::Apply => {
            let orchestrator =
                UpdateOrchestrator::start(settings.passive(true), backend, Some(updater_metrics));
            let snapshot = orchestrator.recheck().await;
            println!("{}", describe_snapshot(&version, &snapshot));
            match snapshot.status {
                UpdateStatus::Available(_) => {
                    let never = orchestrator.apply_update_and_restart().await?;
                    match never {}
                }
                UpdateStatus::Failed => return Err(anyhow!("update check failed")),
                _ => warn!("no update to apply"),
            }
        }
    }

    Ok(())
}

/// Gate for `run --auto-apply`. A release whose install or relaunch failed is
/// not attempted again until a newer one shows up.
#[derive(Debug, Default)]
struct AutoApply {
    enabled: bool,
    failed_version: Option<String>,
}

impl AutoApply {
    fn new(enabled: bool) -> Self {
        Self {
            enabled,
            failed_version: None,
        }
    }

    fn candidate<'a>(&self, status: &'a UpdateStatus) -> Option<&'a Manifest> {
        let UpdateStatus::Available(manifest) = status else {
            return None;
        };
        if !self.enabled || self.failed_version.as_deref() == Some(manifest.version.as_str()) {
            return None;
        }
        Some(manifest)
    }

    fn record_failure(&mut self, version: &str) {
        self.failed_version = Some(version.to_owned());
    }
}

async fn run_daemon(
    orchestrator: &UpdateOrchestrator,
    version: &VersionInfo,
    auto_apply: bool,
) -> Result<()> {
    let mut updates = orchestrator.subscribe();
    let mut policy = AutoApply::new(auto_apply);
    info!(
        version = %version,
        auto_apply,
        "daemon running; waiting for termination signal"
    );
    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let snapshot = updates.borrow_and_update().clone();
                log_transition(&snapshot);
                let Some(manifest) = policy.candidate(&snapshot.status) else {
                    continue;
                };
                if let Err(err) = orchestrator.apply_update_and_restart().await {
                    error!(
                        phase = %err.phase(),
                        error = %err,
                        release = %manifest.version,
                        "automatic update failed; not retrying this release"
                    );
                    policy.record_failure(&manifest.version);
                }
            }
            signal = signal::ctrl_c() => {
                signal?;
                info!("ctrl-c received; shutting down");
                return Ok(());
            }
        }
    }
}

fn log_transition(snapshot: &UpdateSnapshot) {
    match &snapshot.status {
        UpdateStatus::Available(manifest) => {
            info!(latest = %manifest.version, "newer release detected")
        }
        UpdateStatus::Failed if snapshot.retry_exhausted() => warn!(
            attempts = snapshot.attempts(),
            "update checks suspended until a manual re-check"
        ),
        status => info!(
            status = status.as_str(),
            attempts = snapshot.attempts(),
            "update status changed"
        ),
    }
}

fn describe_snapshot(version: &VersionInfo, snapshot: &UpdateSnapshot) -> String {
    match &snapshot.status {
        UpdateStatus::Available(manifest) => format!(
            "Current: {version}\nLatest: {}\nUpdate Available: true",
            manifest.version
        ),
        UpdateStatus::UpToDate => format!("Current: {version}\nUpdate Available: false"),
        status => format!(
            "Current: {version}\nStatus: {}\nAttempts: {}",
            status.as_str(),
            snapshot.attempts()
        ),
    }
}
