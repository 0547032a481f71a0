//! ---
//! upkeep_section: "03-persistence-logging"
//! upkeep_subsection: "module"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Metrics collection and export utilities."
//! upkeep_version: "v0.0.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{
    Encoder, GaugeVec, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder, TEXT_FORMAT,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across services.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let bound = std_listener.local_addr().unwrap_or(addr);
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %bound, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

/// Prometheus scrape endpoint.
async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let mut body = Vec::new();
    match TextEncoder::new().encode(&families, &mut body) {
        Ok(()) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, HeaderValue::from_static(TEXT_FORMAT))],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                String::from("metrics encoding error"),
            )
                .into_response()
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Return the bound address for convenience.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics recorded by the daemon process itself.
#[derive(Clone)]
pub struct DaemonMetrics {
    registry: SharedRegistry,
    starts_total: IntCounter,
    build_info: GaugeVec,
}

impl DaemonMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let starts_total = IntCounter::with_opts(Opts::new(
            "upkeepd_starts_total",
            "Total number of times the Upkeep daemon has initialised",
        ))?;
        registry.register(Box::new(starts_total.clone()))?;

        let build_info = GaugeVec::new(
            Opts::new(
                "upkeepd_build_info",
                "Build metadata for the running daemon binary",
            ),
            &["version", "git_sha"],
        )?;
        registry.register(Box::new(build_info.clone()))?;

        Ok(Self {
            registry,
            starts_total,
            build_info,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_start(&self) {
        self.starts_total.inc();
    }

    pub fn set_build_info(&self, version: &str, git_sha: &str) {
        self.build_info
            .with_label_values(&[version, git_sha])
            .set(1.0);
    }
}

impl std::fmt::Debug for DaemonMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonMetrics").finish_non_exhaustive()
    }
}

/// Metrics published by the update orchestrator.
#[derive(Clone)]
pub struct UpdaterMetrics {
    registry: SharedRegistry,
    checks_total: IntCounterVec,
    check_seconds: Histogram,
    retry_attempts: IntGauge,
    installs_total: IntCounterVec,
}

impl UpdaterMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let checks_total = IntCounterVec::new(
            Opts::new(
                "upkeep_update_checks_total",
                "Completed update checks by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(checks_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.005, 2.0, 12)
            .context("failed to construct histogram buckets")?;
        let check_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "upkeep_update_check_seconds",
                "Time spent waiting on the release source per check",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(check_seconds.clone()))?;

        let retry_attempts = IntGauge::with_opts(Opts::new(
            "upkeep_update_retry_attempts",
            "Consecutive failed update checks since the last success or manual re-check",
        ))?;
        registry.register(Box::new(retry_attempts.clone()))?;

        let installs_total = IntCounterVec::new(
            Opts::new(
                "upkeep_update_installs_total",
                "Install-and-relaunch attempts by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(installs_total.clone()))?;

        Ok(Self {
            registry,
            checks_total,
            check_seconds,
            retry_attempts,
            installs_total,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    /// Record a finished check. `outcome` is one of `up_to_date`, `available`, `failed`.
    pub fn record_check(&self, outcome: &str, elapsed: Duration, attempts: u32) {
        self.checks_total.with_label_values(&[outcome]).inc();
        self.check_seconds.observe(elapsed.as_secs_f64());
        self.retry_attempts.set(i64::from(attempts));
    }

    pub fn set_retry_attempts(&self, attempts: u32) {
        self.retry_attempts.set(i64::from(attempts));
    }

    pub fn record_install(&self, outcome: &str) {
        self.installs_total.with_label_values(&[outcome]).inc();
    }
}

impl std::fmt::Debug for UpdaterMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdaterMetrics").finish_non_exhaustive()
    }
}

pub use prometheus;

#[cfg(test)]
mod tests {
    use super::*;

    fn metric_names(registry: &SharedRegistry) -> Vec<String> {
        registry
            .gather()
            .iter()
            .map(|fam| fam.get_name().to_string())
            .collect()
    }

    #[test]
    fn updater_metrics_register_their_families() {
        let registry = new_registry();
        let metrics = UpdaterMetrics::new(registry.clone()).unwrap();
        metrics.record_check("failed", Duration::from_millis(20), 2);
        metrics.record_install("failure");

        let names = metric_names(&registry);
        assert!(names.contains(&"upkeep_update_checks_total".to_string()));
        assert!(names.contains(&"upkeep_update_check_seconds".to_string()));
        assert!(names.contains(&"upkeep_update_retry_attempts".to_string()));
        assert!(names.contains(&"upkeep_update_installs_total".to_string()));
    }

    #[test]
    fn double_registration_is_an_error() {
        let registry = new_registry();
        UpdaterMetrics::new(registry.clone()).unwrap();
        assert!(UpdaterMetrics::new(registry).is_err());
    }

    #[tokio::test]
    async fn scrape_returns_text_exposition() {
        let registry = new_registry();
        let metrics = UpdaterMetrics::new(registry.clone()).unwrap();
        metrics.record_check("available", Duration::from_millis(5), 0);

        let response = metrics_handler(registry).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            TEXT_FORMAT
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("upkeep_update_checks_total{outcome=\"available\"} 1"));
    }

    #[tokio::test]
    async fn exporter_binds_and_shuts_down() {
        let registry = new_registry();
        let metrics = DaemonMetrics::new(registry.clone()).unwrap();
        metrics.inc_start();
        let server = spawn_http_server(registry, SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
        assert_ne!(server.addr().port(), 0);
        server.shutdown().await.unwrap();
    }
}
