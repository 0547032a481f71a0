//! ---
//! upkeep_section: "01-core-functionality"
//! upkeep_subsection: "module"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Update orchestration and lifecycle management."
//! upkeep_version: "v0.0.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
use std::fs;

use serde_json::json;
use upkeep_common::config::UpdateConfig;
use upkeep_core::{backend_from_config, OrchestratorSettings, UpdateOrchestrator, UpdateStatus};
use upkeep_versioning::semver::VersionInfo;

#[tokio::test(start_paused = true)]
async fn feed_release_surfaces_through_orchestrator() {
    let dir = tempfile::tempdir().unwrap();
    let feed = dir.path().join("release_feed.json");
    let body = json!({
        "releases": [
            {
                "version": "0.2.0",
                "commit": "abc",
                "notes": "fixes",
                "published_at": "2026-01-02T00:00:00Z"
            }
        ]
    });
    fs::write(&feed, body.to_string()).unwrap();

    let config = UpdateConfig {
        feed_path: feed,
        staging_dir: dir.path().join("staging"),
        ..Default::default()
    };
    let version = VersionInfo::current().with_semver("0.1.0");
    let backend = backend_from_config(&config, version).unwrap();
    let settings = OrchestratorSettings::from_config(&config);
    let orchestrator = UpdateOrchestrator::start(settings, backend.clone(), None);

    let mut rx = orchestrator.subscribe();
    let snapshot = rx
        .wait_for(|snapshot| snapshot.checks_completed >= 1)
        .await
        .unwrap()
        .clone();
    let UpdateStatus::Available(manifest) = snapshot.status else {
        panic!("expected an available update, got {:?}", snapshot.status);
    };
    assert_eq!(manifest.version, "0.2.0");
    assert_eq!(manifest.notes.as_deref(), Some("fixes"));
    assert_eq!(backend.pending().map(|m| m.version), Some("0.2.0".to_string()));
}

#[tokio::test(start_paused = true)]
async fn corrupt_feed_is_recorded_as_failed_check() {
    let dir = tempfile::tempdir().unwrap();
    let feed = dir.path().join("release_feed.json");
    fs::write(&feed, "[]]").unwrap();

    let config = UpdateConfig {
        feed_path: feed,
        passive: true,
        ..Default::default()
    };
    let backend = backend_from_config(&config, VersionInfo::current()).unwrap();
    let orchestrator =
        UpdateOrchestrator::start(OrchestratorSettings::from_config(&config), backend, None);

    let snapshot = orchestrator.recheck().await;
    assert!(snapshot.has_check_failed());
    assert_eq!(snapshot.attempts(), 1);
}
