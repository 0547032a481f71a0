//! ---
//! upkeep_section: "15-testing-qa-runbook"
//! upkeep_subsection: "integration-tests"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Integration and validation tests for the Upkeep stack."
//! upkeep_version: "v0.0.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
use std::convert::Infallible;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use ed25519_dalek::{Signer, SigningKey};
use serde_json::json;
use sha2::{Digest, Sha256};
use upkeep_common::config::UpdateConfig;
use upkeep_core::{
    backend_from_config, ApplyPhase, CheckOutcome, OrchestratorSettings, UpdateBackend,
    UpdateOrchestrator, UpdateStatus,
};
use upkeep_versioning::semver::VersionInfo;
use upkeep_versioning::{Manifest, ReleaseBackend};

/// Real release backend whose relaunch is replaced so the test process survives.
struct StayResident(Arc<ReleaseBackend>);

#[async_trait]
impl UpdateBackend for StayResident {
    async fn check_for_update(&self) -> Result<CheckOutcome> {
        self.0.check_for_update().await
    }

    async fn install_update(&self) -> Result<()> {
        self.0.install_update().await
    }

    async fn relaunch_process(&self) -> Result<Infallible> {
        Err(anyhow!("relaunch disabled under test"))
    }
}

fn signing_key() -> SigningKey {
    SigningKey::from_bytes(&[42u8; 32])
}

fn signature_for(version: &str, commit: &str, sha256: Option<&str>) -> String {
    let mut manifest = Manifest::new(version);
    manifest.commit = Some(commit.to_string());
    manifest.sha256 = sha256.map(str::to_owned);
    let signature = signing_key().sign(manifest.signing_message().as_bytes());
    general_purpose::STANDARD.encode(signature.to_bytes())
}

fn write_feed(path: &Path, release: serde_json::Value) {
    std::fs::write(path, json!({ "releases": [release] }).to_string()).unwrap();
}

fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn release_backend(config: &UpdateConfig) -> Arc<ReleaseBackend> {
    backend_from_config(config, VersionInfo::current().with_semver("1.3.2")).unwrap()
}

fn config(dir: &Path) -> UpdateConfig {
    UpdateConfig {
        passive: true,
        feed_path: dir.join("release_feed.json"),
        staging_dir: dir.join("staging"),
        allow_apply: true,
        release_public_key: Some(
            general_purpose::STANDARD.encode(signing_key().verifying_key().to_bytes()),
        ),
        ..Default::default()
    }
}

#[tokio::test]
async fn signed_release_is_staged_before_relaunch() {
    let dir = tempfile::tempdir().unwrap();
    let payload = dir.path().join("upkeep-1.4.0.tar.gz");
    std::fs::write(&payload, b"new-build").unwrap();
    let config = config(dir.path());
    write_feed(
        &config.feed_path,
        json!({
            "version": "1.4.0",
            "commit": "c0ffee",
            "download_url": payload.display().to_string(),
            "sha256": digest(b"new-build"),
            "signature": signature_for("1.4.0", "c0ffee", Some(&digest(b"new-build"))),
        }),
    );

    let release = release_backend(&config);
    let orchestrator = UpdateOrchestrator::start(
        OrchestratorSettings::from_config(&config),
        Arc::new(StayResident(release.clone())),
        None,
    );

    let snapshot = orchestrator.recheck().await;
    let UpdateStatus::Available(manifest) = &snapshot.status else {
        panic!("expected an available update, got {:?}", snapshot.status);
    };
    assert_eq!(manifest.version, "1.4.0");

    let err = orchestrator
        .apply_update_and_restart()
        .await
        .expect_err("relaunch is disabled");
    assert_eq!(err.phase(), ApplyPhase::Relaunch);

    let staged = release.last_staged().expect("release staged");
    assert_eq!(staged.version, "1.4.0");
    assert!(staged.directory.join("release.json").exists());
    assert_eq!(std::fs::read(staged.payload.unwrap()).unwrap(), b"new-build");
}

#[tokio::test]
async fn tampered_release_is_not_installed() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    write_feed(
        &config.feed_path,
        json!({
            "version": "1.4.0",
            "commit": "c0ffee",
            // signed for a different commit
            "signature": signature_for("1.4.0", "deadbeef", None),
        }),
    );

    let release = release_backend(&config);
    let orchestrator = UpdateOrchestrator::start(
        OrchestratorSettings::from_config(&config),
        Arc::new(StayResident(release.clone())),
        None,
    );

    let snapshot = orchestrator.recheck().await;
    assert_eq!(snapshot.should_update(), Some(true));

    let err = orchestrator
        .apply_update_and_restart()
        .await
        .expect_err("signature mismatch");
    assert_eq!(err.phase(), ApplyPhase::Install);
    assert!(err.to_string().contains("signature verification failed"));
    assert!(release.last_staged().is_none());
    assert!(!config.staging_dir.join("1.4.0").exists());
}

#[tokio::test]
async fn payload_swapped_after_signing_is_not_installed() {
    let dir = tempfile::tempdir().unwrap();
    let payload = dir.path().join("upkeep-1.4.0.tar.gz");
    std::fs::write(&payload, b"new-build").unwrap();
    let config = config(dir.path());
    write_feed(
        &config.feed_path,
        json!({
            "version": "1.4.0",
            "commit": "c0ffee",
            "download_url": payload.display().to_string(),
            "sha256": digest(b"new-build"),
            "signature": signature_for("1.4.0", "c0ffee", Some(&digest(b"new-build"))),
        }),
    );
    // the manifest still verifies; only the bytes behind it changed
    std::fs::write(&payload, b"not-the-release").unwrap();

    let release = release_backend(&config);
    let orchestrator = UpdateOrchestrator::start(
        OrchestratorSettings::from_config(&config),
        Arc::new(StayResident(release.clone())),
        None,
    );
    assert_eq!(orchestrator.recheck().await.should_update(), Some(true));

    let err = orchestrator
        .apply_update_and_restart()
        .await
        .expect_err("digest mismatch");
    assert_eq!(err.phase(), ApplyPhase::Install);
    assert!(err.to_string().contains("payload digest mismatch"));
    assert!(release.last_staged().is_none());
    assert!(!config.staging_dir.join("1.4.0").exists());
}

#[tokio::test]
async fn running_latest_release_reports_up_to_date() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    write_feed(&config.feed_path, json!({ "version": "1.3.2" }));

    let release = release_backend(&config);
    let orchestrator =
        UpdateOrchestrator::start(OrchestratorSettings::from_config(&config), release, None);

    let snapshot = orchestrator.recheck().await;
    assert_eq!(snapshot.status, UpdateStatus::UpToDate);
    assert_eq!(snapshot.attempts(), 0);

    let err = orchestrator
        .apply_update_and_restart()
        .await
        .expect_err("nothing to install");
    assert_eq!(err.phase(), ApplyPhase::Install);
}
