//! ---
//! upkeep_section: "14-versioning-release-system"
//! upkeep_subsection: "module"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Version metadata and release source helpers."
//! upkeep_version: "v0.0.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
use std::convert::TryInto;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use ed25519_dalek::{Signature, VerifyingKey};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs as async_fs;
use tracing::{debug, info};

use crate::manifest::Manifest;
use crate::update::ReleaseSettings;

const RECEIPT_FILE: &str = "release.json";
const DEFAULT_PAYLOAD_NAME: &str = "payload";

/// Location and digest of a release written to the staging area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagedRelease {
    /// Version that was staged.
    pub version: String,
    /// Directory holding the payload and receipt.
    pub directory: PathBuf,
    /// Downloaded payload, when the manifest pointed at one.
    pub payload: Option<PathBuf>,
    /// Hex SHA-256 of the payload.
    pub sha256: Option<String>,
}

#[derive(Debug, Serialize)]
struct InstallReceipt<'a> {
    version: &'a str,
    commit: Option<&'a str>,
    sha256: Option<&'a str>,
    staged_at: String,
}

/// Verifies and stages signed releases.
#[derive(Debug, Clone)]
pub struct ReleaseInstaller {
    staging_dir: PathBuf,
    allow_apply: bool,
    public_key: Option<VerifyingKey>,
    http: reqwest::Client,
}

impl ReleaseInstaller {
    /// Build an installer, decoding the configured release key.
    pub fn new(settings: &ReleaseSettings) -> Result<Self> {
        let public_key = settings
            .release_public_key
            .as_deref()
            .map(decode_public_key)
            .transpose()?;
        Ok(Self {
            staging_dir: settings.staging_dir.clone(),
            allow_apply: settings.allow_apply,
            public_key,
            http: reqwest::Client::new(),
        })
    }

    /// Directory releases are staged under.
    #[must_use]
    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Verify the release signature, fetch its payload, and record a receipt.
    ///
    /// The payload must hash to the signed `sha256`; nothing is written to the
    /// staging area until it does.
    pub async fn install(&self, manifest: &Manifest) -> Result<StagedRelease> {
        if !self.allow_apply {
            bail!("installing releases is disabled by configuration");
        }
        let key = self
            .public_key
            .as_ref()
            .ok_or_else(|| anyhow!("no release public key configured"))?;
        verify_release_signature(manifest, key)?;

        let fetched = match manifest.download_url.as_deref() {
            Some(location) => {
                let expected = manifest
                    .sha256
                    .as_deref()
                    .ok_or_else(|| anyhow!("release payload has no signed digest"))?;
                let bytes = self.fetch_payload(location).await?;
                let digest = hex::encode(Sha256::digest(&bytes));
                if !digest.eq_ignore_ascii_case(expected.trim()) {
                    bail!(
                        "payload digest mismatch for {location}: expected {expected}, got {digest}"
                    );
                }
                Some((payload_name(location), bytes, digest))
            }
            None => {
                debug!(version = %manifest.version, "release has no payload; receipt only");
                None
            }
        };

        let directory = self.staging_dir.join(&manifest.version);
        async_fs::create_dir_all(&directory)
            .await
            .with_context(|| format!("failed creating staging dir {}", directory.display()))?;

        let (payload, sha256) = match fetched {
            Some((name, bytes, digest)) => {
                let target = directory.join(name);
                async_fs::write(&target, &bytes)
                    .await
                    .with_context(|| format!("failed writing payload {}", target.display()))?;
                (Some(target), Some(digest))
            }
            None => (None, None),
        };

        let receipt = InstallReceipt {
            version: &manifest.version,
            commit: manifest.commit.as_deref(),
            sha256: sha256.as_deref(),
            staged_at: Utc::now().to_rfc3339(),
        };
        let receipt_path = directory.join(RECEIPT_FILE);
        async_fs::write(&receipt_path, serde_json::to_vec_pretty(&receipt)?)
            .await
            .with_context(|| format!("failed writing receipt {}", receipt_path.display()))?;

        info!(
            version = %manifest.version,
            target = %directory.display(),
            "release staged"
        );
        Ok(StagedRelease {
            version: manifest.version.clone(),
            directory,
            payload,
            sha256,
        })
    }

    async fn fetch_payload(&self, location: &str) -> Result<Vec<u8>> {
        if location.starts_with("http://") || location.starts_with("https://") {
            let response = self
                .http
                .get(location)
                .send()
                .await
                .with_context(|| format!("failed downloading {location}"))?
                .error_for_status()
                .with_context(|| format!("release download rejected for {location}"))?;
            let bytes = response
                .bytes()
                .await
                .with_context(|| format!("failed reading body of {location}"))?;
            return Ok(bytes.to_vec());
        }
        let path = location.strip_prefix("file://").unwrap_or(location);
        async_fs::read(path)
            .await
            .with_context(|| format!("failed reading payload {path}"))
    }
}

fn payload_name(location: &str) -> &str {
    location
        .rsplit(['/', '\\'])
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_PAYLOAD_NAME)
}

/// Decode a base64 ed25519 public key.
pub fn decode_public_key(encoded: &str) -> Result<VerifyingKey> {
    let bytes = general_purpose::STANDARD
        .decode(encoded.trim())
        .context("release public key must be base64 encoded")?;
    let array: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow!("release public key must be 32 bytes"))?;
    VerifyingKey::from_bytes(&array).map_err(|err| anyhow!("invalid release public key: {err}"))
}

fn verify_release_signature(manifest: &Manifest, key: &VerifyingKey) -> Result<()> {
    let signature = manifest
        .signature
        .as_deref()
        .ok_or_else(|| anyhow!("release {} is unsigned", manifest.version))?;
    let bytes = general_purpose::STANDARD
        .decode(signature)
        .context("release signature must be base64 encoded")?;
    let array: [u8; 64] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow!("invalid release signature length"))?;
    let signature = Signature::from_bytes(&array);
    key.verify_strict(manifest.signing_message().as_bytes(), &signature)
        .map_err(|err| anyhow!("release signature verification failed: {err}"))?;
    Ok(())
}
