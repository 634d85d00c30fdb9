//! Remote registry client for pulling and pushing skill artifacts.
//!
//! Uses the `oci-distribution` crate to talk to OCI registries (GHCR,
//! Docker Hub, a local `skr serve`, ...). Pulled manifests are stored byte
//! for byte so their local digest matches the remote one.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use oci_distribution::client::{ClientConfig, ClientProtocol, Config, ImageLayer};
use oci_distribution::errors::OciDistributionError;
use oci_distribution::manifest::{OciDescriptor, OciImageManifest};
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::{Client, Reference};
use skr_core::error::{Result, SkrError};

use super::credentials::{Credential, CredentialProvider};
use super::digest::Digest;
use super::manifest::{Descriptor, Manifest, MEDIA_TYPE_OCI_MANIFEST};
use super::reference::SkillReference;
use super::store::Store;
use crate::resolve::Puller;

const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(200);

/// Result of a successful push.
#[derive(Debug, Clone)]
pub struct PushResult {
    /// URL of the pushed manifest.
    pub manifest_url: String,
    /// URL of the pushed config blob.
    pub config_url: String,
}

/// Pulls artifacts into a [`Store`] and pushes them back out.
pub struct RegistryClient {
    store: Arc<Store>,
    credentials: Arc<dyn CredentialProvider>,
    insecure: Vec<String>,
}

impl RegistryClient {
    pub fn new(store: Arc<Store>, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            store,
            credentials,
            insecure: Vec::new(),
        }
    }

    /// Registries reached over plain HTTP in addition to `localhost` and
    /// `127.0.0.1`.
    pub fn with_insecure_registries(mut self, registries: Vec<String>) -> Self {
        self.insecure = registries;
        self
    }

    /// Pull `reference` into the store and tag it under the given string.
    ///
    /// Returns the manifest descriptor.
    pub async fn pull(&self, reference: &str) -> Result<Descriptor> {
        let parsed = SkillReference::parse(reference)?;
        let oci_ref = to_oci_reference(&parsed)?;
        let auth = self.auth_for(&parsed.registry).await;
        let client = self.client_for(&parsed.registry);
        let registry = parsed.registry.as_str();

        tracing::info!(reference = %reference, "Pulling skill from registry");

        let (client, oci_ref, auth) = (&client, &oci_ref, &auth);
        let (raw, digest) = with_retry(
            "pull manifest",
            is_transient,
            move || async move {
                client
                    .pull_manifest_raw(oci_ref, auth, &[MEDIA_TYPE_OCI_MANIFEST])
                    .await
            },
        )
        .await
        .map_err(|e| registry_error(registry, "Failed to pull manifest", e))?;
        let raw: Vec<u8> = raw.to_vec();

        let manifest_descriptor = Descriptor::new(
            MEDIA_TYPE_OCI_MANIFEST,
            Digest::parse(&digest)?,
            raw.len() as u64,
        );
        let manifest = Manifest::from_slice(&raw)?;

        for blob in std::iter::once(&manifest.config).chain(manifest.layers.iter()) {
            if self.store.exists(&blob.digest).await? {
                tracing::debug!(digest = %blob.digest, "Blob already present");
                continue;
            }
            let remote = to_oci_descriptor(blob);
            let remote = &remote;
            let data = with_retry("pull blob", is_transient, move || async move {
                let mut data: Vec<u8> = Vec::new();
                client.pull_blob(oci_ref, remote, &mut data).await?;
                Ok::<_, OciDistributionError>(data)
            })
            .await
            .map_err(|e| {
                registry_error(registry, &format!("Failed to pull blob {}", blob.digest), e)
            })?;
            self.store.push_verified(blob, &data).await?;
            tracing::debug!(digest = %blob.digest, size = blob.size, "Pulled blob");
        }

        self.store
            .push_verified(&manifest_descriptor, &raw)
            .await?;
        self.store.tag(&manifest_descriptor, reference).await?;

        tracing::info!(
            reference = %reference,
            digest = %manifest_descriptor.digest,
            "Skill pulled successfully"
        );
        Ok(manifest_descriptor)
    }

    /// Push the locally tagged `reference` to its registry.
    pub async fn push(&self, reference: &str) -> Result<PushResult> {
        let parsed = SkillReference::parse(reference)?;
        let oci_ref = to_oci_reference(&parsed)?;

        let descriptor = self.store.resolve(reference).await?;
        let raw = self.store.fetch_bytes(&descriptor).await?;
        let manifest = Manifest::from_slice(&raw)?;
        let image_manifest: OciImageManifest = serde_json::from_slice(&raw)
            .map_err(|e| SkrError::ManifestDecode(format!("Failed to parse manifest: {}", e)))?;

        let config_data = self.store.fetch_bytes(&manifest.config).await?;
        let config = Config::new(config_data, manifest.config.media_type.clone(), None);

        let mut layers = Vec::with_capacity(manifest.layers.len());
        for layer in &manifest.layers {
            let data = self.store.fetch_bytes(layer).await?;
            tracing::debug!(digest = %layer.digest, size = data.len(), "Read layer for push");
            layers.push(ImageLayer::new(data, layer.media_type.clone(), None));
        }

        let auth = self.auth_for(&parsed.registry).await;
        let client = self.client_for(&parsed.registry);

        tracing::info!(reference = %reference, digest = %descriptor.digest, "Pushing skill to registry");

        let (client, oci_ref, auth, layers, config, image_manifest) =
            (&client, &oci_ref, &auth, &layers, &config, &image_manifest);
        let response = with_retry("push", is_transient, move || async move {
            client
                .push(
                    oci_ref,
                    layers,
                    config.clone(),
                    auth,
                    Some(image_manifest.clone()),
                )
                .await
        })
        .await
        .map_err(|e| registry_error(&parsed.registry, "Failed to push skill", e))?;

        tracing::info!(
            reference = %reference,
            manifest_url = %response.manifest_url,
            "Skill pushed successfully"
        );

        Ok(PushResult {
            manifest_url: response.manifest_url,
            config_url: response.config_url,
        })
    }

    fn client_for(&self, registry: &str) -> Client {
        let protocol = if self.is_insecure(registry) {
            ClientProtocol::Http
        } else {
            ClientProtocol::Https
        };
        Client::new(ClientConfig {
            protocol,
            ..Default::default()
        })
    }

    fn is_insecure(&self, registry: &str) -> bool {
        let host = registry.split(':').next().unwrap_or(registry);
        host == "localhost" || host == "127.0.0.1" || self.insecure.iter().any(|r| r == registry)
    }

    /// Credentials for `registry` from the provider chain, or anonymous.
    async fn auth_for(&self, registry: &str) -> RegistryAuth {
        let provider = self.credentials.clone();
        let server = registry.to_string();
        match tokio::task::spawn_blocking(move || provider.get(&server)).await {
            Ok(Ok(Some(credential))) => to_oci_auth(&credential),
            Ok(Ok(None)) => RegistryAuth::Anonymous,
            Ok(Err(e)) => {
                tracing::warn!(registry = %registry, error = %e, "Credential lookup failed, using anonymous access");
                RegistryAuth::Anonymous
            }
            Err(e) => {
                tracing::warn!(registry = %registry, error = %e, "Credential lookup task failed");
                RegistryAuth::Anonymous
            }
        }
    }
}

#[async_trait]
impl Puller for RegistryClient {
    async fn pull(&self, reference: &str) -> Result<()> {
        RegistryClient::pull(self, reference).await.map(|_| ())
    }
}

/// Convert a credential to oci-distribution auth.
///
/// Tokens are sent as the password of basic auth, which registries such as
/// GHCR accept in place of a personal password.
fn to_oci_auth(credential: &Credential) -> RegistryAuth {
    match credential {
        Credential::Basic { username, password } => {
            RegistryAuth::Basic(username.clone(), password.clone())
        }
        Credential::Token(token) => RegistryAuth::Basic("<token>".to_string(), token.clone()),
    }
}

fn to_oci_reference(reference: &SkillReference) -> Result<Reference> {
    let ref_str = reference.full_reference();
    ref_str.parse::<Reference>().map_err(|e| {
        SkrError::InvalidReference(format!("Invalid OCI reference '{}': {}", ref_str, e))
    })
}

fn to_oci_descriptor(descriptor: &Descriptor) -> OciDescriptor {
    OciDescriptor {
        media_type: descriptor.media_type.clone(),
        digest: descriptor.digest.to_string(),
        size: descriptor.size as i64,
        ..Default::default()
    }
}

fn registry_error(registry: &str, what: &str, error: OciDistributionError) -> SkrError {
    SkrError::Registry {
        registry: registry.to_string(),
        message: format!("{}: {}", what, error),
    }
}

/// Connect errors, timeouts, 5xx and 429 responses are worth retrying.
fn is_transient(error: &OciDistributionError) -> bool {
    match error {
        OciDistributionError::RequestError(e) => {
            e.is_timeout()
                || e.is_connect()
                || e.status()
                    .map(|s| s.as_u16() == 429 || s.as_u16() >= 500)
                    .unwrap_or(false)
        }
        _ => false,
    }
}

/// Run `op` up to [`MAX_ATTEMPTS`] times, doubling the delay after each
/// transient failure.
async fn with_retry<T, E, F, Fut>(
    what: &str,
    transient: impl Fn(&E) -> bool,
    mut op: F,
) -> std::result::Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    let mut delay = INITIAL_BACKOFF;
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < MAX_ATTEMPTS && transient(&e) => {
                tracing::warn!(
                    operation = what,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient registry error, retrying"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
