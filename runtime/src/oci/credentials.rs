//! Registry credentials.
//!
//! Credentials are looked up through a chain of providers, first hit wins:
//! the OS keyring, the JSON credential file written by `registry login`, and
//! a hand-edited `authentication.yaml`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use skr_core::error::{Result, SkrError};

/// Keyring service name for stored credentials.
pub const KEYRING_SERVICE: &str = "skr";

/// Credential for one registry.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Basic { username: String, password: String },
    Token(String),
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Credential::Token(_) => f.debug_tuple("Token").field(&"<redacted>").finish(),
        }
    }
}

/// Source of registry credentials.
pub trait CredentialProvider: Send + Sync {
    /// Credentials for `server`, or `None` when this provider has none.
    fn get(&self, server: &str) -> Result<Option<Credential>>;
}

/// Username/password pair as persisted by the keyring and the JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CredentialEntry {
    username: String,
    password: String,
}

/// Credentials kept in the OS keyring, one entry per registry.
pub struct KeyringProvider {
    service: String,
}

impl KeyringProvider {
    pub fn new() -> Self {
        Self::with_service(KEYRING_SERVICE)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, server: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, &normalize_registry(server))
            .map_err(|e| SkrError::Config(format!("keyring entry error: {}", e)))
    }

    /// Save username and password for `server`.
    pub fn store(&self, server: &str, username: &str, password: &str) -> Result<()> {
        let payload = serde_json::to_string(&CredentialEntry {
            username: username.to_string(),
            password: password.to_string(),
        })?;
        self.entry(server)?
            .set_password(&payload)
            .map_err(|e| SkrError::Config(format!("keyring set error: {}", e)))
    }

    /// Delete the entry for `server`. Returns whether one existed.
    pub fn remove(&self, server: &str) -> Result<bool> {
        match self.entry(server)?.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(SkrError::Config(format!("keyring delete error: {}", e))),
        }
    }
}

impl Default for KeyringProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialProvider for KeyringProvider {
    fn get(&self, server: &str) -> Result<Option<Credential>> {
        let data = match self.entry(server)?.get_password() {
            Ok(data) => data,
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(e) => return Err(SkrError::Config(format!("keyring get error: {}", e))),
        };
        let entry: CredentialEntry = serde_json::from_str(&data)
            .map_err(|e| SkrError::Config(format!("Failed to parse keyring data: {}", e)))?;
        Ok(Some(Credential::Basic {
            username: entry.username,
            password: entry.password,
        }))
    }
}

/// Persistent credential file format.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CredentialFile {
    registries: HashMap<String, CredentialEntry>,
}

/// JSON credential file, used when no keyring is available.
///
/// Stored at `<config dir>/skr/auth.json` and written atomically.
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Credential store at the default path.
    pub fn default_path() -> Self {
        Self {
            path: skr_core::config::config_dir().join("auth.json"),
        }
    }

    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Store credentials for a registry. Overwrites an existing entry.
    pub fn store(&self, registry: &str, username: &str, password: &str) -> Result<()> {
        let mut file = self.load()?;
        file.registries.insert(
            normalize_registry(registry),
            CredentialEntry {
                username: username.to_string(),
                password: password.to_string(),
            },
        );
        self.save(&file)
    }

    /// Username and password for a registry.
    pub fn lookup(&self, registry: &str) -> Result<Option<(String, String)>> {
        let file = self.load()?;
        Ok(file
            .registries
            .get(&normalize_registry(registry))
            .map(|e| (e.username.clone(), e.password.clone())))
    }

    /// Remove credentials for a registry. Returns true if the entry existed.
    pub fn remove(&self, registry: &str) -> Result<bool> {
        let mut file = self.load()?;
        let removed = file
            .registries
            .remove(&normalize_registry(registry))
            .is_some();
        if removed {
            self.save(&file)?;
        }
        Ok(removed)
    }

    /// All registries with stored credentials, sorted.
    pub fn list_registries(&self) -> Result<Vec<String>> {
        let file = self.load()?;
        let mut registries: Vec<String> = file.registries.keys().cloned().collect();
        registries.sort();
        Ok(registries)
    }

    fn load(&self) -> Result<CredentialFile> {
        if !self.path.exists() {
            return Ok(CredentialFile::default());
        }
        let data = std::fs::read_to_string(&self.path).map_err(|e| {
            SkrError::Config(format!(
                "Failed to read credential store {}: {}",
                self.path.display(),
                e
            ))
        })?;
        serde_json::from_str(&data).map_err(|e| {
            SkrError::Config(format!(
                "Failed to parse credential store {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    /// Write to a temporary file, then rename over the store.
    fn save(&self, file: &CredentialFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SkrError::Config(format!(
                    "Failed to create credential store directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let tmp_path = self.path.with_extension("tmp");
        let data = serde_json::to_string_pretty(file)?;
        std::fs::write(&tmp_path, &data).map_err(|e| {
            SkrError::Config(format!(
                "Failed to write credential store {}: {}",
                tmp_path.display(),
                e
            ))
        })?;
        restrict_permissions(&tmp_path);
        std::fs::rename(&tmp_path, &self.path).map_err(|e| {
            SkrError::Config(format!(
                "Failed to rename credential store {} -> {}: {}",
                tmp_path.display(),
                self.path.display(),
                e
            ))
        })?;
        Ok(())
    }
}

impl CredentialProvider for CredentialStore {
    fn get(&self, server: &str) -> Result<Option<Credential>> {
        Ok(self
            .lookup(server)?
            .map(|(username, password)| Credential::Basic { username, password }))
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
        tracing::debug!(path = %path.display(), error = %e, "Could not restrict credential file mode");
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}

#[derive(Debug, Default, Deserialize)]
struct YamlCredential {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    token: String,
}

/// Hand-maintained `authentication.yaml` keyed by server:
///
/// ```yaml
/// ghcr.io:
///   token: ghp_xxx
/// registry.example.com:
///   username: me
///   password: secret
/// ```
pub struct YamlFileProvider {
    path: PathBuf,
}

impl YamlFileProvider {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Provider for `<config dir>/skr/authentication.yaml`.
    pub fn default_path() -> Self {
        Self::new(skr_core::config::config_dir().join("authentication.yaml"))
    }
}

impl CredentialProvider for YamlFileProvider {
    fn get(&self, server: &str) -> Result<Option<Credential>> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let entries: HashMap<String, YamlCredential> =
            serde_yaml::from_str(&data).map_err(|e| {
                SkrError::Config(format!(
                    "Failed to parse {}: {}",
                    self.path.display(),
                    e
                ))
            })?;

        let wanted = normalize_registry(server);
        let Some(entry) = entries
            .get(server)
            .or_else(|| {
                entries
                    .iter()
                    .find(|(key, _)| normalize_registry(key) == wanted)
                    .map(|(_, entry)| entry)
            })
        else {
            return Ok(None);
        };

        if !entry.token.is_empty() {
            return Ok(Some(Credential::Token(entry.token.clone())));
        }
        if !entry.username.is_empty() && !entry.password.is_empty() {
            return Ok(Some(Credential::Basic {
                username: entry.username.clone(),
                password: entry.password.clone(),
            }));
        }
        tracing::warn!(server = %server, path = %self.path.display(), "Incomplete credentials");
        Ok(None)
    }
}

/// Ordered providers; the first one that has a credential wins.
///
/// A failing provider is logged and skipped.
#[derive(Clone, Default)]
pub struct ChainProvider {
    providers: Vec<Arc<dyn CredentialProvider>>,
}

impl ChainProvider {
    pub fn new(providers: Vec<Arc<dyn CredentialProvider>>) -> Self {
        Self { providers }
    }

    /// Keyring, then the JSON credential file, then `authentication.yaml`.
    pub fn default_chain() -> Self {
        Self::new(vec![
            Arc::new(KeyringProvider::new()),
            Arc::new(CredentialStore::default_path()),
            Arc::new(YamlFileProvider::default_path()),
        ])
    }
}

impl CredentialProvider for ChainProvider {
    fn get(&self, server: &str) -> Result<Option<Credential>> {
        for (position, provider) in self.providers.iter().enumerate() {
            match provider.get(server) {
                Ok(Some(credential)) => return Ok(Some(credential)),
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(server = %server, position, error = %e, "Credential provider failed");
                }
            }
        }
        Ok(None)
    }
}

/// Where `login` saved the credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginBackend {
    Keyring,
    File,
}

/// Save credentials in the keyring, falling back to the JSON file.
pub fn login(
    keyring: &KeyringProvider,
    file: &CredentialStore,
    server: &str,
    username: &str,
    password: &str,
) -> Result<LoginBackend> {
    match keyring.store(server, username, password) {
        Ok(()) => Ok(LoginBackend::Keyring),
        Err(e) => {
            tracing::warn!(server = %server, error = %e, "Keyring unavailable, storing credentials in file");
            file.store(server, username, password)?;
            Ok(LoginBackend::File)
        }
    }
}

/// Remove credentials from the keyring and the JSON file.
///
/// Returns whether anything was removed.
pub fn logout(keyring: &KeyringProvider, file: &CredentialStore, server: &str) -> Result<bool> {
    let from_keyring = match keyring.remove(server) {
        Ok(removed) => removed,
        Err(e) => {
            tracing::debug!(server = %server, error = %e, "Keyring logout failed");
            false
        }
    };
    let from_file = file.remove(server)?;
    Ok(from_keyring || from_file)
}

/// Normalize registry names ("docker.io" and aliases → "index.docker.io").
pub fn normalize_registry(registry: &str) -> String {
    let r = registry.trim().to_lowercase();
    let r = r
        .strip_prefix("https://")
        .or_else(|| r.strip_prefix("http://"))
        .unwrap_or(&r)
        .trim_end_matches('/')
        .to_string();
    if r == "docker.io" || r == "registry-1.docker.io" {
        "index.docker.io".to_string()
    } else {
        r
    }
}
