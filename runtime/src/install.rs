//! Skill installation.
//!
//! Materializes a resolved skill closure onto disk: every artifact's single
//! layer is unpacked into a staging directory next to the target and then
//! renamed into `<install_root>/<skill name>`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use skr_core::error::{Result, SkrError};

use crate::oci::layers::unpack_layer;
use crate::oci::manifest::Descriptor;
use crate::oci::reference::{tag_of, DEFAULT_TAG};
use crate::oci::store::Store;
use crate::resolve::{Puller, Resolver};
use crate::skill::Skill;

const STAGING_PREFIX: &str = ".skr-staging-";

/// Decides whether a locally present reference is pulled again before install.
pub trait RefreshPolicy: Send + Sync {
    fn always_refresh(&self, reference: &str) -> bool;
}

/// Refreshes references whose tag is in a fixed set of mutable tags.
///
/// References without a tag count as `latest`; digest references are
/// immutable and never refreshed.
#[derive(Debug, Clone)]
pub struct MutableTags {
    tags: HashSet<String>,
}

impl MutableTags {
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for MutableTags {
    fn default() -> Self {
        Self::new([DEFAULT_TAG])
    }
}

impl RefreshPolicy for MutableTags {
    fn always_refresh(&self, reference: &str) -> bool {
        if reference.contains('@') || reference.starts_with("sha256:") {
            return false;
        }
        let tag = tag_of(reference).unwrap_or(DEFAULT_TAG);
        self.tags.contains(tag)
    }
}

/// Installs skills from the store, pulling through an optional [`Puller`].
pub struct Installer {
    store: Arc<Store>,
    puller: Option<Arc<dyn Puller>>,
    policy: Arc<dyn RefreshPolicy>,
}

impl Installer {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            puller: None,
            policy: Arc::new(MutableTags::default()),
        }
    }

    pub fn with_puller(mut self, puller: Arc<dyn Puller>) -> Self {
        self.puller = Some(puller);
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn RefreshPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Install `reference` and its dependency closure into `install_root`.
    ///
    /// Returns the installed name of the root skill. The first failing
    /// artifact stops the install; artifacts installed before it stay.
    pub async fn install(&self, reference: &str, install_root: &Path) -> Result<String> {
        let mut resolver = Resolver::new(self.store.clone());
        if let Some(puller) = &self.puller {
            resolver = resolver.with_puller(puller.clone());
        }

        let references = resolver
            .resolve(reference)
            .await
            .map_err(|e| e.context(format!("failed to resolve dependencies for {}", reference)))?;

        let mut root_name = None;
        for current in &references {
            let name = self
                .install_one(current, install_root)
                .await
                .map_err(|e| e.context(format!("failed to install {}", current)))?;
            root_name.get_or_insert(name);
        }

        root_name.ok_or_else(|| SkrError::Other(format!("Nothing resolved for {}", reference)))
    }

    /// Install each reference independently; one failure never stops the rest.
    pub async fn install_all(
        &self,
        references: &[String],
        install_root: &Path,
    ) -> Vec<(String, Result<String>)> {
        let mut results = Vec::with_capacity(references.len());
        for reference in references {
            let result = self.install(reference, install_root).await;
            if let Err(e) = &result {
                tracing::warn!(reference = %reference, error = %e, "Skill install failed");
            }
            results.push((reference.clone(), result));
        }
        results
    }

    /// Install a single artifact without its dependencies.
    pub async fn install_one(&self, reference: &str, install_root: &Path) -> Result<String> {
        let descriptor = self.local_or_pulled(reference).await?;

        let manifest = self.store.fetch_manifest(&descriptor).await?;
        if manifest.layers.len() != 1 {
            return Err(SkrError::SchemaViolation(format!(
                "expected exactly 1 layer, got {}",
                manifest.layers.len()
            )));
        }
        let layer = self
            .store
            .fetch(&manifest.layers[0])
            .await?
            .into_std()
            .await;

        tokio::fs::create_dir_all(install_root).await?;
        let root = install_root.to_path_buf();
        let reference_owned = reference.to_string();

        let name = tokio::task::spawn_blocking(move || -> Result<String> {
            let staging = tempfile::Builder::new()
                .prefix(STAGING_PREFIX)
                .tempdir_in(&root)?;
            unpack_layer(std::io::BufReader::new(layer), staging.path())?;

            let skill = Skill::load_unverified(staging.path()).map_err(|e| {
                e.context(format!(
                    "{} is not a recognizable skill",
                    reference_owned
                ))
            })?;
            if let Err(e) = skill.validate() {
                tracing::warn!(
                    reference = %reference_owned,
                    skill = %skill.name,
                    error = %e,
                    "Installed skill has validation issues"
                );
            }
            check_install_name(&skill.name)?;

            let target = root.join(&skill.name);
            replace_dir(staging.path(), &target)?;
            Ok(skill.name)
        })
        .await
        .map_err(|e| SkrError::Other(format!("Install task failed: {}", e)))??;

        tracing::info!(
            reference = %reference,
            name = %name,
            root = %install_root.display(),
            "Installed skill"
        );
        Ok(name)
    }

    /// Remove `<install_root>/<name>`. Returns whether it existed.
    pub async fn uninstall(&self, name: &str, install_root: &Path) -> Result<bool> {
        check_install_name(name)?;
        let target = install_root.join(name);
        match tokio::fs::symlink_metadata(&target).await {
            Ok(metadata) if metadata.is_dir() => {
                tokio::fs::remove_dir_all(&target).await?;
            }
            Ok(_) => {
                tokio::fs::remove_file(&target).await?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        tracing::info!(name = %name, root = %install_root.display(), "Uninstalled skill");
        Ok(true)
    }

    /// Resolve locally, pulling when missing or when the policy asks for it.
    async fn local_or_pulled(&self, reference: &str) -> Result<Descriptor> {
        let local = match self.store.resolve(reference).await {
            Ok(descriptor) => Some(descriptor),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        if let Some(descriptor) = &local {
            if !self.policy.always_refresh(reference) {
                return Ok(descriptor.clone());
            }
        }
        let refresh = local.is_some();

        let Some(puller) = &self.puller else {
            return local.ok_or_else(|| {
                SkrError::NotFound(format!("{} is not in the local store", reference))
            });
        };

        tracing::info!(reference = %reference, refresh, "Pulling skill");
        match puller.pull(reference).await {
            Ok(()) => self
                .store
                .resolve(reference)
                .await
                .map_err(|e| e.context(format!("failed to resolve {} after pull", reference))),
            Err(e) => match local {
                Some(descriptor) => {
                    tracing::warn!(
                        reference = %reference,
                        error = %e,
                        "Refresh failed, using local copy"
                    );
                    Ok(descriptor)
                }
                None => Err(e.context(format!("failed to pull {}", reference))),
            },
        }
    }
}

/// Reject skill names that would not land directly inside the install root.
fn check_install_name(name: &str) -> Result<()> {
    let mut components = Path::new(name).components();
    let single_normal = matches!(
        (components.next(), components.next()),
        (Some(std::path::Component::Normal(_)), None)
    );
    if name.is_empty() || !single_normal || name.starts_with(STAGING_PREFIX) {
        return Err(SkrError::Skill(format!(
            "'{}' is not usable as an install directory name",
            name
        )));
    }
    Ok(())
}

/// Replace `target` with the contents of `staging`.
fn replace_dir(staging: &Path, target: &Path) -> Result<()> {
    match std::fs::symlink_metadata(target) {
        Ok(metadata) if metadata.is_dir() => std::fs::remove_dir_all(target)?,
        Ok(_) => std::fs::remove_file(target)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    if let Err(e) = std::fs::rename(staging, target) {
        tracing::debug!(error = %e, "Rename failed, copying staged skill instead");
        copy_dir_recursive(staging, target)?;
    }
    Ok(())
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path: PathBuf = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            std::fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}
