//! Content-addressed skill artifact store.
//!
//! Blobs live in an OCI image layout keyed by digest; tags map reference
//! strings to manifest descriptors through `index.json`. Blobs are only ever
//! removed by [`Store::prune`].

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use skr_core::error::{Result, SkrError};
use tokio::sync::Mutex;

use super::digest::Digest;
use super::layers::create_layer;
use super::layout::Layout;
use super::manifest::{
    Descriptor, Manifest, ANNOTATION_REF_NAME, MEDIA_TYPE_OCI_MANIFEST, MEDIA_TYPE_SKILL_CONFIG,
    MEDIA_TYPE_SKILL_LAYER,
};
use super::reference::{tag_of, SkillReference, DEFAULT_TAG};

/// Ingest files younger than this may belong to a write still in progress.
const INGEST_GRACE: Duration = Duration::from_secs(60 * 60);

/// Blob statistics of a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreUsage {
    pub tags: usize,
    pub blobs: usize,
    pub bytes: u64,
}

/// Local skill artifact store.
pub struct Store {
    layout: Layout,
    /// Serializes index read-modify-write cycles within this process.
    index_lock: Mutex<()>,
}

impl Store {
    /// Open a store, creating its layout if missing.
    pub async fn open(root: &Path) -> Result<Self> {
        let layout = Layout::new(root);
        layout.init().await?;
        tracing::debug!(root = %root.display(), "Opened skill store");
        Ok(Self {
            layout,
            index_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    /// Whether a blob with this digest is stored.
    pub async fn exists(&self, digest: &Digest) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.layout.blob_path(digest)).await?)
    }

    /// Store `data` under its SHA-256 digest, skipping the write if present.
    pub async fn push_blob(&self, media_type: &str, data: &[u8]) -> Result<Descriptor> {
        let descriptor = Descriptor::for_bytes(media_type, data);
        if !self.exists(&descriptor.digest).await? {
            self.layout
                .write_blob(&descriptor.digest, data.to_vec())
                .await?;
            tracing::debug!(digest = %descriptor.digest, size = descriptor.size, "Stored blob");
        }
        Ok(descriptor)
    }

    /// Store `data` for an expected descriptor, verifying size and digest.
    pub async fn push_verified(&self, expected: &Descriptor, data: &[u8]) -> Result<()> {
        if data.len() as u64 != expected.size {
            return Err(SkrError::Other(format!(
                "Size mismatch for {}: expected {} bytes, got {}",
                expected.digest,
                expected.size,
                data.len()
            )));
        }
        let actual = expected.digest.compute_like(data);
        if actual != expected.digest {
            return Err(SkrError::Other(format!(
                "Digest mismatch: expected {}, got {}",
                expected.digest, actual
            )));
        }
        if !self.exists(&expected.digest).await? {
            self.layout
                .write_blob(&expected.digest, data.to_vec())
                .await?;
        }
        Ok(())
    }

    /// Pack `src_dir` into a skill artifact and optionally tag it.
    ///
    /// The tag is written last, so a failed or cancelled build leaves
    /// at most unreferenced blobs behind.
    pub async fn build(
        &self,
        src_dir: &Path,
        reference: &str,
        annotations: BTreeMap<String, String>,
    ) -> Result<Descriptor> {
        let src: PathBuf = src_dir.to_path_buf();
        let layer = tokio::task::spawn_blocking(move || create_layer(&src))
            .await
            .map_err(|e| SkrError::Other(format!("Layer build task failed: {}", e)))??;
        let layer = self.push_blob(MEDIA_TYPE_SKILL_LAYER, &layer).await?;

        let config = serde_json::to_vec(&serde_json::json!({
            "created": Utc::now().to_rfc3339(),
        }))?;
        let config = self.push_blob(MEDIA_TYPE_SKILL_CONFIG, &config).await?;

        let manifest = Manifest::new(config, vec![layer], annotations);
        let descriptor = self
            .push_blob(MEDIA_TYPE_OCI_MANIFEST, &manifest.to_vec()?)
            .await?;

        if !reference.is_empty() {
            self.tag(&descriptor, reference).await?;
        }

        tracing::info!(
            source = %src_dir.display(),
            reference = %reference,
            digest = %descriptor.digest,
            "Built skill artifact"
        );
        Ok(descriptor)
    }

    /// Point `reference` at `descriptor`, replacing any previous mapping.
    pub async fn tag(&self, descriptor: &Descriptor, reference: &str) -> Result<()> {
        SkillReference::parse(reference)?;
        if !self.exists(&descriptor.digest).await? {
            return Err(SkrError::NotFound(format!(
                "Cannot tag {}: blob {} is not stored",
                reference, descriptor.digest
            )));
        }

        let _guard = self.index_lock.lock().await;
        let mut index = self.layout.read_index().await?;
        index
            .manifests
            .retain(|entry| ref_name(entry) != Some(reference));

        let mut entry = descriptor.clone();
        let mut annotations = entry.annotations.take().unwrap_or_default();
        annotations.insert(ANNOTATION_REF_NAME.to_string(), reference.to_string());
        entry.annotations = Some(annotations);
        index.manifests.push(entry);

        self.layout.write_index(&index).await?;
        tracing::debug!(reference = %reference, digest = %descriptor.digest, "Tagged artifact");
        Ok(())
    }

    /// Remove a tag mapping. Returns whether the tag existed.
    pub async fn untag(&self, reference: &str) -> Result<bool> {
        let _guard = self.index_lock.lock().await;
        let mut index = self.layout.read_index().await?;
        let before = index.manifests.len();
        index
            .manifests
            .retain(|entry| ref_name(entry) != Some(reference));
        let removed = index.manifests.len() != before;
        if removed {
            self.layout.write_index(&index).await?;
            tracing::debug!(reference = %reference, "Removed tag");
        }
        Ok(removed)
    }

    /// Resolve a tag or digest reference to a manifest descriptor.
    pub async fn resolve(&self, reference: &str) -> Result<Descriptor> {
        let reference = reference.trim();
        if let Some(digest) = digest_part(reference) {
            let digest = Digest::parse(digest)?;
            return self.resolve_digest(&digest, reference).await;
        }

        SkillReference::parse(reference)?;
        let index = self.layout.read_index().await?;
        let find = |name: &str| {
            index
                .manifests
                .iter()
                .find(|entry| ref_name(entry) == Some(name))
                .map(strip_ref_name)
        };

        if let Some(found) = find(reference) {
            return Ok(found);
        }
        if tag_of(reference).is_none() {
            if let Some(found) = find(&format!("{}:{}", reference, DEFAULT_TAG)) {
                return Ok(found);
            }
        }

        Err(SkrError::NotFound(format!("Skill not found: {}", reference)))
    }

    async fn resolve_digest(&self, digest: &Digest, reference: &str) -> Result<Descriptor> {
        let index = self.layout.read_index().await?;
        if let Some(entry) = index.manifests.iter().find(|e| &e.digest == digest) {
            return Ok(strip_ref_name(entry));
        }

        let data = match tokio::fs::read(self.layout.blob_path(digest)).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SkrError::NotFound(format!("Skill not found: {}", reference)));
            }
            Err(e) => return Err(e.into()),
        };

        let media_type = serde_json::from_slice::<serde_json::Value>(&data)
            .ok()
            .and_then(|doc| {
                doc.get("mediaType")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| MEDIA_TYPE_OCI_MANIFEST.to_string());

        Ok(Descriptor::new(media_type, digest.clone(), data.len() as u64))
    }

    /// Open the blob for a descriptor.
    pub async fn fetch(&self, descriptor: &Descriptor) -> Result<tokio::fs::File> {
        match tokio::fs::File::open(self.layout.blob_path(&descriptor.digest)).await {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(SkrError::NotFound(
                format!("Blob not found: {}", descriptor.digest),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Read a whole blob into memory.
    pub async fn fetch_bytes(&self, descriptor: &Descriptor) -> Result<Vec<u8>> {
        match tokio::fs::read(self.layout.blob_path(&descriptor.digest)).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(SkrError::NotFound(
                format!("Blob not found: {}", descriptor.digest),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Read and decode a manifest blob.
    pub async fn fetch_manifest(&self, descriptor: &Descriptor) -> Result<Manifest> {
        let data = self.fetch_bytes(descriptor).await?;
        Manifest::from_slice(&data)
    }

    /// All tag strings, in index order.
    pub async fn list(&self) -> Result<Vec<String>> {
        let index = self.layout.read_index().await?;
        Ok(index
            .manifests
            .iter()
            .filter_map(|entry| ref_name(entry).map(str::to_string))
            .collect())
    }

    /// Delete every blob not reachable from a tag.
    ///
    /// Returns the number of deleted blobs and the bytes reclaimed. Aborts
    /// before deleting anything if a tagged manifest cannot be read.
    pub async fn prune(&self) -> Result<(usize, u64)> {
        let blobs_dir = self.layout.blobs_dir();
        if !tokio::fs::try_exists(&blobs_dir).await? {
            return Ok((0, 0));
        }

        // Hold the index lock so no tag appears mid-sweep
        let _guard = self.index_lock.lock().await;
        let index = self.layout.read_index().await?;

        let mut marked: HashSet<Digest> = HashSet::new();
        for entry in &index.manifests {
            let manifest = self.fetch_manifest(entry).await.map_err(|e| {
                SkrError::Other(format!(
                    "Prune aborted: cannot read manifest for tag '{}': {}",
                    ref_name(entry).unwrap_or("<untagged>"),
                    e
                ))
            })?;
            marked.insert(entry.digest.clone());
            marked.extend(manifest.referenced_digests().cloned());
        }

        let mut count = 0usize;
        let mut bytes = 0u64;
        for (digest, path, size) in self.scan_blobs().await? {
            if marked.contains(&digest) {
                continue;
            }
            tokio::fs::remove_file(&path).await?;
            count += 1;
            bytes += size;
            tracing::debug!(digest = %digest, size, "Pruned blob");
        }

        let stale = self.layout.clear_ingest(INGEST_GRACE).await?;
        if stale > 0 {
            tracing::debug!(count = stale, "Removed stale ingest files");
        }

        tracing::info!(count, bytes, "Pruned unreferenced blobs");
        Ok((count, bytes))
    }

    /// Tag count, blob count and total blob size.
    pub async fn usage(&self) -> Result<StoreUsage> {
        let tags = self.list().await?.len();
        let blobs = self.scan_blobs().await?;
        Ok(StoreUsage {
            tags,
            blobs: blobs.len(),
            bytes: blobs.iter().map(|(_, _, size)| size).sum(),
        })
    }

    /// Every well-named blob file under `blobs/<alg>/`.
    async fn scan_blobs(&self) -> Result<Vec<(Digest, PathBuf, u64)>> {
        let mut found = Vec::new();
        let mut algorithms = match tokio::fs::read_dir(self.layout.blobs_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(found),
            Err(e) => return Err(e.into()),
        };

        while let Some(alg_entry) = algorithms.next_entry().await? {
            if !alg_entry.file_type().await?.is_dir() {
                continue;
            }
            let alg = alg_entry.file_name().to_string_lossy().to_string();
            let mut blobs = tokio::fs::read_dir(alg_entry.path()).await?;
            while let Some(blob) = blobs.next_entry().await? {
                let metadata = blob.metadata().await?;
                if !metadata.is_file() {
                    continue;
                }
                let name = blob.file_name().to_string_lossy().to_string();
                match Digest::parse(&format!("{}:{}", alg, name)) {
                    Ok(digest) => found.push((digest, blob.path(), metadata.len())),
                    Err(_) => {
                        tracing::warn!(path = %blob.path().display(), "Ignoring foreign file in blob area");
                    }
                }
            }
        }
        Ok(found)
    }
}

/// The digest portion of `sha256:…` or `name@sha256:…` references.
fn digest_part(reference: &str) -> Option<&str> {
    if let Some((_, digest)) = reference.rsplit_once('@') {
        return Some(digest);
    }
    if reference.starts_with("sha256:") || reference.starts_with("sha512:") {
        return Some(reference);
    }
    None
}

fn ref_name(entry: &Descriptor) -> Option<&str> {
    entry
        .annotations
        .as_ref()
        .and_then(|a| a.get(ANNOTATION_REF_NAME))
        .map(String::as_str)
}

/// Index entry without the tag annotation.
fn strip_ref_name(entry: &Descriptor) -> Descriptor {
    let mut descriptor = entry.clone();
    if let Some(annotations) = descriptor.annotations.as_mut() {
        annotations.remove(ANNOTATION_REF_NAME);
        if annotations.is_empty() {
            descriptor.annotations = None;
        }
    }
    descriptor
}
