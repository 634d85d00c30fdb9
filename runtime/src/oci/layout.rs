//! On-disk OCI image layout.
//!
//! ```text
//! <root>/
//! ├── oci-layout          {"imageLayoutVersion":"1.0.0"}
//! ├── index.json          one entry per tag
//! ├── blobs/<alg>/<hex>   blob bytes
//! └── ingest/             in-flight blob writes
//! ```
//!
//! Every write lands in a temporary file first and is renamed into place, so
//! readers never observe a partial blob or index.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use skr_core::error::{Result, SkrError};

use super::digest::Digest;
use super::manifest::ImageIndex;

const OCI_LAYOUT_FILE: &str = "oci-layout";
const OCI_LAYOUT_CONTENT: &str = r#"{"imageLayoutVersion":"1.0.0"}"#;
const INDEX_FILE: &str = "index.json";
const BLOBS_DIR: &str = "blobs";
const INGEST_DIR: &str = "ingest";

/// Paths and raw file operations of a store root.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn blobs_dir(&self) -> PathBuf {
        self.root.join(BLOBS_DIR)
    }

    pub fn ingest_dir(&self) -> PathBuf {
        self.root.join(INGEST_DIR)
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    /// `blobs/<alg>/<hex>` for a digest.
    pub fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.blobs_dir()
            .join(digest.algorithm().as_str())
            .join(digest.hex())
    }

    /// Create the directory tree and the `oci-layout` marker if missing.
    pub async fn init(&self) -> Result<()> {
        tokio::fs::create_dir_all(self.blobs_dir())
            .await
            .map_err(|e| {
                SkrError::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create store directory {}: {}",
                        self.root.display(),
                        e
                    ),
                ))
            })?;
        tokio::fs::create_dir_all(self.ingest_dir()).await?;

        let marker = self.root.join(OCI_LAYOUT_FILE);
        if !tokio::fs::try_exists(&marker).await? {
            tokio::fs::write(&marker, OCI_LAYOUT_CONTENT).await?;
        }
        Ok(())
    }

    /// Load `index.json`; a missing file is an empty index.
    pub async fn read_index(&self) -> Result<ImageIndex> {
        match tokio::fs::read(self.index_path()).await {
            Ok(data) => serde_json::from_slice(&data).map_err(|e| {
                SkrError::Serialization(format!("Failed to parse store index: {}", e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ImageIndex::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace `index.json` atomically.
    pub async fn write_index(&self, index: &ImageIndex) -> Result<()> {
        let data = serde_json::to_vec_pretty(index)?;
        let path = self.index_path();
        let tmp = self
            .root
            .join(format!("{}.{}.tmp", INDEX_FILE, std::process::id()));
        tokio::fs::write(&tmp, &data).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Write blob bytes under their digest through a unique ingest file.
    ///
    /// Concurrent writers of the same digest race harmlessly: both renames
    /// carry identical bytes.
    pub async fn write_blob(&self, digest: &Digest, data: Vec<u8>) -> Result<()> {
        let ingest = self.ingest_dir();
        let target = self.blob_path(digest);
        let prefix = format!("{}-", digest.hex());

        tokio::task::spawn_blocking(move || -> Result<()> {
            use std::io::Write;

            std::fs::create_dir_all(&ingest)?;
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut tmp = tempfile::Builder::new()
                .prefix(&prefix)
                .tempfile_in(&ingest)?;
            tmp.write_all(&data)?;
            tmp.persist(&target).map_err(|e| SkrError::Io(e.error))?;
            Ok(())
        })
        .await
        .map_err(|e| SkrError::Other(format!("Blob write task failed: {}", e)))?
    }

    /// Remove leftover files from interrupted writes.
    ///
    /// Only files last modified at least `older_than` ago are removed, so a
    /// write still in flight in another process keeps its ingest file.
    pub async fn clear_ingest(&self, older_than: Duration) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(self.ingest_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let now = SystemTime::now();
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age < older_than {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                // Persisted or removed by its writer meanwhile
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_creates_layout() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(&tmp.path().join("store"));
        layout.init().await.unwrap();

        let marker = std::fs::read_to_string(tmp.path().join("store/oci-layout")).unwrap();
        assert_eq!(marker, OCI_LAYOUT_CONTENT);
        assert!(layout.blobs_dir().is_dir());
        assert!(layout.ingest_dir().is_dir());

        // Idempotent
        layout.init().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_index_is_empty() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path());
        let index = layout.read_index().await.unwrap();
        assert!(index.manifests.is_empty());
        assert_eq!(index.schema_version, 2);
    }

    #[tokio::test]
    async fn test_write_blob_path() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path());
        layout.init().await.unwrap();

        let digest = Digest::from_bytes(b"hello");
        layout.write_blob(&digest, b"hello".to_vec()).await.unwrap();

        let path = tmp.path().join("blobs/sha256").join(digest.hex());
        assert_eq!(std::fs::read(path).unwrap(), b"hello");
        assert_eq!(std::fs::read_dir(layout.ingest_dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_clear_ingest() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path());
        layout.init().await.unwrap();
        std::fs::write(layout.ingest_dir().join("stale"), b"x").unwrap();

        assert_eq!(layout.clear_ingest(Duration::ZERO).await.unwrap(), 1);
        assert_eq!(std::fs::read_dir(layout.ingest_dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_clear_ingest_keeps_recent_files() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path());
        layout.init().await.unwrap();

        let fresh = layout.ingest_dir().join("fresh");
        std::fs::write(&fresh, b"x").unwrap();
        let old = layout.ingest_dir().join("old");
        std::fs::write(&old, b"x").unwrap();
        std::fs::File::options()
            .write(true)
            .open(&old)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(2 * 60 * 60))
            .unwrap();

        let removed = layout
            .clear_ingest(Duration::from_secs(60 * 60))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(fresh.is_file());
        assert!(!old.exists());
    }
}
