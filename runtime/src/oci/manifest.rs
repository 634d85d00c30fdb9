//! OCI descriptors, manifests and the image index.
//!
//! Only the subset of the OCI image spec that skill artifacts use is modeled:
//! a manifest has one config descriptor, an ordered list of layer
//! descriptors and a string annotation map.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use skr_core::error::{Result, SkrError};

use super::digest::Digest;

/// Media type of a skill layer (tar+gzip of the skill directory).
pub const MEDIA_TYPE_SKILL_LAYER: &str = "application/vnd.agentskills.skill.layer.v1+tar+gzip";

/// Media type of a skill config document.
pub const MEDIA_TYPE_SKILL_CONFIG: &str = "application/vnd.agentskills.skill.config.v1+json";

/// Media type of an OCI image manifest.
pub const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";

/// Media type of an OCI image index.
pub const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// Annotation carrying the skill description.
pub const ANNOTATION_DESCRIPTION: &str = "com.skr.description";
/// Annotation carrying the skill author.
pub const ANNOTATION_AUTHOR: &str = "com.skr.author";
/// Annotation carrying the skill version.
pub const ANNOTATION_VERSION: &str = "com.skr.version";
/// Annotation carrying a JSON array of dependency references.
pub const ANNOTATION_DEPENDENCIES: &str = "com.skr.dependencies";
/// Standard annotation for the source repository URL.
pub const ANNOTATION_SOURCE: &str = "org.opencontainers.image.source";
/// Standard annotation naming the tag of an index entry.
pub const ANNOTATION_REF_NAME: &str = "org.opencontainers.image.ref.name";

/// Reference to a blob: media type, digest and size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: Digest,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl Descriptor {
    pub fn new(media_type: impl Into<String>, digest: Digest, size: u64) -> Self {
        Self {
            media_type: media_type.into(),
            digest,
            size,
            annotations: None,
        }
    }

    /// Descriptor for `data` with its SHA-256 digest.
    pub fn for_bytes(media_type: impl Into<String>, data: &[u8]) -> Self {
        Self::new(media_type, Digest::from_bytes(data), data.len() as u64)
    }
}

/// OCI image manifest for a skill artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub config: Descriptor,
    #[serde(default)]
    pub layers: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Manifest {
    /// A schema 2 OCI manifest.
    pub fn new(
        config: Descriptor,
        layers: Vec<Descriptor>,
        annotations: BTreeMap<String, String>,
    ) -> Self {
        Self {
            schema_version: 2,
            media_type: Some(MEDIA_TYPE_OCI_MANIFEST.to_string()),
            config,
            layers,
            annotations,
        }
    }

    /// Decode a manifest document.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data)
            .map_err(|e| SkrError::ManifestDecode(format!("Failed to parse manifest: {}", e)))
    }

    /// Encode as compact JSON (the bytes that get hashed).
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Dependency references from the `com.skr.dependencies` annotation.
    ///
    /// Missing annotation means no dependencies; a malformed one is an error.
    pub fn dependencies(&self) -> Result<Vec<String>> {
        match self.annotations.get(ANNOTATION_DEPENDENCIES) {
            None => Ok(Vec::new()),
            Some(raw) => serde_json::from_str(raw).map_err(|e| {
                SkrError::ManifestDecode(format!("Failed to parse dependencies annotation: {}", e))
            }),
        }
    }

    /// All blob digests this manifest references (config first).
    pub fn referenced_digests(&self) -> impl Iterator<Item = &Digest> {
        std::iter::once(&self.config.digest).chain(self.layers.iter().map(|l| &l.digest))
    }
}

/// OCI image index, used as the on-disk tag index (`index.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageIndex {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default)]
    pub manifests: Vec<Descriptor>,
}

impl Default for ImageIndex {
    fn default() -> Self {
        Self {
            schema_version: 2,
            media_type: Some(MEDIA_TYPE_OCI_INDEX.to_string()),
            manifests: Vec::new(),
        }
    }
}
