//! `SKILL.md` descriptor parsing and validation.
//!
//! A skill directory carries a `SKILL.md` whose YAML front matter names the
//! skill and lists its dependencies:
//!
//! ```text
//! ---
//! name: code-review
//! description: Reviews pull requests
//! dependencies:
//!   - ghcr.io/acme/git-basics:v1
//! metadata:
//!   author: acme
//!   version: 1.2.0
//! ---
//! Free-form instructions follow.
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use skr_core::error::{Result, SkrError};

use crate::oci::manifest::{
    ANNOTATION_AUTHOR, ANNOTATION_DEPENDENCIES, ANNOTATION_DESCRIPTION, ANNOTATION_VERSION,
};

/// Descriptor file name at the root of every skill directory.
pub const SKILL_FILE_NAME: &str = "SKILL.md";

const MAX_NAME_LEN: usize = 64;
const MAX_DESCRIPTION_LEN: usize = 1024;

/// Optional authoring metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Front matter of a `SKILL.md`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skill {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub metadata: SkillMetadata,
    /// Directory the descriptor was loaded from.
    #[serde(skip)]
    pub path: PathBuf,
}

impl Skill {
    /// Load and validate the skill in `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let skill = Self::load_unverified(dir)?;
        skill
            .validate()
            .map_err(|e| SkrError::Skill(format!("Invalid skill in {}: {}", dir.display(), e)))?;
        Ok(skill)
    }

    /// Load the skill in `dir` without validating its fields.
    pub fn load_unverified(dir: &Path) -> Result<Self> {
        let path = dir.join(SKILL_FILE_NAME);
        let metadata = std::fs::metadata(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SkrError::Skill(format!(
                    "Skill directory {} must contain a {} file",
                    dir.display(),
                    SKILL_FILE_NAME
                ))
            } else {
                SkrError::Skill(format!("Failed to check {}: {}", path.display(), e))
            }
        })?;
        if metadata.is_dir() {
            return Err(SkrError::Skill(format!(
                "{} must be a file, not a directory",
                SKILL_FILE_NAME
            )));
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| SkrError::Skill(format!("Failed to read {}: {}", path.display(), e)))?;

        let mut skill = parse_front_matter(&content)?;
        skill.path = dir.to_path_buf();
        Ok(skill)
    }

    /// Check name and description constraints.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(SkrError::Skill("name is required".to_string()));
        }
        if self.name.len() > MAX_NAME_LEN {
            return Err(SkrError::Skill(format!(
                "name must be {} characters or less",
                MAX_NAME_LEN
            )));
        }
        if !self
            .name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        {
            return Err(SkrError::Skill(
                "name must contain only lowercase alphanumeric characters and hyphens".to_string(),
            ));
        }

        if self.description.is_empty() {
            return Err(SkrError::Skill("description is required".to_string()));
        }
        if self.description.len() > MAX_DESCRIPTION_LEN {
            return Err(SkrError::Skill(format!(
                "description must be {} characters or less",
                MAX_DESCRIPTION_LEN
            )));
        }

        Ok(())
    }

    /// Manifest annotations describing this skill.
    pub fn annotations(&self) -> Result<BTreeMap<String, String>> {
        let mut annotations = BTreeMap::new();
        if !self.description.is_empty() {
            annotations.insert(ANNOTATION_DESCRIPTION.to_string(), self.description.clone());
        }
        if let Some(author) = &self.metadata.author {
            annotations.insert(ANNOTATION_AUTHOR.to_string(), author.clone());
        }
        if let Some(version) = &self.metadata.version {
            annotations.insert(ANNOTATION_VERSION.to_string(), version.clone());
        }
        if !self.dependencies.is_empty() {
            annotations.insert(
                ANNOTATION_DEPENDENCIES.to_string(),
                serde_json::to_string(&self.dependencies)?,
            );
        }
        Ok(annotations)
    }
}

/// Extract and decode the YAML block between the leading `---` lines.
fn parse_front_matter(content: &str) -> Result<Skill> {
    let rest = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))
        .ok_or_else(|| {
            SkrError::Skill(format!(
                "{} is missing the front matter start delimiter '---'",
                SKILL_FILE_NAME
            ))
        })?;

    let end = closing_delimiter(rest).ok_or_else(|| {
        SkrError::Skill(format!(
            "{} is missing the front matter end delimiter '---'",
            SKILL_FILE_NAME
        ))
    })?;

    let front_matter = &rest[..end];
    if front_matter.trim().is_empty() {
        return Ok(Skill::default());
    }

    serde_yaml::from_str(front_matter).map_err(|e| {
        SkrError::Skill(format!(
            "Failed to parse {} front matter: {}",
            SKILL_FILE_NAME, e
        ))
    })
}

/// Byte offset of the first line that is exactly `---`.
fn closing_delimiter(rest: &str) -> Option<usize> {
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(|c| c == '\n' || c == '\r') == "---" {
            return Some(offset);
        }
        offset += line.len();
    }
    None
}
