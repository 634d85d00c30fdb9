//! Project configuration and well-known paths.
//!
//! A project declares the skills it wants in `.skr.yaml`:
//!
//! ```yaml
//! agent:
//!   type: claude
//! skills:
//!   - ghcr.io/acme/review:v1
//!   - ghcr.io/acme/lint:latest
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, SkrError};

/// Project configuration file name.
pub const CONFIG_FILE_NAME: &str = ".skr.yaml";

/// Agent settings for a project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent type (informational)
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
}

/// Declarative list of skills for a project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub agent: AgentConfig,

    /// Skill references to keep installed
    #[serde(default)]
    pub skills: Vec<String>,
}

impl ProjectConfig {
    /// Load `.skr.yaml` from `dir`. A missing file yields an empty config.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE_NAME);
        if !path.exists() {
            return Ok(Self::default());
        }

        let data = std::fs::read_to_string(&path).map_err(|e| {
            SkrError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        serde_yaml::from_str(&data)
            .map_err(|e| SkrError::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Write `.skr.yaml` into `dir`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let path = dir.join(CONFIG_FILE_NAME);
        let data = serde_yaml::to_string(self)?;
        std::fs::write(&path, data).map_err(|e| {
            SkrError::Config(format!("Failed to write {}: {}", path.display(), e))
        })
    }

    /// Append a reference unless it is already listed. Returns true if added.
    pub fn add_skill(&mut self, reference: &str) -> bool {
        if self.skills.iter().any(|s| s == reference) {
            return false;
        }
        self.skills.push(reference.to_string());
        true
    }

    /// Remove a reference from the skill list. Returns true if it was present.
    pub fn remove_skill(&mut self, reference: &str) -> bool {
        let before = self.skills.len();
        self.skills.retain(|s| s != reference);
        self.skills.len() != before
    }
}

/// Default local store directory (`$XDG_DATA_HOME/skr/store`).
pub fn default_store_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from(".local/share"))
        .join("skr")
        .join("store")
}

/// Directory holding skr's own configuration (`$XDG_CONFIG_HOME/skr`).
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from(".config"))
        .join("skr")
}

/// Install root for skills available to every project (`~/.config/agent/skills`).
pub fn global_install_root() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| {
        SkrError::Config("Cannot determine home directory for global install".to_string())
    })?;
    Ok(home.join(".config").join("agent").join("skills"))
}

/// Find the nearest `.agent/skills` directory at or above `start`.
pub fn find_agent_skills_dir(start: &Path) -> Option<PathBuf> {
    start.ancestors().find_map(|dir| {
        let candidate = dir.join(".agent").join("skills");
        candidate.is_dir().then_some(candidate)
    })
}

/// Project root owning an `.agent/skills` directory.
pub fn project_root_for(agent_skills_dir: &Path) -> Option<PathBuf> {
    agent_skills_dir
        .parent()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
}
