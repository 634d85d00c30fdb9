//! `skr build` command.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use clap::Args;
use skr_runtime::oci::manifest::ANNOTATION_SOURCE;
use skr_runtime::{Descriptor, Skill, Store};

use super::GlobalArgs;

#[derive(Args)]
pub struct BuildArgs {
    /// Skill directory
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Reference to tag the artifact with (default: <name>:latest)
    #[arg(short, long)]
    pub tag: Option<String>,
}

pub async fn execute(args: BuildArgs, global: &GlobalArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store = global.open_store().await?;
    let skill = load_skill(&args.path)?;

    let tag = match args.tag {
        Some(tag) => tag,
        None => {
            let tag = format!("{}:latest", skill.name);
            println!("No tag provided. Defaulting to: {tag}");
            tag
        }
    };

    let descriptor = build_skill(&store, &skill, &tag).await?;
    println!("Successfully built skill '{}'", skill.name);
    println!("Tagged as: {tag}");
    println!("Digest: {}", descriptor.digest);
    Ok(())
}

/// Load and validate the skill in `path`.
pub(crate) fn load_skill(path: &Path) -> Result<Skill, Box<dyn std::error::Error>> {
    Skill::load(path).map_err(|e| format!("Failed to validate skill: {e}").into())
}

/// Build `skill` into the store under `tag`, annotating its git source when known.
pub(crate) async fn build_skill(
    store: &Store,
    skill: &Skill,
    tag: &str,
) -> Result<Descriptor, Box<dyn std::error::Error>> {
    let mut annotations: BTreeMap<String, String> = skill.annotations()?;
    if let Some(source) = git_source_url(&skill.path).await {
        println!("Detected git source: {source}");
        annotations.insert(ANNOTATION_SOURCE.to_string(), source);
    }

    let descriptor = store
        .build(&skill.path, tag, annotations)
        .await
        .map_err(|e| format!("Failed to build artifact: {e}"))?;
    Ok(descriptor)
}

/// `remote.origin.url` of the repository containing `dir`, as a browsable URL.
async fn git_source_url(dir: &Path) -> Option<String> {
    let output = tokio::process::Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(["config", "--get", "remote.origin.url"])
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let url = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if url.is_empty() {
        return None;
    }
    Some(normalize_git_url(&url))
}

/// Rewrite GitHub SSH remotes to HTTPS and drop the `.git` suffix.
fn normalize_git_url(url: &str) -> String {
    if let Some(path) = url.strip_prefix("git@github.com:") {
        let path = path.strip_suffix(".git").unwrap_or(path);
        return format!("https://github.com/{path}");
    }
    if url.starts_with("https://github.com/") {
        return url.strip_suffix(".git").unwrap_or(url).to_string();
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_normalize_git_url() {
        assert_eq!(
            normalize_git_url("git@github.com:acme/skills.git"),
            "https://github.com/acme/skills"
        );
        assert_eq!(
            normalize_git_url("https://github.com/acme/skills.git"),
            "https://github.com/acme/skills"
        );
        assert_eq!(
            normalize_git_url("https://gitlab.com/acme/skills.git"),
            "https://gitlab.com/acme/skills.git"
        );
    }

    #[test]
    fn test_load_skill_reports_validation_errors() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("SKILL.md"),
            "---\nname: Bad Name\ndescription: x\n---\n",
        )
        .unwrap();
        let err = load_skill(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to validate skill"));
    }

    #[tokio::test]
    async fn test_build_skill_tags_with_annotations() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("review");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(
            src.join("SKILL.md"),
            "---\nname: review\ndescription: Reviews code\ndependencies:\n  - lint:v1\n---\n",
        )
        .unwrap();

        let store = Store::open(&tmp.path().join("store")).await.unwrap();
        let skill = load_skill(&src).unwrap();
        let descriptor = build_skill(&store, &skill, "review:v1").await.unwrap();

        assert_eq!(store.resolve("review:v1").await.unwrap().digest, descriptor.digest);
        let manifest = store.fetch_manifest(&descriptor).await.unwrap();
        assert_eq!(manifest.dependencies().unwrap(), vec!["lint:v1"]);
    }
}
