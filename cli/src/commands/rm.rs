//! `skr rm` command.

use clap::Args;
use skr_core::config::{ProjectConfig, CONFIG_FILE_NAME};
use skr_runtime::oci::reference::split_repository_tag;
use skr_runtime::Installer;

use super::{GlobalArgs, InstallTarget};

#[derive(Args)]
pub struct RmArgs {
    /// Installed skill name, or the reference it was installed from
    pub name: String,

    /// Remove from the global skills directory
    #[arg(short, long)]
    pub global: bool,
}

pub async fn execute(args: RmArgs, global: &GlobalArgs) -> Result<(), Box<dyn std::error::Error>> {
    let target = InstallTarget::resolve(args.global)?;

    let mut config = ProjectConfig::load(&target.config_dir)?;
    if config.remove_skill(&args.name) {
        config.save(&target.config_dir)?;
        println!(
            "Removed '{}' from {}",
            args.name,
            target.config_dir.join(CONFIG_FILE_NAME).display()
        );
    }

    let installer = Installer::new(global.open_store().await?);
    let mut removed = false;
    for candidate in directory_candidates(&args.name) {
        if installer.uninstall(candidate, &target.install_root).await? {
            println!("Removed skill directory {}", target.install_root.join(candidate).display());
            removed = true;
            break;
        }
    }

    if !removed {
        println!(
            "Warning: no installed skill named '{}' in {}",
            args.name,
            target.install_root.display()
        );
    }
    Ok(())
}

/// Directory names to try for `name`: itself when it is a plain name, then
/// the last repository segment when it looks like a reference.
fn directory_candidates(name: &str) -> Vec<&str> {
    let mut candidates = Vec::new();
    if !name.contains(|c: char| matches!(c, '/' | ':' | '@')) {
        candidates.push(name);
    }
    let without_digest = name.split('@').next().unwrap_or(name);
    let (repository, _) = split_repository_tag(without_digest);
    if let Some(last) = repository.rsplit('/').next() {
        if !last.is_empty() && !last.contains(':') && !candidates.contains(&last) {
            candidates.push(last);
        }
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_candidates() {
        assert_eq!(directory_candidates("review"), vec!["review"]);
        assert_eq!(directory_candidates("review:v1"), vec!["review"]);
        assert_eq!(directory_candidates("ghcr.io/acme/review:v1"), vec!["review"]);
        assert_eq!(
            directory_candidates("localhost:5000/review@sha256:abc"),
            vec!["review"]
        );
    }
}
