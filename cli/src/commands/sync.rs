//! `skr sync` command.

use clap::Args;
use skr_core::config::{ProjectConfig, CONFIG_FILE_NAME};

use super::{GlobalArgs, InstallTarget};

#[derive(Args)]
pub struct SyncArgs {
    /// Sync the global skills directory
    #[arg(short, long)]
    pub global: bool,
}

pub async fn execute(args: SyncArgs, global: &GlobalArgs) -> Result<(), Box<dyn std::error::Error>> {
    let target = InstallTarget::resolve(args.global)?;
    let config = ProjectConfig::load(&target.config_dir)?;
    if config.skills.is_empty() {
        println!("No skills defined in {}. Nothing to sync.", CONFIG_FILE_NAME);
        return Ok(());
    }

    let store = global.open_store().await?;
    let results = global
        .installer(store)
        .install_all(&config.skills, &target.install_root)
        .await;

    let mut failed = 0usize;
    for (reference, result) in &results {
        match result {
            Ok(name) => println!("Synced {reference} -> {name}"),
            Err(e) => {
                failed += 1;
                eprintln!("Failed to sync {reference}: {e}");
            }
        }
    }

    if failed > 0 {
        return Err(format!("{} of {} skills failed to sync", failed, results.len()).into());
    }
    println!("Synced {} skills into {}", results.len(), target.install_root.display());
    Ok(())
}
