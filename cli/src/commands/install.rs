//! `skr install` command.

use clap::Args;
use skr_core::config::{ProjectConfig, CONFIG_FILE_NAME};

use super::{GlobalArgs, InstallTarget};

#[derive(Args)]
pub struct InstallArgs {
    /// Skill reference (tag or digest)
    pub reference: String,

    /// Install into the global skills directory
    #[arg(short, long)]
    pub global: bool,
}

pub async fn execute(args: InstallArgs, global: &GlobalArgs) -> Result<(), Box<dyn std::error::Error>> {
    let target = InstallTarget::resolve(args.global)?;
    println!("Installing to {}", target.install_root.display());

    let store = global.open_store().await?;
    let name = global
        .installer(store)
        .install(&args.reference, &target.install_root)
        .await?;
    println!(
        "Installed skill '{}' to {}",
        name,
        target.install_root.join(&name).display()
    );

    let mut config = ProjectConfig::load(&target.config_dir)?;
    if config.add_skill(&args.reference) {
        std::fs::create_dir_all(&target.config_dir)?;
        config.save(&target.config_dir)?;
        println!(
            "Added {} to {}",
            args.reference,
            target.config_dir.join(CONFIG_FILE_NAME).display()
        );
    }
    Ok(())
}
