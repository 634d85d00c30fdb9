//! `skr publish` command.

use std::path::PathBuf;

use clap::Args;

use super::build::{build_skill, load_skill};
use super::GlobalArgs;

#[derive(Args)]
pub struct PublishArgs {
    /// Skill directory
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Remote reference to publish as (e.g. ghcr.io/acme/review:v1)
    #[arg(short, long)]
    pub tag: String,
}

pub async fn execute(args: PublishArgs, global: &GlobalArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store = global.open_store().await?;
    let skill = load_skill(&args.path)?;

    println!("Building skill from {}...", args.path.display());
    let descriptor = build_skill(&store, &skill, &args.tag).await?;
    println!("Built {} ({})", args.tag, descriptor.digest);

    println!("Pushing {}...", args.tag);
    let result = global
        .registry_client(store)
        .push(&args.tag)
        .await
        .map_err(|e| format!("Failed to push artifact: {e}"))?;

    println!("Published {}", args.tag);
    println!("Manifest: {}", result.manifest_url);
    Ok(())
}
