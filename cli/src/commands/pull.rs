//! `skr pull` command.

use clap::Args;

use super::GlobalArgs;

#[derive(Args)]
pub struct PullArgs {
    /// Remote reference to pull (e.g. ghcr.io/acme/review:v1)
    pub reference: String,
}

pub async fn execute(args: PullArgs, global: &GlobalArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store = global.open_store().await?;
    let client = global.registry_client(store);

    println!("Pulling {}...", args.reference);
    let descriptor = client.pull(&args.reference).await?;
    println!("Pulled {}", args.reference);
    println!("Digest: {}", descriptor.digest);
    Ok(())
}
