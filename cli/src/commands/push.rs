//! `skr push` command.

use clap::Args;

use super::GlobalArgs;

#[derive(Args)]
pub struct PushArgs {
    /// Local reference to push (e.g. ghcr.io/acme/review:v1)
    pub reference: String,
}

pub async fn execute(args: PushArgs, global: &GlobalArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store = global.open_store().await?;
    let client = global.registry_client(store);

    println!("Pushing {}...", args.reference);
    let result = client.push(&args.reference).await?;
    println!("Pushed {}", args.reference);
    println!("Manifest: {}", result.manifest_url);
    Ok(())
}
