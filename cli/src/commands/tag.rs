//! `skr tag` command.

use clap::Args;

use super::GlobalArgs;

#[derive(Args)]
pub struct TagArgs {
    /// Existing reference or digest
    pub source: String,

    /// New reference
    pub target: String,
}

pub async fn execute(args: TagArgs, global: &GlobalArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store = global.open_store().await?;
    let descriptor = store
        .resolve(&args.source)
        .await
        .map_err(|e| format!("Failed to resolve {}: {e}", args.source))?;
    store.tag(&descriptor, &args.target).await?;

    println!("Tagged {} as {}", args.source, args.target);
    Ok(())
}
