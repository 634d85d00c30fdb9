//! `skr untag` command.

use clap::Args;

use super::GlobalArgs;

#[derive(Args)]
pub struct UntagArgs {
    /// Tags to remove (blobs stay until `system prune`)
    #[arg(required = true)]
    pub references: Vec<String>,
}

pub async fn execute(args: UntagArgs, global: &GlobalArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store = global.open_store().await?;

    let mut missing = Vec::new();
    for reference in &args.references {
        if store.untag(reference).await? {
            println!("Untagged: {reference}");
        } else {
            missing.push(reference.as_str());
        }
    }

    if !missing.is_empty() {
        return Err(format!("No such tag: {}", missing.join(", ")).into());
    }
    Ok(())
}
