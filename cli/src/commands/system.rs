//! `skr system` commands.

use clap::{Args, Subcommand};
use skr_runtime::oci::reference::split_repository_tag;

use super::inspect::created_of;
use super::GlobalArgs;
use crate::output;

#[derive(Args)]
pub struct SystemArgs {
    #[command(subcommand)]
    pub command: SystemCommand,
}

#[derive(Subcommand)]
pub enum SystemCommand {
    /// Delete blobs that no tag references
    Prune,
    /// Show store location and usage
    Info,
    /// List artifacts in the local store
    List(SystemListArgs),
}

#[derive(Args)]
pub struct SystemListArgs {
    /// Only show references
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(args: SystemArgs, global: &GlobalArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store = global.open_store().await?;

    match args.command {
        SystemCommand::Prune => {
            let (deleted, reclaimed) = store.prune().await?;
            println!(
                "Deleted {} blobs, reclaimed {}",
                deleted,
                output::format_bytes(reclaimed)
            );
        }
        SystemCommand::Info => {
            let usage = store.usage().await?;
            println!("Version: {}", skr_runtime::VERSION);
            println!("Store: {}", store.root().display());
            println!("Tags: {}", usage.tags);
            println!("Blobs: {}", usage.blobs);
            println!("Size: {}", output::format_bytes(usage.bytes));
        }
        SystemCommand::List(list) => {
            let tags = store.list().await?;
            if list.quiet {
                for tag in &tags {
                    println!("{tag}");
                }
                return Ok(());
            }

            let mut table = output::new_table(&["REPOSITORY", "TAG", "DIGEST", "SIZE", "CREATED"]);
            for tag in &tags {
                let descriptor = match store.resolve(tag).await {
                    Ok(descriptor) => descriptor,
                    Err(e) => {
                        tracing::warn!(reference = %tag, error = %e, "Skipping unresolvable tag");
                        continue;
                    }
                };
                let (repository, version) = split_repository_tag(tag);

                // Artifact size is the manifest plus everything it references
                let mut size = descriptor.size;
                let mut created = "-".to_string();
                if let Ok(manifest) = store.fetch_manifest(&descriptor).await {
                    size += manifest.config.size + manifest.layers.iter().map(|l| l.size).sum::<u64>();
                    if let Some(c) = store
                        .fetch_bytes(&manifest.config)
                        .await
                        .ok()
                        .and_then(|raw| created_of(&raw))
                    {
                        created = output::format_created(&c);
                    }
                }

                table.add_row([
                    repository.to_string(),
                    version.unwrap_or("<none>").to_string(),
                    output::short_digest(&descriptor.digest.to_string()),
                    output::format_bytes(size),
                    created,
                ]);
            }
            println!("{table}");
        }
    }
    Ok(())
}
