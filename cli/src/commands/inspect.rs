//! `skr inspect` command.

use clap::Args;

use super::GlobalArgs;

#[derive(Args)]
pub struct InspectArgs {
    /// Local reference or digest
    pub reference: String,

    /// Print the raw manifest as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: InspectArgs, global: &GlobalArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store = global.open_store().await?;
    let descriptor = store
        .resolve(&args.reference)
        .await
        .map_err(|e| format!("Reference {} not found: {e}", args.reference))?;

    if args.json {
        let raw = store.fetch_bytes(&descriptor).await?;
        let doc: serde_json::Value = serde_json::from_slice(&raw)?;
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    let manifest = store.fetch_manifest(&descriptor).await?;

    println!("Reference: {}", args.reference);
    println!("Digest: {}", descriptor.digest);
    println!("Size: {} bytes", descriptor.size);
    println!("MediaType: {}", descriptor.media_type);

    if !manifest.annotations.is_empty() {
        println!("\nAnnotations:");
        for (key, value) in &manifest.annotations {
            println!("  {key}: {value}");
        }
    }

    println!("\nConfig:");
    println!("  Digest: {}", manifest.config.digest);
    println!("  MediaType: {}", manifest.config.media_type);
    if let Some(created) = created_of(&store.fetch_bytes(&manifest.config).await.unwrap_or_default()) {
        println!("  Created: {created}");
    }

    println!("\nLayers: {}", manifest.layers.len());
    for (i, layer) in manifest.layers.iter().enumerate() {
        println!("  [{i}] {} ({} bytes)", layer.digest, layer.size);
    }
    Ok(())
}

/// `created` field of a skill config blob.
pub(crate) fn created_of(config: &[u8]) -> Option<String> {
    let doc: serde_json::Value = serde_json::from_slice(config).ok()?;
    doc.get("created")?.as_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_created_of() {
        assert_eq!(
            created_of(br#"{"created":"2024-01-02T03:04:05Z"}"#).as_deref(),
            Some("2024-01-02T03:04:05Z")
        );
        assert_eq!(created_of(b"{}"), None);
        assert_eq!(created_of(b"not json"), None);
    }
}
