//! `skr serve` command.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use clap::Args;
use skr_runtime::oci::credentials::ChainProvider;
use skr_runtime::serve::{self, LocalBackend, ProxyBackend, RegistryBackend};

use super::GlobalArgs;

#[derive(Args)]
pub struct ServeArgs {
    /// Port to listen on
    #[arg(short, long, default_value_t = 8080)]
    pub port: u16,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    pub addr: IpAddr,

    /// Upstream registry to proxy instead of serving the local store
    /// (e.g. https://ghcr.io)
    #[arg(long)]
    pub oci_endpoint: Option<String>,
}

pub async fn execute(args: ServeArgs, global: &GlobalArgs) -> Result<(), Box<dyn std::error::Error>> {
    if args.oci_endpoint.is_some() && global.store.is_some() {
        return Err("Cannot specify both --store and --oci-endpoint".into());
    }

    let backend: Arc<dyn RegistryBackend> = match &args.oci_endpoint {
        Some(endpoint) => {
            println!("Mode: proxy to {endpoint}");
            Arc::new(ProxyBackend::new(endpoint, Arc::new(ChainProvider::default_chain()))?)
        }
        None => {
            let store = global.open_store().await?;
            println!("Mode: local store at {}", store.root().display());
            Arc::new(LocalBackend::new(store))
        }
    };

    let addr = SocketAddr::new(args.addr, args.port);
    println!("Serving OCI registry at http://{addr}/v2/");
    println!("Press Ctrl+C to stop");

    serve::serve(addr, backend, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    })
    .await?;
    Ok(())
}
