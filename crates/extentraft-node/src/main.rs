//! extentraft node - data node binary hosting replicated partitions

mod api;
mod space;

use clap::Parser;
use extentraft_core::NodeConfig;
use space::PartitionSpace;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "extentraft-node")]
#[command(about = "extentraft data node")]
struct Args {
    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Node ID
    #[arg(long)]
    node_id: Option<u64>,

    /// HTTP listen address
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Data directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Cluster name used in alarm keys
    #[arg(long)]
    cluster_id: Option<String>,
}

impl Args {
    fn into_config(self) -> anyhow::Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::from_json_file(path)?,
            None => NodeConfig::default(),
        };
        if let Some(node_id) = self.node_id {
            config.node_id = node_id;
        }
        if let Some(listen) = self.listen {
            config.listen_addr = listen;
        }
        if let Some(data_dir) = self.data_dir {
            config.data_dir = data_dir;
        }
        if let Some(cluster_id) = self.cluster_id {
            config.cluster_id = cluster_id;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Args::parse().into_config()?;
    let listen_addr = config.listen_addr;

    tracing::info!(
        node_id = config.node_id,
        cluster_id = %config.cluster_id,
        listen = %listen_addr,
        data_dir = %config.data_dir.display(),
        "Starting extentraft node"
    );

    let space = Arc::new(PartitionSpace::new(config)?);
    let app = api::router(space.clone());

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!(addr = %listen_addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    space.shutdown().await;
    tracing::info!("extentraft node stopped");
    Ok(())
}
