use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use meshdisc::{EtcdStore, Store, Watcher, WatcherConfig};
use tokio::net::TcpStream;
use tracing::info;

/// Wait for the first announced node and check that its service port
/// accepts connections.
#[derive(Debug, Parser)]
#[command(name = "clusterinfo")]
struct Flags {
    /// etcd (proxy) address; repeat the flag for multiple endpoints
    #[arg(long = "etcd-address")]
    etcd_addresses: Vec<String>,

    /// Prefix (path) for the announcement keys in etcd
    #[arg(long, default_value = meshdisc::DEFAULT_CLUSTER_PREFIX)]
    cluster_prefix: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let flags = Flags::parse();

    let store: Option<Arc<dyn Store>> = if flags.etcd_addresses.is_empty() {
        None
    } else {
        Some(Arc::new(
            EtcdStore::connect(&flags.etcd_addresses)
                .await
                .context("connecting to etcd")?,
        ))
    };

    let mut watcher = Watcher::start(WatcherConfig {
        store,
        cluster_prefix: flags.cluster_prefix,
    })
    .await
    .context("starting watcher")?;

    let node = watcher
        .next()
        .await
        .context("waiting for an announcement")?;
    watcher.close();

    info!(node = node.key, ip = node.ip, port = node.service_port, "discovered node");

    let addr = format!("{}:{}", node.ip, node.service_port);
    let stream = TcpStream::connect(&addr)
        .await
        .with_context(|| format!("connecting to {addr}"))?;
    println!("{} is reachable at {}", node.key, stream.peer_addr()?);

    Ok(())
}
