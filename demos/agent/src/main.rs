use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use meshdisc::{
    Announcement, Announcer, AnnouncerConfig, EtcdStore, Store, Watcher, WatcherConfig,
};
use tracing::{error, info, warn};

/// Announce the local node in etcd and run an introduction command for
/// every peer that appears.
#[derive(Debug, Parser)]
#[command(name = "meshdisc-agent")]
struct Flags {
    /// etcd (proxy) address; repeat the flag for multiple endpoints
    #[arg(long = "etcd-address")]
    etcd_addresses: Vec<String>,

    /// Prefix (path) for the announcement keys in etcd
    #[arg(long, default_value = meshdisc::DEFAULT_CLUSTER_PREFIX)]
    cluster_prefix: String,

    /// Name for the local node; must be unique throughout the cluster
    #[arg(long)]
    node_name: String,

    /// IP address other nodes can reach the local node on
    #[arg(long)]
    node_ip: String,

    /// Service port of the local node
    #[arg(long, default_value_t = 3000)]
    service_port: u16,

    /// Mesh port of the local node
    #[arg(long, default_value_t = 3002)]
    mesh_port: u16,

    /// Announce time-to-live in seconds
    #[arg(long, default_value_t = meshdisc::DEFAULT_TTL_SECS)]
    announce_ttl: u64,

    /// Announce interval in seconds; should always be lower than --announce-ttl
    #[arg(long, default_value_t = meshdisc::DEFAULT_INTERVAL_SECS)]
    announce_interval: u64,

    /// Command run for every discovered peer, with {key}, {ip},
    /// {service_port} and {mesh_port} substituted before execution
    #[arg(long)]
    on_peer: Option<String>,
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

    let announcement = Announcement {
        key: flags.node_name.clone(),
        ip: flags.node_ip.clone(),
        service_port: flags.service_port,
        mesh_port: flags.mesh_port,
    };
    let announcer = Announcer::start(
        &announcement,
        AnnouncerConfig {
            store: store.clone(),
            cluster_prefix: flags.cluster_prefix.clone(),
            ttl: flags.announce_ttl,
            interval: flags.announce_interval,
        },
    )
    .await
    .context("starting announcer")?;

    let mut watcher = Watcher::start(WatcherConfig {
        store,
        cluster_prefix: flags.cluster_prefix.clone(),
    })
    .await
    .context("starting watcher")?;

    info!(node = flags.node_name, "announcing and watching for peers");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
            next = watcher.next() => match next {
                Ok(peer) => {
                    // Not interested in announcements about ourselves.
                    if peer.key == flags.node_name {
                        continue;
                    }
                    info!(peer = peer.key, ip = peer.ip, mesh_port = peer.mesh_port, "discovered peer");
                    if let Some(template) = &flags.on_peer {
                        tokio::spawn(introduce(template.clone(), peer));
                    }
                }
                Err(e) => {
                    error!(error = %e, "watcher stopped");
                    break;
                }
            }
        }
    }

    watcher.close();
    announcer.stop();
    // The announcer's cleanup delete is fire-and-forget; give it a moment
    // before the runtime shuts down.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    Ok(())
}

/// Run the configured introduction command for one discovered peer.
async fn introduce(template: String, peer: Announcement) {
    let command = template
        .replace("{key}", &peer.key)
        .replace("{ip}", &peer.ip)
        .replace("{service_port}", &peer.service_port.to_string())
        .replace("{mesh_port}", &peer.mesh_port.to_string());
    match tokio::process::Command::new("sh")
        .arg("-c")
        .arg(&command)
        .status()
        .await
    {
        Ok(status) if status.success() => info!(peer = peer.key, "introduced peer"),
        Ok(status) => warn!(peer = peer.key, %status, "introduction command failed"),
        Err(e) => warn!(peer = peer.key, error = %e, "failed to run introduction command"),
    }
}
