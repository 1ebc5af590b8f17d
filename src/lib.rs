//! Lease-based node announcement and discovery on top of etcd.
//!
//! A process announces its network identity under a TTL lease that a
//! background heartbeat keeps renewing; peers observe the current set of
//! nodes plus every later addition or update as an ordered event stream.
//!
//! # Announcing
//!
//! ```no_run
//! use meshdisc::{Announcement, Announcer, AnnouncerConfig};
//!
//! # async fn run() -> meshdisc::Result<()> {
//! let announcement = Announcement {
//!     key: "node-a".to_string(),
//!     ip: "10.0.0.1".to_string(),
//!     service_port: 3000,
//!     mesh_port: 3002,
//! };
//! let announcer = Announcer::start(&announcement, AnnouncerConfig::default()).await?;
//! // announce until shutdown, then remove the entry:
//! announcer.stop();
//! # Ok(())
//! # }
//! ```
//!
//! # Watching
//!
//! ```no_run
//! use meshdisc::{Watcher, WatcherConfig};
//!
//! # async fn run() -> meshdisc::Result<()> {
//! let mut watcher = Watcher::start(WatcherConfig::default()).await?;
//! while let Ok(node) = watcher.next().await {
//!     println!("{} is at {}:{}", node.key, node.ip, node.service_port);
//! }
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

pub mod announcement;
pub mod announcer;
pub mod config;
pub mod error;
pub mod store;
pub mod watcher;

// Re-export key types
pub use announcement::Announcement;
pub use announcer::Announcer;
pub use config::{
    AnnouncerConfig, WatcherConfig, DEFAULT_CLUSTER_PREFIX, DEFAULT_ETCD_ENDPOINT,
    DEFAULT_INTERVAL_SECS, DEFAULT_TTL_SECS,
};
pub use error::{Error, Result};
pub use store::{EtcdStore, Store};
pub use watcher::Watcher;
