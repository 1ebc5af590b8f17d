//! Configuration for announcers and watchers.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::error::{Error, Result};
use crate::store::{EtcdStore, Store};

/// etcd endpoint used when no store is supplied.
pub const DEFAULT_ETCD_ENDPOINT: &str = "http://localhost:2379";

/// Cluster prefix used when none is configured. Deliberately obscure to
/// avoid colliding with other users of the same etcd cluster.
pub const DEFAULT_CLUSTER_PREFIX: &str = "/meshdisc/default";

/// Default announcement time-to-live, in seconds.
pub const DEFAULT_TTL_SECS: u64 = 60;

/// Default announcement refresh interval, in seconds.
pub const DEFAULT_INTERVAL_SECS: u64 = 45;

/// Path segment under the cluster prefix that holds all announcement keys.
const ANNOUNCEMENTS_SEGMENT: &str = "announcements";

/// Configuration for [`Announcer::start`](crate::Announcer::start).
#[derive(Clone)]
pub struct AnnouncerConfig {
    /// Store to announce through. `None` connects to
    /// [`DEFAULT_ETCD_ENDPOINT`].
    pub store: Option<Arc<dyn Store>>,

    /// Namespace root for announcement keys. Empty means
    /// [`DEFAULT_CLUSTER_PREFIX`].
    pub cluster_prefix: String,

    /// Announcement time-to-live in seconds. The key vanishes from the
    /// store if not refreshed within this window.
    pub ttl: u64,

    /// Refresh interval in seconds. Must be above zero and below `ttl`.
    pub interval: u64,
}

impl Default for AnnouncerConfig {
    fn default() -> Self {
        Self {
            store: None,
            cluster_prefix: DEFAULT_CLUSTER_PREFIX.to_string(),
            ttl: DEFAULT_TTL_SECS,
            interval: DEFAULT_INTERVAL_SECS,
        }
    }
}

impl AnnouncerConfig {
    /// Check the lease invariant `0 < interval < ttl`.
    pub fn validate(&self) -> Result<()> {
        if self.interval == 0 {
            return Err(Error::invalid_config("interval must be above zero"));
        }
        if self.interval >= self.ttl {
            return Err(Error::invalid_config(
                "ttl must be greater than the announce interval",
            ));
        }
        if self.ttl > 120 {
            warn!(ttl = self.ttl, "ttl is set to a very high value; note that the unit is seconds");
        }
        Ok(())
    }

    pub(crate) fn interval_duration(&self) -> Duration {
        Duration::from_secs(self.interval)
    }
}

/// Configuration for [`Watcher::start`](crate::Watcher::start).
#[derive(Clone, Default)]
pub struct WatcherConfig {
    /// Store to watch through. `None` connects to
    /// [`DEFAULT_ETCD_ENDPOINT`].
    pub store: Option<Arc<dyn Store>>,

    /// Namespace root for announcement keys. Empty means
    /// [`DEFAULT_CLUSTER_PREFIX`].
    pub cluster_prefix: String,
}

/// Join a cluster prefix with the announcements segment, defaulting an
/// empty prefix.
pub(crate) fn announcements_path(cluster_prefix: &str) -> String {
    let prefix = if cluster_prefix.is_empty() {
        DEFAULT_CLUSTER_PREFIX
    } else {
        cluster_prefix
    };
    format!("{}/{ANNOUNCEMENTS_SEGMENT}", prefix.trim_end_matches('/'))
}

/// Use the configured store, or connect to the default local endpoint.
pub(crate) async fn resolve_store(store: Option<Arc<dyn Store>>) -> Result<Arc<dyn Store>> {
    match store {
        Some(store) => Ok(store),
        None => Ok(Arc::new(EtcdStore::connect(&[DEFAULT_ETCD_ENDPOINT]).await?)),
    }
}
