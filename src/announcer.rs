//! Lease-based heartbeat publisher for a single node.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::announcement::Announcement;
use crate::config::{announcements_path, resolve_store, AnnouncerConfig};
use crate::error::{Error, Result};
use crate::store::{Store, StoreError};

/// Announces one node at regular intervals.
///
/// Construction writes the announcement immediately and then refreshes it
/// from a background task every `interval` seconds under a lease of `ttl`
/// seconds, so the entry disappears on its own if this process dies.
/// [`stop`](Announcer::stop) removes the entry and ends the task.
///
/// # Example
///
/// ```no_run
/// use meshdisc::{Announcement, Announcer, AnnouncerConfig};
///
/// # async fn run() -> meshdisc::Result<()> {
/// let announcement = Announcement {
///     key: "node-a".to_string(),
///     ip: "10.0.0.1".to_string(),
///     service_port: 3000,
///     mesh_port: 3002,
/// };
/// let announcer = Announcer::start(&announcement, AnnouncerConfig::default()).await?;
/// // ...
/// announcer.stop();
/// # Ok(())
/// # }
/// ```
pub struct Announcer {
    stop: CancellationToken,
}

impl Announcer {
    /// Validate the configuration, ensure the namespace exists, and start
    /// the heartbeat task.
    pub async fn start(announcement: &Announcement, config: AnnouncerConfig) -> Result<Self> {
        config.validate()?;

        let payload =
            serde_json::to_string(announcement).map_err(|e| Error::Encode(e.to_string()))?;

        let store = resolve_store(config.store.clone()).await?;
        let path = announcements_path(&config.cluster_prefix);
        match store.create_dir(&path).await {
            Ok(()) | Err(StoreError::AlreadyExists(_)) => {}
            Err(e) => return Err(Error::Store(e)),
        }

        let stop = CancellationToken::new();
        let key = format!("{path}/{}", announcement.key);
        tokio::spawn(run(
            store,
            key,
            payload,
            config.ttl,
            config.interval_duration(),
            stop.clone(),
        ));

        Ok(Self { stop })
    }

    /// Stop announcing and remove the announcement from the store.
    ///
    /// Idempotent and non-blocking: the signal is a one-shot cancellation,
    /// and the heartbeat task performs the (best-effort) deletion on its way
    /// out. Calling this any number of times, concurrently or not, results
    /// in at most one delete attempt.
    pub fn stop(&self) {
        self.stop.cancel();
    }
}

/// Heartbeat loop: write first, then wait for the interval or the stop
/// signal.
async fn run(
    store: Arc<dyn Store>,
    key: String,
    payload: String,
    ttl: u64,
    interval: Duration,
    stop: CancellationToken,
) {
    loop {
        match store.put_with_ttl(&key, &payload, ttl).await {
            Ok(()) => debug!(key = %key, value = %payload, "announced"),
            // The lease from the previous write keeps the entry alive for
            // now; the next iteration retries.
            Err(e) => warn!(key = %key, error = %e, "announcement write failed"),
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = stop.cancelled() => {
                if let Err(e) = store.delete(&key).await {
                    warn!(key = %key, error = %e, "failed to delete announcement");
                }
                return;
            }
        }
    }
}
