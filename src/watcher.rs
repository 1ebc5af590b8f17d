//! Snapshot-then-stream subscriber for node announcements.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::announcement::Announcement;
use crate::config::{announcements_path, resolve_store, WatcherConfig};
use crate::error::{Error, Result};
use crate::store::{KvEntry, Store};

/// Capacity of the event channel between the discovery task and the
/// consumer. Kept minimal so delivery stays close to a rendezvous: the
/// discovery task does not run ahead of a slow consumer.
const EVENT_CHANNEL_CAPACITY: usize = 1;

/// Watches a cluster namespace for node announcements.
///
/// On start the watcher reads the current set of announcements, then follows
/// the store's change stream from that point on. Consumers pull one event at
/// a time with [`next`](Watcher::next); each distinct `(key, value)` pair is
/// delivered exactly once, no-op rewrites are suppressed, and removals only
/// evict the internal cache so a later re-announcement is delivered again.
///
/// The creator must either keep calling `next` or [`close`](Watcher::close)
/// the watcher; otherwise the discovery task parks on delivery.
///
/// # Example
///
/// ```no_run
/// use meshdisc::{Watcher, WatcherConfig};
///
/// # async fn run() -> meshdisc::Result<()> {
/// let mut watcher = Watcher::start(WatcherConfig::default()).await?;
/// loop {
///     let announcement = watcher.next().await?;
///     println!("{} is at {}:{}", announcement.key, announcement.ip, announcement.mesh_port);
/// }
/// # }
/// ```
pub struct Watcher {
    events: mpsc::Receiver<Announcement>,
    shared: Arc<Shared>,
}

/// State shared between the consumer handle and the discovery task.
struct Shared {
    stop: CancellationToken,
    /// Terminal error, written at most once. A racing explicit close and
    /// task failure is benign: whichever lands first is the terminal signal.
    error: OnceLock<Error>,
}

impl Shared {
    /// Record a terminal error (first writer wins) and stop the watcher.
    fn fail(&self, err: Error) {
        let _ = self.error.set(err);
        self.stop.cancel();
    }

    fn terminal_error(&self) -> Error {
        self.error.get().cloned().unwrap_or(Error::Closed)
    }
}

impl Watcher {
    /// Start watching. The discovery task begins with an empty known-value
    /// cache; the only synchronous failure is connecting a defaulted store.
    pub async fn start(config: WatcherConfig) -> Result<Self> {
        let store = resolve_store(config.store.clone()).await?;
        let path = announcements_path(&config.cluster_prefix);
        let shared = Arc::new(Shared {
            stop: CancellationToken::new(),
            error: OnceLock::new(),
        });
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(run(store, path, events_tx, shared.clone()));
        Ok(Self {
            events: events_rx,
            shared,
        })
    }

    /// Wait for the next new-or-updated announcement.
    ///
    /// Returns the stored terminal error once the watcher is closed, and the
    /// same error on every call after that.
    pub async fn next(&mut self) -> Result<Announcement> {
        tokio::select! {
            // Checked first so calls after closing are deterministic even if
            // an undelivered event is still buffered.
            biased;
            _ = self.shared.stop.cancelled() => Err(self.shared.terminal_error()),
            event = self.events.recv() => event.ok_or_else(|| self.shared.terminal_error()),
        }
    }

    /// Stop watching.
    ///
    /// Idempotent and non-blocking; safe to call concurrently. After the
    /// first call, [`next`](Watcher::next) returns [`Error::Closed`] (or the
    /// failure that closed the watcher earlier).
    pub fn close(&self) {
        self.shared.fail(Error::Closed);
    }
}

/// Discovery loop: snapshot, replay, then follow the change stream.
async fn run(
    store: Arc<dyn Store>,
    path: String,
    events: mpsc::Sender<Announcement>,
    shared: Arc<Shared>,
) {
    let snapshot = match store.snapshot(&path).await {
        Ok(snapshot) => snapshot,
        Err(e) => return shared.fail(Error::Discovery(e)),
    };
    debug!(count = snapshot.entries.len(), "initial announcements loaded");

    let mut known = HashMap::new();
    for entry in &snapshot.entries {
        dispatch(&path, entry, &mut known, &events, &shared).await;
    }

    let mut subscription = match store.watch(&path, snapshot.index).await {
        Ok(subscription) => subscription,
        Err(e) => return shared.fail(Error::Watch(e)),
    };

    loop {
        tokio::select! {
            // Dropping the subscription on the way out cancels the
            // store-side watch.
            _ = shared.stop.cancelled() => return,
            event = subscription.recv() => match event {
                Some(Ok(entry)) => dispatch(&path, &entry, &mut known, &events, &shared).await,
                Some(Err(e)) => return shared.fail(Error::Watch(e)),
                None => return shared.fail(Error::StreamEnded),
            },
        }
    }
}

/// De-duplication and delivery for one store entry, from either the
/// snapshot or the change stream.
async fn dispatch(
    path: &str,
    entry: &KvEntry,
    known: &mut HashMap<String, String>,
    events: &mpsc::Sender<Announcement>,
    shared: &Shared,
) {
    let relative = entry
        .key
        .strip_prefix(path)
        .unwrap_or(entry.key.as_str())
        .trim_matches('/');
    // The namespace node itself, not an announcement.
    if relative.is_empty() {
        return;
    }

    // An empty value is a removal: forget the key so a re-announcement is
    // delivered again, but emit no event.
    if entry.value.is_empty() {
        known.remove(relative);
        return;
    }

    if known.get(relative) == Some(&entry.value) {
        return;
    }
    known.insert(relative.to_string(), entry.value.clone());

    let mut announcement: Announcement = match serde_json::from_str(&entry.value) {
        Ok(announcement) => announcement,
        Err(e) => {
            warn!(key = relative, error = %e, "dropping undecodable announcement");
            return;
        }
    };
    announcement.key = relative.to_string();

    tokio::select! {
        // Stop while parked on delivery: the event is dropped.
        _ = shared.stop.cancelled() => {}
        result = events.send(announcement) => {
            if result.is_err() {
                // The consumer handle is gone; nothing will ever receive.
                shared.stop.cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::mock::MockStore;
    use crate::store::StoreError;
    use std::time::Duration;
    use tokio::time::timeout;

    const PATH: &str = "/test/cluster/announcements";

    fn payload(ip: &str) -> String {
        format!(r#"{{"ip":"{ip}","servicePort":3000,"meshPort":3002}}"#)
    }

    fn entry(key: &str, value: &str) -> KvEntry {
        KvEntry {
            key: format!("{PATH}/{key}"),
            value: value.to_string(),
        }
    }

    fn config_with(store: &Arc<MockStore>) -> WatcherConfig {
        WatcherConfig {
            store: Some(store.clone() as Arc<dyn Store>),
            cluster_prefix: "/test/cluster".to_string(),
        }
    }

    #[tokio::test]
    async fn test_snapshot_entry_delivered_without_store_writes() {
        let store = Arc::new(MockStore::with_snapshot(
            vec![entry("node-b", &payload("10.0.0.2"))],
            7,
        ));
        let mut watcher = Watcher::start(config_with(&store)).await.unwrap();

        let announcement = watcher.next().await.unwrap();
        assert_eq!(announcement.key, "node-b");
        assert_eq!(announcement.ip, "10.0.0.2");
        assert_eq!(announcement.service_port, 3000);
        assert_eq!(announcement.mesh_port, 3002);
    }

    #[tokio::test]
    async fn test_snapshot_entries_delivered_in_store_order() {
        let store = Arc::new(MockStore::with_snapshot(
            vec![
                entry("node-a", &payload("10.0.0.1")),
                entry("node-b", &payload("10.0.0.2")),
            ],
            1,
        ));
        let mut watcher = Watcher::start(config_with(&store)).await.unwrap();

        assert_eq!(watcher.next().await.unwrap().key, "node-a");
        assert_eq!(watcher.next().await.unwrap().key, "node-b");
    }

    #[tokio::test]
    async fn test_duplicate_value_suppressed() {
        let store = Arc::new(MockStore::with_snapshot(
            vec![entry("node-a", &payload("10.0.0.1"))],
            1,
        ));
        let feed = store.feed();
        let mut watcher = Watcher::start(config_with(&store)).await.unwrap();

        assert_eq!(watcher.next().await.unwrap().ip, "10.0.0.1");

        // A rewrite with identical content is absorbed; the genuine update
        // behind it is the next event.
        feed.send(Ok(entry("node-a", &payload("10.0.0.1")))).await.unwrap();
        feed.send(Ok(entry("node-a", &payload("10.0.0.9")))).await.unwrap();

        assert_eq!(watcher.next().await.unwrap().ip, "10.0.0.9");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_update_keeps_next_blocked() {
        let store = Arc::new(MockStore::with_snapshot(
            vec![entry("node-a", &payload("10.0.0.1"))],
            1,
        ));
        let feed = store.feed();
        let mut watcher = Watcher::start(config_with(&store)).await.unwrap();

        watcher.next().await.unwrap();
        feed.send(Ok(entry("node-a", &payload("10.0.0.1")))).await.unwrap();

        let blocked = timeout(Duration::from_secs(5), watcher.next()).await;
        assert!(blocked.is_err());
    }

    #[tokio::test]
    async fn test_removal_evicts_cache_and_reannouncement_redelivers() {
        let store = Arc::new(MockStore::with_snapshot(
            vec![entry("node-a", &payload("10.0.0.1"))],
            1,
        ));
        let feed = store.feed();
        let mut watcher = Watcher::start(config_with(&store)).await.unwrap();

        assert_eq!(watcher.next().await.unwrap().key, "node-a");

        // Removal emits nothing, but the identical re-announcement after it
        // must come through again.
        feed.send(Ok(entry("node-a", ""))).await.unwrap();
        feed.send(Ok(entry("node-a", &payload("10.0.0.1")))).await.unwrap();

        let announcement = watcher.next().await.unwrap();
        assert_eq!(announcement.key, "node-a");
        assert_eq!(announcement.ip, "10.0.0.1");
    }

    #[tokio::test]
    async fn test_namespace_node_ignored() {
        let store = Arc::new(MockStore::with_snapshot(
            vec![
                KvEntry {
                    key: PATH.to_string(),
                    value: String::new(),
                },
                entry("node-a", &payload("10.0.0.1")),
            ],
            1,
        ));
        let mut watcher = Watcher::start(config_with(&store)).await.unwrap();

        assert_eq!(watcher.next().await.unwrap().key, "node-a");
    }

    #[tokio::test]
    async fn test_undecodable_entry_skipped_without_closing() {
        let store = Arc::new(MockStore::with_snapshot(
            vec![
                entry("node-bad", "not json"),
                entry("node-a", &payload("10.0.0.1")),
            ],
            1,
        ));
        let feed = store.feed();
        let mut watcher = Watcher::start(config_with(&store)).await.unwrap();

        assert_eq!(watcher.next().await.unwrap().key, "node-a");

        // Still alive: the stream keeps delivering.
        feed.send(Ok(entry("node-b", &payload("10.0.0.2")))).await.unwrap();
        assert_eq!(watcher.next().await.unwrap().key, "node-b");
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_error_is_stable() {
        let store = Arc::new(MockStore::with_snapshot(Vec::new(), 1));
        let mut watcher = Watcher::start(config_with(&store)).await.unwrap();

        watcher.close();
        watcher.close();

        assert!(matches!(watcher.next().await, Err(Error::Closed)));
        assert!(matches!(watcher.next().await, Err(Error::Closed)));
    }

    #[tokio::test]
    async fn test_snapshot_failure_surfaces_via_next() {
        let store = Arc::new(MockStore::new());
        store.fail_snapshot(StoreError::Request("connection refused".to_string()));
        let mut watcher = Watcher::start(config_with(&store)).await.unwrap();

        assert!(matches!(watcher.next().await, Err(Error::Discovery(_))));
        // The recorded failure is replayed, not replaced by the generic
        // closed error.
        assert!(matches!(watcher.next().await, Err(Error::Discovery(_))));
    }

    #[tokio::test]
    async fn test_watch_establish_failure_surfaces_via_next() {
        let store = Arc::new(MockStore::with_snapshot(Vec::new(), 1));
        store.fail_watch(StoreError::Request("watch refused".to_string()));
        let mut watcher = Watcher::start(config_with(&store)).await.unwrap();

        assert!(matches!(watcher.next().await, Err(Error::Watch(_))));
    }

    #[tokio::test]
    async fn test_stream_error_closes_watcher() {
        let store = Arc::new(MockStore::with_snapshot(Vec::new(), 1));
        let feed = store.feed();
        let mut watcher = Watcher::start(config_with(&store)).await.unwrap();

        feed.send(Err(StoreError::Request("lost connection".to_string())))
            .await
            .unwrap();

        assert!(matches!(watcher.next().await, Err(Error::Watch(_))));
    }

    #[tokio::test]
    async fn test_stream_end_closes_watcher() {
        let store = Arc::new(MockStore::with_snapshot(Vec::new(), 1));
        let feed = store.feed();
        let mut watcher = Watcher::start(config_with(&store)).await.unwrap();

        drop(feed);

        assert!(matches!(watcher.next().await, Err(Error::StreamEnded)));
        assert!(matches!(watcher.next().await, Err(Error::StreamEnded)));
    }
}
