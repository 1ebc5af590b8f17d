//! In-memory recording store for unit tests.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{KvEntry, Snapshot, Store, StoreError, Subscription};

/// One recorded `put_with_ttl` call.
#[derive(Debug, Clone)]
pub(crate) struct PutRecord {
    pub(crate) key: String,
    pub(crate) value: String,
    pub(crate) ttl_secs: u64,
}

#[derive(Default)]
struct MockState {
    dirs: Vec<String>,
    puts: Vec<PutRecord>,
    deletes: Vec<String>,
    snapshot_entries: Vec<KvEntry>,
    snapshot_index: i64,
    fail_create_dir: Option<StoreError>,
    fail_snapshot: Option<StoreError>,
    fail_watch: Option<StoreError>,
    pending_feed: Option<mpsc::Receiver<Result<KvEntry, StoreError>>>,
    // Senders for subscriptions no test feeds; kept alive so those
    // subscriptions block instead of reporting a stream end.
    open_feeds: Vec<mpsc::Sender<Result<KvEntry, StoreError>>>,
}

/// Recording [`Store`] double: captures directory creations, puts, and
/// deletes, serves a canned snapshot, and hands out test-driven watch feeds.
#[derive(Default)]
pub(crate) struct MockStore {
    state: Mutex<MockState>,
}

impl MockStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_snapshot(entries: Vec<KvEntry>, index: i64) -> Self {
        let store = Self::new();
        {
            let mut state = store.state.lock().unwrap();
            state.snapshot_entries = entries;
            state.snapshot_index = index;
        }
        store
    }

    pub(crate) fn fail_create_dir(&self, err: StoreError) {
        self.state.lock().unwrap().fail_create_dir = Some(err);
    }

    pub(crate) fn fail_snapshot(&self, err: StoreError) {
        self.state.lock().unwrap().fail_snapshot = Some(err);
    }

    pub(crate) fn fail_watch(&self, err: StoreError) {
        self.state.lock().unwrap().fail_watch = Some(err);
    }

    /// Prepare the feed backing the next `watch` call and return its sender.
    pub(crate) fn feed(&self) -> mpsc::Sender<Result<KvEntry, StoreError>> {
        let (tx, rx) = mpsc::channel(16);
        self.state.lock().unwrap().pending_feed = Some(rx);
        tx
    }

    pub(crate) fn dirs(&self) -> Vec<String> {
        self.state.lock().unwrap().dirs.clone()
    }

    pub(crate) fn puts(&self) -> Vec<PutRecord> {
        self.state.lock().unwrap().puts.clone()
    }

    pub(crate) fn deletes(&self) -> Vec<String> {
        self.state.lock().unwrap().deletes.clone()
    }
}

#[async_trait]
impl Store for MockStore {
    async fn create_dir(&self, path: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.fail_create_dir.clone() {
            return Err(err);
        }
        state.dirs.push(path.to_string());
        Ok(())
    }

    async fn put_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError> {
        self.state.lock().unwrap().puts.push(PutRecord {
            key: key.to_string(),
            value: value.to_string(),
            ttl_secs,
        });
        Ok(())
    }

    async fn snapshot(&self, _prefix: &str) -> Result<Snapshot, StoreError> {
        let state = self.state.lock().unwrap();
        if let Some(err) = state.fail_snapshot.clone() {
            return Err(err);
        }
        Ok(Snapshot {
            entries: state.snapshot_entries.clone(),
            index: state.snapshot_index,
        })
    }

    async fn watch(&self, _prefix: &str, _from_index: i64) -> Result<Subscription, StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.fail_watch.clone() {
            return Err(err);
        }
        let rx = match state.pending_feed.take() {
            Some(rx) => rx,
            None => {
                let (tx, rx) = mpsc::channel(16);
                state.open_feeds.push(tx);
                rx
            }
        };
        Ok(Subscription::new(rx))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.state.lock().unwrap().deletes.push(key.to_string());
        Ok(())
    }
}
