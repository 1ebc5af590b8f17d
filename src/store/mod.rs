//! The key-value store contract the coordination layer runs against.
//!
//! The announcer and watcher never talk to etcd directly; they go through
//! the [`Store`] trait, which captures exactly the five operations the
//! coordination layer needs. [`EtcdStore`] is the production implementation;
//! tests substitute an in-memory recording store.

use async_trait::async_trait;
use tokio::sync::mpsc;

mod etcd;
#[cfg(test)]
pub(crate) mod mock;

pub use etcd::EtcdStore;

/// Error type for store operations.
///
/// Failures cross task boundaries (a watch error is recorded in one task and
/// replayed to the consumer from another), so causes are captured as
/// messages and the type stays `Clone`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The namespace marker already exists. Callers creating the namespace
    /// treat this as success.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The store rejected or failed a request.
    #[error("store request failed: {0}")]
    Request(String),
}

impl From<etcd_client::Error> for StoreError {
    fn from(err: etcd_client::Error) -> Self {
        StoreError::Request(err.to_string())
    }
}

/// A single key-value entry as reported by the store.
///
/// An empty value denotes a deletion when the entry arrives over a
/// [`Subscription`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    /// Absolute key, including the namespace prefix.
    pub key: String,
    /// Raw serialized value; empty for deletions.
    pub value: String,
}

/// Point-in-time view of a namespace plus the revision to watch from.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Entries below the requested prefix, in store order.
    pub entries: Vec<KvEntry>,
    /// Store revision the snapshot was taken at. Pass to [`Store::watch`]
    /// to receive every change made after this point.
    pub index: i64,
}

/// A live change subscription.
///
/// Events arrive in store order. A `Some(Err(_))` means the subscription
/// broke; `None` means the store ended the stream. Dropping the subscription
/// cancels the server-side watch.
pub struct Subscription {
    events: mpsc::Receiver<Result<KvEntry, StoreError>>,
}

impl Subscription {
    pub(crate) fn new(events: mpsc::Receiver<Result<KvEntry, StoreError>>) -> Self {
        Self { events }
    }

    /// Receive the next change event.
    pub async fn recv(&mut self) -> Option<Result<KvEntry, StoreError>> {
        self.events.recv().await
    }
}

/// Operations the coordination layer needs from a TTL-capable key-value
/// store.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Create the namespace marker at `path`. Fails with
    /// [`StoreError::AlreadyExists`] when the marker is present.
    async fn create_dir(&self, path: &str) -> Result<(), StoreError>;

    /// Upsert `key` under a lease of `ttl_secs`. Every call renews the TTL;
    /// the key vanishes if not refreshed before expiry.
    async fn put_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError>;

    /// Read all entries below `prefix` together with the store revision.
    async fn snapshot(&self, prefix: &str) -> Result<Snapshot, StoreError>;

    /// Subscribe to changes below `prefix`, starting strictly after
    /// `from_index`.
    async fn watch(&self, prefix: &str, from_index: i64) -> Result<Subscription, StoreError>;

    /// Remove a single key. Failing on a missing key is acceptable.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}
