//! etcd-backed implementation of the [`Store`] contract.

use async_trait::async_trait;
use etcd_client::{
    Client, Compare, CompareOp, EventType, GetOptions, PutOptions, Txn, TxnOp, WatchOptions,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{KvEntry, Snapshot, Store, StoreError, Subscription};

/// Buffered change events per subscription before the pump applies
/// backpressure.
const WATCH_CHANNEL_CAPACITY: usize = 64;

/// [`Store`] implementation on top of an etcd v3 cluster.
///
/// The wrapped client multiplexes all operations over one gRPC channel and
/// is cheap to clone, so a single `EtcdStore` (behind an `Arc`) may back any
/// number of announcers and watchers.
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
}

impl EtcdStore {
    /// Connect to the given etcd endpoints.
    pub async fn connect<E: AsRef<str>>(endpoints: &[E]) -> Result<Self, StoreError> {
        let client = Client::connect(endpoints, None).await?;
        debug!("connected to etcd");
        Ok(Self { client })
    }

    /// Wrap an already-connected client.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Store for EtcdStore {
    async fn create_dir(&self, path: &str) -> Result<(), StoreError> {
        // etcd v3 has no directories; a put-if-absent marker key at the bare
        // namespace path gives the same create-once semantics the watcher
        // expects (the marker surfaces as an entry with an empty relative
        // key, which the dispatch step ignores).
        let mut client = self.client.clone();
        let txn = Txn::new()
            .when(vec![Compare::create_revision(path, CompareOp::Equal, 0)])
            .and_then(vec![TxnOp::put(path, "", None)]);
        let resp = client.txn(txn).await?;
        if resp.succeeded() {
            Ok(())
        } else {
            Err(StoreError::AlreadyExists(path.to_string()))
        }
    }

    async fn put_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError> {
        // A fresh lease per write renews the TTL; the superseded lease
        // expires on its own without taking the key with it.
        let mut client = self.client.clone();
        let lease = client.lease_grant(ttl_secs as i64, None).await?;
        client
            .put(key, value, Some(PutOptions::new().with_lease(lease.id())))
            .await?;
        Ok(())
    }

    async fn snapshot(&self, prefix: &str) -> Result<Snapshot, StoreError> {
        let mut client = self.client.clone();
        let resp = client
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await?;
        let index = resp.header().map(|h| h.revision()).unwrap_or_default();
        let mut entries = Vec::with_capacity(resp.kvs().len());
        for kv in resp.kvs() {
            entries.push(KvEntry {
                key: kv.key_str()?.to_string(),
                value: kv.value_str()?.to_string(),
            });
        }
        Ok(Snapshot { entries, index })
    }

    async fn watch(&self, prefix: &str, from_index: i64) -> Result<Subscription, StoreError> {
        let mut client = self.client.clone();
        let options = WatchOptions::new()
            .with_prefix()
            .with_start_revision(from_index + 1);
        let (mut watcher, mut stream) = client.watch(prefix, Some(options)).await?;

        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tx.closed() => {
                        // Subscription dropped; cancel the server-side watch.
                        if let Err(e) = watcher.cancel().await {
                            debug!(error = %e, "watch cancel failed");
                        }
                        return;
                    }
                    message = stream.message() => match message {
                        Ok(Some(resp)) => {
                            if resp.canceled() {
                                return;
                            }
                            for event in resp.events() {
                                let Some(entry) = convert_event(event) else {
                                    continue;
                                };
                                if tx.send(Ok(entry)).await.is_err() {
                                    let _ = watcher.cancel().await;
                                    return;
                                }
                            }
                        }
                        // Stream ended by the store; dropping `tx` lets the
                        // subscriber observe the end.
                        Ok(None) => return,
                        Err(e) => {
                            let _ = tx.send(Err(e.into())).await;
                            return;
                        }
                    }
                }
            }
        });

        Ok(Subscription::new(rx))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut client = self.client.clone();
        client.delete(key, None).await?;
        Ok(())
    }
}

/// Map an etcd watch event to the store-agnostic entry form, deletions as
/// empty values.
fn convert_event(event: &etcd_client::Event) -> Option<KvEntry> {
    let kv = event.kv()?;
    let key = match kv.key_str() {
        Ok(k) => k.to_string(),
        Err(e) => {
            warn!(error = %e, "skipping watch event with non-utf8 key");
            return None;
        }
    };
    let value = if event.event_type() == EventType::Delete {
        String::new()
    } else {
        match kv.value_str() {
            Ok(v) => v.to_string(),
            Err(e) => {
                warn!(key = %key, error = %e, "skipping watch event with non-utf8 value");
                return None;
            }
        }
    };
    Some(KvEntry { key, value })
}
