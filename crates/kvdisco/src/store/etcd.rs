//! Etcd Backend
//!
//! Handles connection, lease-backed TTL writes and prefix watches against
//! etcd. A watch is turned into a stream of full listings by re-reading the
//! prefix after every change event. The watch starts right after the
//! revision of the initial listing so no change in between is missed.
//!
//! Each TTL write attaches a fresh lease; the lease it replaces is revoked
//! so one registered key holds at most one live lease.

use super::{tree_prefix, Connect, KvPairStream, KvStore, WriteOptions};
use crate::config::DiscoveryConfig;
use crate::error::StoreError;
use async_trait::async_trait;
use bytes::Bytes;
use etcd_client::{
    Client, ConnectOptions, GetOptions, PutOptions, WatchOptions, WatchStream, Watcher,
};
use futures::StreamExt;
use kvdisco_core::KvPair;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// etcd-backed key-value store.
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
    endpoints: Vec<String>,
    leases: Arc<Mutex<LeaseTable>>,
}

/// Lease currently attached to each key written with a TTL.
#[derive(Debug, Default)]
struct LeaseTable {
    by_key: HashMap<String, i64>,
}

impl LeaseTable {
    /// Record `lease_id` for `key`. Returns the lease it supersedes.
    fn replace(&mut self, key: &str, lease_id: i64) -> Option<i64> {
        self.by_key
            .insert(key.to_string(), lease_id)
            .filter(|&previous| previous != lease_id)
    }

    fn take(&mut self, key: &str) -> Option<i64> {
        self.by_key.remove(key)
    }
}

impl EtcdStore {
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    async fn revoke(&self, key: &str, lease_id: Option<i64>) {
        let Some(lease_id) = lease_id else { return };
        let mut client = self.client.clone();
        match client.lease_revoke(lease_id).await {
            Ok(_) => trace!(key = %key, lease_id, "Lease revoked"),
            Err(e) => debug!(key = %key, lease_id, error = %e, "Failed to revoke lease"),
        }
    }
}

#[async_trait]
impl Connect for EtcdStore {
    async fn connect(endpoints: &[String], config: &DiscoveryConfig) -> Result<Self, StoreError> {
        let options = ConnectOptions::new().with_connect_timeout(config.connect_timeout);
        let client = Client::connect(endpoints, Some(options)).await?;
        debug!(endpoints = ?endpoints, "Connected to etcd");

        Ok(Self {
            client,
            endpoints: endpoints.to_vec(),
            leases: Arc::default(),
        })
    }
}

#[async_trait]
impl KvStore for EtcdStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut client = self.client.clone();
        let resp = client
            .get(key, Some(GetOptions::new().with_count_only()))
            .await?;
        Ok(resp.count() > 0)
    }

    async fn put(
        &self,
        key: &str,
        value: Bytes,
        options: Option<WriteOptions>,
    ) -> Result<(), StoreError> {
        let mut client = self.client.clone();

        let lease_id = match options.and_then(|o| o.ttl) {
            Some(ttl) => {
                let lease = client.lease_grant(lease_seconds(ttl)?, None).await?;
                trace!(key = %key, lease_id = lease.id(), ttl = lease.ttl(), "Lease granted");
                Some(lease.id())
            }
            None => None,
        };
        let put_options = lease_id.map(|id| PutOptions::new().with_lease(id));

        if let Err(e) = client.put(key, value.to_vec(), put_options).await {
            self.revoke(key, lease_id).await;
            return Err(e.into());
        }

        let superseded = {
            let mut leases = self.leases.lock().await;
            match lease_id {
                Some(id) => leases.replace(key, id),
                None => leases.take(key),
            }
        };
        self.revoke(key, superseded).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut client = self.client.clone();
        client.delete(key, None).await?;

        let lease_id = self.leases.lock().await.take(key);
        self.revoke(key, lease_id).await;
        Ok(())
    }

    async fn watch_tree(
        &self,
        prefix: &str,
        stop: CancellationToken,
    ) -> Result<KvPairStream, StoreError> {
        let dir = tree_prefix(prefix);
        let mut client = self.client.clone();

        let (initial, listed_at) = list(&mut client, &dir).await?;
        let mut watch_options = WatchOptions::new().with_prefix();
        if let Some(revision) = watch_start_revision(listed_at) {
            watch_options = watch_options.with_start_revision(revision);
        }
        let (watcher, events) = client.watch(dir.as_str(), Some(watch_options)).await?;
        debug!(prefix = %dir, listed_at = ?listed_at, "Watch stream established");

        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(forward_listings(client, dir, watcher, events, initial, tx, stop));

        Ok(ReceiverStream::new(rx).boxed())
    }
}

/// Lease length for a TTL, rounded up to whole seconds.
fn lease_seconds(ttl: Duration) -> Result<i64, StoreError> {
    if ttl.is_zero() {
        return Err(StoreError::InvalidTtl(ttl));
    }
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    i64::try_from(secs).map_err(|_| StoreError::InvalidTtl(ttl))
}

/// First revision a watch must replay after a listing taken at `listed_at`.
fn watch_start_revision(listed_at: Option<i64>) -> Option<i64> {
    listed_at.filter(|&revision| revision > 0).map(|revision| revision + 1)
}

/// Read every key under `dir`, in key order, with the revision it was read at.
async fn list(
    client: &mut Client,
    dir: &str,
) -> Result<(Vec<KvPair>, Option<i64>), StoreError> {
    let resp = client.get(dir, Some(GetOptions::new().with_prefix())).await?;

    let mut pairs = Vec::with_capacity(resp.kvs().len());
    for kv in resp.kvs() {
        pairs.push(KvPair::new(kv.key_str()?, Bytes::copy_from_slice(kv.value())));
    }
    Ok((pairs, resp.header().map(|h| h.revision())))
}

/// Push a listing downstream. Returns false once the stream should end.
async fn send_listing(
    tx: &mpsc::Sender<Vec<KvPair>>,
    pairs: Vec<KvPair>,
    stop: &CancellationToken,
) -> bool {
    tokio::select! {
        biased;
        _ = stop.cancelled() => false,
        sent = tx.send(pairs) => sent.is_ok(),
    }
}

/// Relay etcd change events as full listings until the watch ends.
async fn forward_listings(
    mut client: Client,
    dir: String,
    mut watcher: Watcher,
    mut events: WatchStream,
    initial: Vec<KvPair>,
    tx: mpsc::Sender<Vec<KvPair>>,
    stop: CancellationToken,
) {
    if send_listing(&tx, initial, &stop).await {
        loop {
            let message = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = tx.closed() => break,
                message = events.message() => message,
            };

            match message {
                Ok(Some(resp)) => {
                    if resp.canceled() {
                        warn!(prefix = %dir, "Watch stream canceled by etcd");
                        break;
                    }
                    if resp.events().is_empty() {
                        continue;
                    }

                    match list(&mut client, &dir).await {
                        Ok((pairs, _)) => {
                            if !send_listing(&tx, pairs, &stop).await {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(prefix = %dir, error = %e, "Failed to re-list watched prefix");
                            break;
                        }
                    }
                }
                Ok(None) => {
                    warn!(prefix = %dir, "Watch stream ended");
                    break;
                }
                Err(e) => {
                    warn!(prefix = %dir, error = %e, "Watch stream failed");
                    break;
                }
            }
        }
    }

    if let Err(e) = watcher.cancel().await {
        trace!(prefix = %dir, error = %e, "Watcher cancel failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_seconds_rounds_up() {
        assert_eq!(lease_seconds(Duration::from_secs(60)).unwrap(), 60);
        assert_eq!(lease_seconds(Duration::from_millis(1500)).unwrap(), 2);
        assert_eq!(lease_seconds(Duration::from_millis(1)).unwrap(), 1);
        assert!(matches!(
            lease_seconds(Duration::ZERO),
            Err(StoreError::InvalidTtl(_))
        ));
    }

    #[test]
    fn test_watch_starts_after_listing_revision() {
        assert_eq!(watch_start_revision(Some(41)), Some(42));
        assert_eq!(watch_start_revision(Some(0)), None);
        assert_eq!(watch_start_revision(None), None);
    }

    #[test]
    fn test_lease_table_reports_superseded_lease() {
        let mut leases = LeaseTable::default();
        assert_eq!(leases.replace("ns/a", 1), None);
        assert_eq!(leases.replace("ns/a", 2), Some(1));
        assert_eq!(leases.replace("ns/a", 2), None);
        assert_eq!(leases.replace("ns/b", 3), None);

        assert_eq!(leases.take("ns/a"), Some(2));
        assert_eq!(leases.take("ns/a"), None);
        assert_eq!(leases.take("ns/b"), Some(3));
    }
}
