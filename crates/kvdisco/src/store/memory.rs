//! In-memory (single process) key-value backend.
//!
//! Behaves like a real store for registration and watches, and can be told
//! to fail individual operations or to hand out watch streams driven by the
//! caller. Clones share the same state.

use super::{tree_prefix, Connect, KvPairStream, KvStore, WriteOptions};
use crate::config::DiscoveryConfig;
use crate::error::StoreError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use kvdisco_core::KvPair;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::Instant;
use tokio_stream::wrappers::{ReceiverStream, WatchStream};
use tokio_util::sync::CancellationToken;

/// Number of calls made to each backend primitive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub exists: usize,
    pub put: usize,
    pub delete: usize,
    pub watch_tree: usize,
}

/// Caller-driven watch returned by [`MemoryStore::push_watch_feed`].
///
/// Every `send` becomes one listing on the watch stream. Dropping the
/// feed (or calling [`WatchFeed::close`]) ends the stream.
#[derive(Debug)]
pub struct WatchFeed {
    tx: mpsc::Sender<Vec<KvPair>>,
}

impl WatchFeed {
    /// Deliver one listing. Returns false if the watch is no longer consumed.
    pub async fn send(&self, pairs: Vec<KvPair>) -> bool {
        self.tx.send(pairs).await.is_ok()
    }

    pub fn close(self) {}
}

#[derive(Debug)]
enum ScriptedWatch {
    Fail(String),
    Feed(mpsc::Receiver<Vec<KvPair>>),
}

#[derive(Debug)]
struct Stored {
    value: Bytes,
    expires_at: Option<Instant>,
}

#[derive(Debug)]
struct LiveWatch {
    dir: String,
    tx: watch::Sender<Vec<KvPair>>,
}

#[derive(Debug, Default)]
struct Inner {
    data: BTreeMap<String, Stored>,
    watchers: Vec<LiveWatch>,
    scripted: VecDeque<ScriptedWatch>,
    exists_failure: Option<String>,
    put_failure: Option<String>,
    delete_failure: Option<String>,
    calls: CallCounts,
}

impl Inner {
    fn listing(&self, dir: &str) -> Vec<KvPair> {
        let now = Instant::now();
        self.data
            .range(dir.to_string()..)
            .take_while(|(key, _)| key.starts_with(dir))
            .filter(|(_, stored)| stored.expires_at.map_or(true, |at| at > now))
            .map(|(key, stored)| KvPair::new(key.clone(), stored.value.clone()))
            .collect()
    }

    /// Republish listings to live watchers whose prefix covers `key`.
    fn notify(&mut self, key: &str) {
        self.watchers.retain(|w| !w.tx.is_closed());
        let dirs: Vec<String> = self
            .watchers
            .iter()
            .filter(|w| key.starts_with(&w.dir))
            .map(|w| w.dir.clone())
            .collect();
        for dir in dirs {
            let listing = self.listing(&dir);
            for watcher in self.watchers.iter().filter(|w| w.dir == dir) {
                watcher.tx.send_replace(listing.clone());
            }
        }
    }

    fn purge_expired(&mut self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .data
            .iter()
            .filter(|(_, stored)| stored.expires_at.is_some_and(|at| at <= now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.data.remove(key);
            self.notify(key);
        }
        expired.len()
    }
}

/// In-memory key-value store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    endpoints: Vec<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Endpoints this store was opened with.
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    pub async fn calls(&self) -> CallCounts {
        self.inner.lock().await.calls
    }

    /// Current value of `key`, ignoring expired keys.
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        let inner = self.inner.lock().await;
        let now = Instant::now();
        inner
            .data
            .get(key)
            .filter(|stored| stored.expires_at.map_or(true, |at| at > now))
            .map(|stored| stored.value.clone())
    }

    /// Remove expired keys and notify watchers. Returns how many expired.
    pub async fn purge_expired(&self) -> usize {
        self.inner.lock().await.purge_expired()
    }

    /// Make every `exists` call fail with `message` until cleared with `None`.
    pub async fn set_exists_failure(&self, message: Option<&str>) {
        self.inner.lock().await.exists_failure = message.map(str::to_string);
    }

    /// Make every `put` call fail with `message` until cleared with `None`.
    pub async fn set_put_failure(&self, message: Option<&str>) {
        self.inner.lock().await.put_failure = message.map(str::to_string);
    }

    /// Make every `delete` call fail with `message` until cleared with `None`.
    pub async fn set_delete_failure(&self, message: Option<&str>) {
        self.inner.lock().await.delete_failure = message.map(str::to_string);
    }

    /// Queue a failure for the next unscripted `watch_tree` call.
    pub async fn push_watch_failure(&self, message: &str) {
        self.inner
            .lock()
            .await
            .scripted
            .push_back(ScriptedWatch::Fail(message.to_string()));
    }

    /// Queue a caller-driven stream for the next unscripted `watch_tree` call.
    pub async fn push_watch_feed(&self) -> WatchFeed {
        let (tx, rx) = mpsc::channel(1);
        self.inner
            .lock()
            .await
            .scripted
            .push_back(ScriptedWatch::Feed(rx));
        WatchFeed { tx }
    }
}

#[async_trait]
impl Connect for MemoryStore {
    async fn connect(endpoints: &[String], _config: &DiscoveryConfig) -> Result<Self, StoreError> {
        Ok(Self {
            inner: Arc::default(),
            endpoints: endpoints.to_vec(),
        })
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.calls.exists += 1;
        if let Some(message) = &inner.exists_failure {
            return Err(StoreError::Backend(message.clone()));
        }
        inner.purge_expired();
        Ok(inner.data.contains_key(key))
    }

    async fn put(
        &self,
        key: &str,
        value: Bytes,
        options: Option<WriteOptions>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.calls.put += 1;
        if let Some(message) = &inner.put_failure {
            return Err(StoreError::Backend(message.clone()));
        }

        let expires_at = match options.and_then(|o| o.ttl) {
            Some(ttl) if ttl.is_zero() => return Err(StoreError::InvalidTtl(ttl)),
            Some(ttl) => Some(Instant::now() + ttl),
            None => None,
        };
        inner.purge_expired();
        inner
            .data
            .insert(key.to_string(), Stored { value, expires_at });
        inner.notify(key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.calls.delete += 1;
        if let Some(message) = &inner.delete_failure {
            return Err(StoreError::Backend(message.clone()));
        }
        if inner.data.remove(key).is_some() {
            inner.notify(key);
        }
        Ok(())
    }

    async fn watch_tree(
        &self,
        prefix: &str,
        stop: CancellationToken,
    ) -> Result<KvPairStream, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.calls.watch_tree += 1;

        match inner.scripted.pop_front() {
            Some(ScriptedWatch::Fail(message)) => Err(StoreError::Backend(message)),
            Some(ScriptedWatch::Feed(rx)) => Ok(ReceiverStream::new(rx)
                .take_until(stop.cancelled_owned())
                .boxed()),
            None => {
                let dir = tree_prefix(prefix);
                inner.purge_expired();
                let (tx, rx) = watch::channel(inner.listing(&dir));
                inner.watchers.push(LiveWatch { dir, tx });
                Ok(WatchStream::new(rx)
                    .take_until(stop.cancelled_owned())
                    .boxed())
            }
        }
    }
}
