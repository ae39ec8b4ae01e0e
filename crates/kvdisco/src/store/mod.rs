//! Key-Value Backends
//!
//! The discovery loops only need four primitives from a backend: an
//! existence check, a TTL-aware write, a delete, and a subtree watch that
//! delivers the full listing under a prefix on every change.

mod etcd;
mod memory;

pub use etcd::EtcdStore;
pub use memory::{CallCounts, MemoryStore, WatchFeed};

use crate::config::DiscoveryConfig;
use crate::error::StoreError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use kvdisco_core::KvPair;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Full subtree listings, one item per change notification.
pub type KvPairStream = BoxStream<'static, Vec<KvPair>>;

/// Per-write options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Expire the key after this long unless rewritten
    pub ttl: Option<Duration>,
}

impl WriteOptions {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self { ttl: Some(ttl) }
    }
}

#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    async fn put(
        &self,
        key: &str,
        value: Bytes,
        options: Option<WriteOptions>,
    ) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Watch every key strictly under `prefix`.
    ///
    /// Each stream item is the complete current listing. The stream ends
    /// when the backend drops the watch or `stop` is cancelled.
    async fn watch_tree(
        &self,
        prefix: &str,
        stop: CancellationToken,
    ) -> Result<KvPairStream, StoreError>;
}

/// Backends that can be opened from an endpoint list.
#[async_trait]
pub trait Connect: KvStore + Sized {
    async fn connect(endpoints: &[String], config: &DiscoveryConfig) -> Result<Self, StoreError>;
}

/// Directory form of a prefix, with exactly one trailing slash.
pub(crate) fn tree_prefix(prefix: &str) -> String {
    format!("{}/", prefix.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_prefix() {
        assert_eq!(tree_prefix("path/nodes"), "path/nodes/");
        assert_eq!(tree_prefix("path/nodes/"), "path/nodes/");
    }
}
