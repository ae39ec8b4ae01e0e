//! kvdisco
//!
//! Cluster membership discovery over a shared key-value namespace. Members
//! register `host:port` heartbeat keys under a common prefix; watchers tail
//! the prefix and receive a fresh membership snapshot after every change,
//! surviving backend watch failures by resubscribing.

pub mod config;
mod discovery;
pub mod error;
pub mod namespace;
pub mod observability;
mod registrar;
pub mod store;
mod watch;

pub use config::{DiscoveryConfig, DEFAULT_DISCOVERY_PATH, DEFAULT_HEARTBEAT, DEFAULT_TTL};
pub use discovery::Discovery;
pub use error::{DiscoveryError, StoreError};
pub use kvdisco_core::{Entries, Entry, EntryError, KvPair};
pub use namespace::Namespace;
pub use store::{Connect, EtcdStore, KvPairStream, KvStore, MemoryStore, WriteOptions};
pub use tokio_util::sync::CancellationToken;
