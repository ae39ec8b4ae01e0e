use kvdisco_core::EntryError;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by a key-value backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("etcd error: {0}")]
    Etcd(#[from] etcd_client::Error),
    #[error("{0}")]
    Backend(String),
    #[error("invalid ttl {0:?}")]
    InvalidTtl(Duration),
}

/// Errors surfaced by namespace initialization, the watch loop and the registrar.
///
/// `InvalidUri`, `InvalidAddress` and `ConnectionInit` are returned
/// synchronously. The rest are delivered on error streams and retried.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("invalid discovery uri {uri:?}: {reason}")]
    InvalidUri { uri: String, reason: &'static str },
    #[error("invalid member address: {0}")]
    InvalidAddress(#[from] EntryError),
    #[error("failed to connect to {endpoints:?}: {source}")]
    ConnectionInit {
        endpoints: Vec<String>,
        #[source]
        source: StoreError,
    },
    #[error("failed to create namespace {path}: {source}")]
    Bootstrap {
        path: String,
        #[source]
        source: StoreError,
    },
    #[error("failed to watch {path}: {source}")]
    Subscribe {
        path: String,
        #[source]
        source: StoreError,
    },
    #[error("failed to register {key}: {source}")]
    Registration {
        key: String,
        #[source]
        source: StoreError,
    },
}

impl DiscoveryError {
    /// The backend failure behind this error, if any.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            Self::ConnectionInit { source, .. }
            | Self::Bootstrap { source, .. }
            | Self::Subscribe { source, .. }
            | Self::Registration { source, .. } => Some(source),
            Self::InvalidUri { .. } | Self::InvalidAddress(_) => None,
        }
    }
}
