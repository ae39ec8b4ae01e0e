//! Discovery Handle
//!
//! Ties a parsed [`Namespace`] to an open backend. The watch loop and the
//! registrar are started from here; both run as background tasks and talk
//! to the caller only through channels.

use crate::config::DiscoveryConfig;
use crate::error::DiscoveryError;
use crate::namespace::Namespace;
use crate::observability::events;
use crate::store::{Connect, KvStore};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Membership discovery over one namespace of a key-value backend.
pub struct Discovery<S> {
    pub(crate) namespace: Namespace,
    pub(crate) store: Arc<S>,
    pub(crate) config: DiscoveryConfig,
}

impl<S: Connect> Discovery<S> {
    /// Parse `uri` and open the backend.
    ///
    /// Failures here are fatal to the caller and are not retried.
    pub async fn initialize(uri: &str, config: DiscoveryConfig) -> Result<Self, DiscoveryError> {
        let namespace = Namespace::parse(uri, &config.discovery_path)?;

        let store = S::connect(namespace.endpoints(), &config)
            .await
            .map_err(|source| DiscoveryError::ConnectionInit {
                endpoints: namespace.endpoints().to_vec(),
                source,
            })?;

        info!(
            endpoints = ?namespace.endpoints(),
            path = %namespace.path(),
            "Discovery initialized"
        );

        Ok(Self::with_store(namespace, store, config))
    }
}

impl<S: KvStore> Discovery<S> {
    pub fn with_store(namespace: Namespace, store: S, config: DiscoveryConfig) -> Self {
        Self {
            namespace,
            store: Arc::new(store),
            config,
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }
}

impl<S> Clone for Discovery<S> {
    fn clone(&self) -> Self {
        Self {
            namespace: self.namespace.clone(),
            store: Arc::clone(&self.store),
            config: self.config.clone(),
        }
    }
}

/// Sending half of an error stream. Emission never waits for the consumer.
#[derive(Clone)]
pub(crate) struct ErrorSink {
    tx: mpsc::Sender<DiscoveryError>,
}

impl ErrorSink {
    pub(crate) fn channel(capacity: usize) -> (Self, mpsc::Receiver<DiscoveryError>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub(crate) fn emit(&self, err: DiscoveryError) {
        match self.tx.try_send(err) {
            Ok(()) => {}
            Err(TrySendError::Full(err)) => events::error_dropped(&err),
            // Nobody is listening
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

/// Run `fut` unless `stop` fires first.
pub(crate) async fn until_stopped<F: Future>(
    stop: &CancellationToken,
    fut: F,
) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = stop.cancelled() => None,
        output = fut => Some(output),
    }
}
