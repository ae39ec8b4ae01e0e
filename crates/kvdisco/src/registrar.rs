//! Entry Registrar
//!
//! Keeps this process listed in the namespace by rewriting its heartbeat
//! key with a TTL on every tick. A crashed process stops refreshing and its
//! key expires; a stopped one deletes its key right away.

use crate::discovery::{until_stopped, Discovery, ErrorSink};
use crate::error::DiscoveryError;
use crate::observability::events;
use crate::store::{KvStore, WriteOptions};
use bytes::Bytes;
use kvdisco_core::Entry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

impl<S: KvStore> Discovery<S> {
    /// Start heartbeating `address` into the namespace.
    ///
    /// The first write happens immediately, then once per `heartbeat`. A
    /// zero `heartbeat` or `ttl` falls back to the configured value. Write
    /// failures are reported on the returned stream and retried on the next
    /// tick. The stream ends once `stop` is cancelled.
    pub fn register(
        &self,
        address: &str,
        heartbeat: Duration,
        ttl: Duration,
        stop: CancellationToken,
    ) -> Result<mpsc::Receiver<DiscoveryError>, DiscoveryError> {
        Entry::parse(address)?;

        let (errors, errors_rx) = ErrorSink::channel(self.config.error_buffer);
        let registrar = Registrar {
            store: Arc::clone(&self.store),
            key: self.namespace.key_for(address),
            value: Bytes::copy_from_slice(address.as_bytes()),
            heartbeat: self.config.resolve_heartbeat(heartbeat),
            ttl: self.config.resolve_ttl(ttl),
            deregister_on_stop: self.config.deregister_on_stop,
            errors,
            stop,
        };
        tokio::spawn(registrar.run());

        Ok(errors_rx)
    }

    /// Write the heartbeat key for `address` once, with the configured TTL
    /// (or [`DEFAULT_TTL`](crate::DEFAULT_TTL) when that is zero).
    pub async fn register_once(&self, address: &str) -> Result<(), DiscoveryError> {
        Entry::parse(address)?;

        let key = self.namespace.key_for(address);
        let options = WriteOptions::with_ttl(self.config.resolve_ttl(Duration::ZERO));
        self.store
            .put(&key, Bytes::copy_from_slice(address.as_bytes()), Some(options))
            .await
            .map_err(|source| DiscoveryError::Registration { key, source })
    }
}

struct Registrar<S> {
    store: Arc<S>,
    key: String,
    value: Bytes,
    heartbeat: Duration,
    ttl: Duration,
    deregister_on_stop: bool,
    errors: ErrorSink,
    stop: CancellationToken,
}

impl<S: KvStore> Registrar<S> {
    async fn run(self) {
        info!(
            key = %self.key,
            heartbeat_secs = self.heartbeat.as_secs_f64(),
            ttl_secs = self.ttl.as_secs_f64(),
            "Registrar started"
        );

        let mut ticker = tokio::time::interval(self.heartbeat);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if until_stopped(&self.stop, ticker.tick()).await.is_none() {
                break;
            }
            let Some(written) = until_stopped(&self.stop, self.write()).await else {
                break;
            };

            match written {
                Ok(()) => events::registration_refreshed(&self.key, self.ttl),
                Err(err) => {
                    events::registration_failed(&self.key, &err);
                    self.errors.emit(err);
                }
            }
        }

        if self.deregister_on_stop {
            self.deregister().await;
        }
        info!(key = %self.key, "Registrar stopped");
    }

    async fn write(&self) -> Result<(), DiscoveryError> {
        let options = WriteOptions::with_ttl(self.ttl);
        self.store
            .put(&self.key, self.value.clone(), Some(options))
            .await
            .map_err(|source| DiscoveryError::Registration {
                key: self.key.clone(),
                source,
            })
    }

    /// Remove the heartbeat key, waiting at most one heartbeat.
    async fn deregister(&self) {
        match tokio::time::timeout(self.heartbeat, self.store.delete(&self.key)).await {
            Ok(Ok(())) => info!(key = %self.key, "Deregistered"),
            Ok(Err(e)) => warn!(key = %self.key, error = %e, "Failed to deregister"),
            Err(_) => warn!(key = %self.key, "Timed out deregistering"),
        }
    }
}
