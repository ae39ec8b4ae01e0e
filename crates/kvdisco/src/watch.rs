//! Watch Loop
//!
//! Streams membership snapshots for a namespace, resubscribing whenever the
//! backend watch fails or goes away:
//! 1. Bootstrap: make sure the namespace key exists, creating it if needed.
//!    A failure is reported and the loop still goes on to subscribe
//! 2. Subscribe: open a subtree watch scoped to a per-session token
//! 3. Consume: decode every listing and publish it as a snapshot
//! 4. Retry: after a failure or a dropped watch, wait and go back to 1
//!
//! Snapshot delivery is backpressured: the loop waits for the consumer.
//! Error delivery never waits: when the error stream is full the error is
//! dropped. Cancelling the stop token ends the loop at any of these points,
//! after which both streams are closed and no backend call is made.

use crate::discovery::{until_stopped, Discovery, ErrorSink};
use crate::error::DiscoveryError;
use crate::observability::events;
use crate::store::{KvPairStream, KvStore};
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use bytes::Bytes;
use futures::StreamExt;
use kvdisco_core::Entries;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

impl<S: KvStore> Discovery<S> {
    /// Start watching the namespace.
    ///
    /// Returns the snapshot stream and the error stream immediately; all
    /// backend work happens in a spawned task. Both streams end once `stop`
    /// is cancelled. Dropping the snapshot receiver also ends the task.
    pub fn watch(
        &self,
        stop: CancellationToken,
    ) -> (mpsc::Receiver<Entries>, mpsc::Receiver<DiscoveryError>) {
        let (entries_tx, entries_rx) = mpsc::channel(1);
        let (errors, errors_rx) = ErrorSink::channel(self.config.error_buffer);

        let max_delay = self.config.max_retry_delay.max(self.config.retry_delay);
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.config.retry_delay)
            .with_max_interval(max_delay)
            .with_multiplier(self.config.retry_multiplier.max(1.0))
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None)
            .build();

        let watch_loop = WatchLoop {
            store: Arc::clone(&self.store),
            path: self.namespace.path().to_string(),
            backoff,
            max_delay,
            entries_tx,
            errors,
            stop,
        };
        tokio::spawn(watch_loop.run());

        (entries_rx, errors_rx)
    }
}

/// How a subscription ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// Stop was signaled
    Stopped,
    /// The snapshot receiver went away
    Abandoned,
    /// The backend closed the watch
    Dropped,
}

struct WatchLoop<S> {
    store: Arc<S>,
    path: String,
    backoff: ExponentialBackoff,
    max_delay: Duration,
    entries_tx: mpsc::Sender<Entries>,
    errors: ErrorSink,
    stop: CancellationToken,
}

impl<S: KvStore> WatchLoop<S> {
    async fn run(mut self) {
        debug!(path = %self.path, "Watch loop started");

        loop {
            let Some(bootstrapped) = until_stopped(&self.stop, self.bootstrap()).await else {
                break;
            };
            // Best effort: backends that can watch a missing key still get a session
            if let Err(err) = bootstrapped {
                events::bootstrap_failed(&self.path, &err);
                self.errors.emit(err);
            }

            let session = self.stop.child_token();
            let Some(subscribed) = until_stopped(
                &self.stop,
                self.store.watch_tree(&self.path, session.clone()),
            )
            .await
            else {
                break;
            };

            let listings = match subscribed {
                Ok(listings) => listings,
                Err(source) => {
                    let err = DiscoveryError::Subscribe {
                        path: self.path.clone(),
                        source,
                    };
                    let delay = self.next_delay();
                    events::subscribe_failed(&self.path, &err, delay);
                    self.errors.emit(err);
                    if !self.pause(delay).await {
                        break;
                    }
                    continue;
                }
            };

            debug!(path = %self.path, "Subscribed to namespace");
            self.backoff.reset();

            let outcome = self.consume(listings).await;
            session.cancel();

            match outcome {
                SessionEnd::Stopped => break,
                SessionEnd::Abandoned => {
                    debug!(path = %self.path, "Snapshot receiver dropped");
                    break;
                }
                SessionEnd::Dropped => {
                    let delay = self.next_delay();
                    events::watch_dropped(&self.path, delay);
                    if !self.pause(delay).await {
                        break;
                    }
                }
            }
        }

        debug!(path = %self.path, "Watch loop stopped");
    }

    /// Ensure the namespace key exists. Some backends refuse to watch a
    /// missing key.
    async fn bootstrap(&self) -> Result<(), DiscoveryError> {
        match self.store.exists(&self.path).await {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(e) => {
                debug!(path = %self.path, error = %e, "Namespace existence check failed");
            }
        }

        self.store
            .put(&self.path, Bytes::new(), None)
            .await
            .map_err(|source| DiscoveryError::Bootstrap {
                path: self.path.clone(),
                source,
            })
    }

    /// Publish one snapshot per listing until the session ends.
    async fn consume(&self, mut listings: KvPairStream) -> SessionEnd {
        loop {
            let Some(next) = until_stopped(&self.stop, listings.next()).await else {
                return SessionEnd::Stopped;
            };
            let Some(pairs) = next else {
                if self.stop.is_cancelled() {
                    return SessionEnd::Stopped;
                }
                return SessionEnd::Dropped;
            };

            let entries = Entries::from_kv_pairs(&pairs);
            let member_count = entries.len();

            match until_stopped(&self.stop, self.entries_tx.send(entries)).await {
                None => return SessionEnd::Stopped,
                Some(Err(_)) => return SessionEnd::Abandoned,
                Some(Ok(())) => events::snapshot_published(&self.path, member_count),
            }
        }
    }

    fn next_delay(&mut self) -> Duration {
        self.backoff.next_backoff().unwrap_or(self.max_delay)
    }

    /// Sleep before a retry. Returns false if stopped meanwhile.
    async fn pause(&self, delay: Duration) -> bool {
        until_stopped(&self.stop, tokio::time::sleep(delay))
            .await
            .is_some()
    }
}
