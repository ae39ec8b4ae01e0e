//! Structured Events
//!
//! Discovery lifecycle events with consistent field naming. Each function
//! also updates the matching metric.
//!
//! Event types:
//! - `snapshot_published` - A fresh membership snapshot was delivered
//! - `watch_dropped` - The backend closed an active subtree watch
//! - `bootstrap_failed` - Namespace existence check or creation failed
//! - `subscribe_failed` - The subtree watch could not be established
//! - `registration_failed` - A heartbeat write failed
//! - `member_joined` / `member_departed` - Membership changes seen by a consumer
//! - `error_dropped` - An error was discarded because the error stream was full

use super::metrics as m;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Emit a snapshot published event
pub fn snapshot_published(path: &str, member_count: usize) {
    debug!(
        event_type = "snapshot_published",
        path = %path,
        member_count = member_count,
        "Membership snapshot published"
    );
    m::record_snapshot(member_count);
}

/// Emit a watch dropped event
pub fn watch_dropped(path: &str, retry_in: Duration) {
    warn!(
        event_type = "watch_dropped",
        path = %path,
        retry_in_ms = millis(retry_in),
        "Watch closed by backend, resubscribing"
    );
    m::record_retry("watch_dropped");
}

/// Emit a bootstrap failed event
pub fn bootstrap_failed(path: &str, error: &dyn std::error::Error) {
    warn!(
        event_type = "bootstrap_failed",
        path = %path,
        error = %error,
        "Failed to create discovery namespace, subscribing anyway"
    );
    m::record_retry("bootstrap");
}

/// Emit a subscribe failed event
pub fn subscribe_failed(path: &str, error: &dyn std::error::Error, retry_in: Duration) {
    warn!(
        event_type = "subscribe_failed",
        path = %path,
        error = %error,
        retry_in_ms = millis(retry_in),
        "Failed to watch discovery namespace"
    );
    m::record_retry("subscribe");
}

/// Emit a registration succeeded event
pub fn registration_refreshed(key: &str, ttl: Duration) {
    trace!(
        event_type = "registration_refreshed",
        key = %key,
        ttl_secs = ttl.as_secs(),
        "Heartbeat written"
    );
    m::record_registration(true);
}

/// Emit a registration failed event
pub fn registration_failed(key: &str, error: &dyn std::error::Error) {
    warn!(
        event_type = "registration_failed",
        key = %key,
        error = %error,
        "Heartbeat write failed"
    );
    m::record_registration(false);
}

/// Emit a member joined event
pub fn member_joined(addr: &str, path: &str) {
    info!(
        event_type = "member_joined",
        addr = %addr,
        path = %path,
        "Member joined"
    );
}

/// Emit a member departed event
pub fn member_departed(addr: &str, path: &str) {
    info!(
        event_type = "member_departed",
        addr = %addr,
        path = %path,
        "Member departed"
    );
}

/// Delay as whole milliseconds, saturating at `u64::MAX`.
fn millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

/// Emit an error dropped event
pub fn error_dropped(error: &dyn std::error::Error) {
    debug!(
        event_type = "error_dropped",
        error = %error,
        "Error stream full, dropping error"
    );
    m::record_error_dropped();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    #[test]
    fn test_event_functions_dont_panic() {
        let err = StoreError::Backend("test error".to_string());
        snapshot_published("path/nodes", 3);
        watch_dropped("path/nodes", Duration::from_secs(1));
        bootstrap_failed("path/nodes", &err);
        subscribe_failed("path/nodes", &err, Duration::from_secs(1));
        registration_refreshed("path/nodes/1.1.1.1:1111", Duration::from_secs(60));
        registration_failed("path/nodes/1.1.1.1:1111", &err);
        member_joined("1.1.1.1:1111", "path/nodes");
        member_departed("1.1.1.1:1111", "path/nodes");
        error_dropped(&err);
    }

    #[test]
    fn test_millis_saturates() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
        watch_dropped("path/nodes", Duration::MAX);
    }
}
