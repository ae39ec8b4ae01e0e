//! Discovery Metrics
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! embedding application installs a recorder.
//!
//! Metrics tracked:
//! - `kvdisco_snapshots_published_total` - counter of delivered snapshots
//! - `kvdisco_members` - gauge of members in the latest snapshot
//! - `kvdisco_watch_retries_total` - counter of watch loop retries by reason
//! - `kvdisco_registrations_total` - counter of heartbeat writes by result
//! - `kvdisco_errors_dropped_total` - counter of errors lost to a full error stream

use metrics::{counter, describe_counter, describe_gauge, gauge};

/// Register descriptions for all metrics
pub fn describe_metrics() {
    describe_counter!(
        "kvdisco_snapshots_published_total",
        "Total number of membership snapshots delivered"
    );
    describe_gauge!(
        "kvdisco_members",
        "Number of members in the latest snapshot"
    );
    describe_counter!(
        "kvdisco_watch_retries_total",
        "Total number of watch loop retries"
    );
    describe_counter!(
        "kvdisco_registrations_total",
        "Total number of heartbeat writes"
    );
    describe_counter!(
        "kvdisco_errors_dropped_total",
        "Total number of errors dropped because the error stream was full"
    );
}

pub(crate) fn record_snapshot(member_count: usize) {
    counter!("kvdisco_snapshots_published_total").increment(1);
    gauge!("kvdisco_members").set(member_count as f64);
}

pub(crate) fn record_retry(reason: &'static str) {
    counter!("kvdisco_watch_retries_total", "reason" => reason).increment(1);
}

pub(crate) fn record_registration(ok: bool) {
    let result = if ok { "ok" } else { "error" };
    counter!("kvdisco_registrations_total", "result" => result).increment(1);
}

pub(crate) fn record_error_dropped() {
    counter!("kvdisco_errors_dropped_total").increment(1);
}
