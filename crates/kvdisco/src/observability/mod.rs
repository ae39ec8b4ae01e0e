//! Observability Module
//!
//! - `events`: Structured event logging with consistent fields
//! - `metrics`: Counters and gauges for snapshots, retries and registrations

pub mod events;
pub mod metrics;

pub use self::metrics::describe_metrics;
