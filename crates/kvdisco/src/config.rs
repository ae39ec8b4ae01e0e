//! Discovery Configuration
//!
//! Timing and layout settings for the watch loop and registrar, with
//! environment variable overrides.

use std::time::Duration;

/// Sub-path appended to every namespace.
pub const DEFAULT_DISCOVERY_PATH: &str = "docker/swarm/nodes";

/// Heartbeat used when neither the caller nor the config sets one.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(20);

/// TTL used when neither the caller nor the config sets one.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// Discovery configuration with sensible defaults
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Fixed sub-path under which member keys live (env: DISCOVERY_PATH)
    pub discovery_path: String,

    // Registration settings
    /// Interval between heartbeat writes (env: DISCOVERY_HEARTBEAT_SECS)
    pub heartbeat: Duration,

    /// Time-to-live of a heartbeat key (env: DISCOVERY_TTL_SECS)
    pub ttl: Duration,

    /// Delete the heartbeat key when the registrar is stopped
    pub deregister_on_stop: bool,

    // Watch retry settings
    /// Delay before the first retry after a failed attempt (env: DISCOVERY_RETRY_DELAY_MS)
    pub retry_delay: Duration,

    /// Upper bound for the retry delay (env: DISCOVERY_MAX_RETRY_DELAY_MS)
    pub max_retry_delay: Duration,

    /// Growth factor between consecutive retries
    pub retry_multiplier: f64,

    /// Capacity of the error stream; errors beyond it are dropped
    pub error_buffer: usize,

    // Backend settings
    /// Timeout for establishing the backend connection
    pub connect_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            discovery_path: DEFAULT_DISCOVERY_PATH.to_string(),

            heartbeat: DEFAULT_HEARTBEAT,
            ttl: DEFAULT_TTL,
            deregister_on_stop: true,

            retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(1),
            retry_multiplier: 1.0,
            error_buffer: 16,

            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl DiscoveryConfig {
    /// Create configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("DISCOVERY_PATH") {
            let path = path.trim_matches('/');
            if !path.is_empty() {
                config.discovery_path = path.to_string();
            }
        }

        // Zero keeps the default for heartbeat and TTL
        if let Some(secs) = env_u64("DISCOVERY_HEARTBEAT_SECS").filter(|&s| s > 0) {
            config.heartbeat = Duration::from_secs(secs);
        }

        if let Some(secs) = env_u64("DISCOVERY_TTL_SECS").filter(|&s| s > 0) {
            config.ttl = Duration::from_secs(secs);
        }

        if let Some(ms) = env_u64("DISCOVERY_RETRY_DELAY_MS") {
            config.retry_delay = Duration::from_millis(ms);
            config.max_retry_delay = config.max_retry_delay.max(config.retry_delay);
        }

        if let Some(ms) = env_u64("DISCOVERY_MAX_RETRY_DELAY_MS") {
            config.max_retry_delay = Duration::from_millis(ms);
        }

        config
    }

    /// Heartbeat to use for a caller-supplied value.
    ///
    /// Zero means the configured heartbeat, and a zero configured heartbeat
    /// means [`DEFAULT_HEARTBEAT`]. The result is never zero.
    pub fn resolve_heartbeat(&self, heartbeat: Duration) -> Duration {
        first_non_zero(heartbeat, self.heartbeat, DEFAULT_HEARTBEAT)
    }

    /// TTL to use for a caller-supplied value, resolved like
    /// [`resolve_heartbeat`](Self::resolve_heartbeat). The result is never zero.
    pub fn resolve_ttl(&self, ttl: Duration) -> Duration {
        first_non_zero(ttl, self.ttl, DEFAULT_TTL)
    }
}

fn first_non_zero(requested: Duration, configured: Duration, fallback: Duration) -> Duration {
    [requested, configured]
        .into_iter()
        .find(|d| !d.is_zero())
        .unwrap_or(fallback)
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.parse().ok()
}
