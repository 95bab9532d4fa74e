//! Client configuration loaded from environment variables.
//!
//! Every setting has a default so the client runs with zero configuration.

use std::path::PathBuf;
use std::time::Duration;

use murmur_shared::constants::{
    DEFAULT_SERVER_ADDR, DUPLICATE_WINDOW_MS, MAX_TRACKED_MESSAGE_KEYS, SYSTEM_EVENT_WINDOW_MS,
};

/// Tunables of the reconciliation filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileLimits {
    /// Same sender + same content closer than this is one message.
    pub duplicate_window_ms: i64,
    /// Repeated join/leave narration for a peer inside this window collapses.
    pub system_event_window_ms: i64,
    /// Capacity of the admitted-key set.
    pub max_tracked_messages: usize,
}

impl Default for ReconcileLimits {
    fn default() -> Self {
        Self {
            duplicate_window_ms: DUPLICATE_WINDOW_MS,
            system_event_window_ms: SYSTEM_EVENT_WINDOW_MS,
            max_tracked_messages: MAX_TRACKED_MESSAGE_KEYS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Node address pre-filled for new connections.
    /// Env: `MURMUR_SERVER_ADDR`
    /// Default: `localhost:8080`
    pub server_addr: String,

    /// Directory holding `murmur.db`.
    /// Env: `MURMUR_DATA_DIR`
    /// Default: the platform data directory.
    pub data_dir: Option<PathBuf>,

    /// Env: `MURMUR_DUPLICATE_WINDOW_MS`, `MURMUR_SYSTEM_EVENT_WINDOW_MS`,
    /// `MURMUR_MAX_TRACKED_MESSAGES`
    pub limits: ReconcileLimits,

    /// How often failed fingerprint writes are retried.
    /// Env: `MURMUR_STORE_RETRY_SECS`
    /// Default: `5`
    pub store_retry_interval: Duration,

    /// Capacity of the bridge's command, event and notice channels.
    pub channel_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: DEFAULT_SERVER_ADDR.to_string(),
            data_dir: None,
            limits: ReconcileLimits::default(),
            store_retry_interval: Duration::from_secs(5),
            channel_capacity: 256,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("MURMUR_SERVER_ADDR") {
            if !addr.trim().is_empty() {
                config.server_addr = addr.trim().to_string();
            }
        }

        if let Some(dir) = lookup("MURMUR_DATA_DIR") {
            config.data_dir = Some(PathBuf::from(dir));
        }

        if let Some(ms) = parse_positive::<i64>(&lookup, "MURMUR_DUPLICATE_WINDOW_MS") {
            config.limits.duplicate_window_ms = ms;
        }

        if let Some(ms) = parse_positive::<i64>(&lookup, "MURMUR_SYSTEM_EVENT_WINDOW_MS") {
            config.limits.system_event_window_ms = ms;
        }

        if let Some(n) = parse_positive::<usize>(&lookup, "MURMUR_MAX_TRACKED_MESSAGES") {
            config.limits.max_tracked_messages = n;
        }

        if let Some(secs) = parse_positive::<u64>(&lookup, "MURMUR_STORE_RETRY_SECS") {
            config.store_retry_interval = Duration::from_secs(secs);
        }

        config
    }
}

fn parse_positive<N>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<N>
where
    N: std::str::FromStr + PartialOrd + Default,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<N>() {
        Ok(n) if n > N::default() => Some(n),
        _ => {
            tracing::warn!(key, value = %raw, "Invalid value, using default");
            None
        }
    }
}
