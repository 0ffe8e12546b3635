//! Communicator timing and limits, with environment overrides.

use std::time::Duration;

pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Cap on a single topic or payload section. Checked before allocating.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    /// Time between keep-alives on a client connection.
    pub ping_interval: Duration,
    /// How long a keep-alive may wait for its answer.
    pub ping_timeout: Duration,
    /// How long a client waits for the snapshot after connecting.
    pub sync_timeout: Duration,
    /// How long a close notice may take to flush before the socket is dropped.
    pub close_timeout: Duration,
    pub max_frame_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ping_interval: DEFAULT_PING_INTERVAL,
            ping_timeout: DEFAULT_PING_TIMEOUT,
            sync_timeout: DEFAULT_SYNC_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl Config {
    /// Defaults, overridden by `OWNTCP_*` environment variables.
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_millis("OWNTCP_PING_INTERVAL_MS") {
            config.ping_interval = v;
        }
        if let Some(v) = env_millis("OWNTCP_PING_TIMEOUT_MS") {
            config.ping_timeout = v;
        }
        if let Some(v) = env_millis("OWNTCP_SYNC_TIMEOUT_MS") {
            config.sync_timeout = v;
        }
        if let Some(v) = env_millis("OWNTCP_CLOSE_TIMEOUT_MS") {
            config.close_timeout = v;
        }
        if let Some(v) = env_parse::<usize>("OWNTCP_MAX_FRAME_BYTES") {
            config.max_frame_bytes = v;
        }
        config
    }
}

fn env_millis(name: &str) -> Option<Duration> {
    env_parse::<u64>(name).map(Duration::from_millis)
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "ignoring unparseable config override");
            None
        }
    }
}
