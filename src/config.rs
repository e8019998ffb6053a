//! Engine configuration parsed from environment variables.
//!
//! Every knob has a `DEFAULT_*` constant and an optional `PAINTER_*`
//! override. Invalid values fall back to the default rather than failing,
//! matching how the rest of the runtime treats tuning parameters.

use std::time::Duration;

use crate::retry::RetryPolicy;

pub const DEFAULT_BOARD_URL: &str = "https://www.luogu.com.cn/paintboard/board";
pub const DEFAULT_PAINT_URL: &str = "https://www.luogu.com.cn/paintboard/paint";
pub const DEFAULT_SOCKET_URL: &str = "wss://ws.luogu.com.cn/ws";

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_JOIN_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_JOIN_RETRY_MS: u64 = 0;
pub const DEFAULT_LIVENESS_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 5;
pub const DEFAULT_RETRY_BASE_MS: u64 = 500;
pub const DEFAULT_RETRY_MAX_MS: u64 = 8_000;
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1_000;
pub const DEFAULT_COOLDOWN_MS: u64 = 31_000;

/// Timers governing a single socket channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelTimings {
    /// How long to wait for `join_result` after sending `join_channel`.
    pub join_timeout: Duration,
    /// Re-send the join on this interval instead of failing on timeout.
    pub join_retry: Option<Duration>,
    /// Maximum silence (no ack, heartbeat or data) before the channel fails.
    /// Must exceed the server heartbeat interval.
    pub liveness_timeout: Duration,
}

impl Default for ChannelTimings {
    fn default() -> Self {
        Self {
            join_timeout: Duration::from_millis(DEFAULT_JOIN_TIMEOUT_MS),
            join_retry: None,
            liveness_timeout: Duration::from_secs(DEFAULT_LIVENESS_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub board_url: String,
    pub paint_url: String,
    pub socket_url: String,
    /// Timeout applied to every HTTP request (snapshot and paint).
    pub request_timeout: Duration,
    pub channel: ChannelTimings,
    /// Retry policy for snapshot fetches.
    pub snapshot_retry: RetryPolicy,
    /// Retry policy for paint writes.
    pub paint_retry: RetryPolicy,
    /// Delay before rebuilding a socket that closed terminally.
    pub reconnect_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let retry = RetryPolicy::new(
            DEFAULT_RETRY_ATTEMPTS,
            Duration::from_millis(DEFAULT_RETRY_BASE_MS),
            Duration::from_millis(DEFAULT_RETRY_MAX_MS),
        );
        Self {
            board_url: DEFAULT_BOARD_URL.to_owned(),
            paint_url: DEFAULT_PAINT_URL.to_owned(),
            socket_url: DEFAULT_SOCKET_URL.to_owned(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            channel: ChannelTimings::default(),
            snapshot_retry: retry,
            paint_retry: retry,
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
        }
    }
}

impl EngineConfig {
    /// Build engine config from environment variables.
    ///
    /// Optional:
    /// - `PAINTER_BOARD_URL`, `PAINTER_PAINT_URL`, `PAINTER_SOCKET_URL`
    /// - `PAINTER_REQUEST_TIMEOUT_SECS`: default 30
    /// - `PAINTER_JOIN_TIMEOUT_MS`: default 5000
    /// - `PAINTER_JOIN_RETRY_MS`: default 0 (fail on first timeout)
    /// - `PAINTER_LIVENESS_TIMEOUT_SECS`: default 120
    /// - `PAINTER_RETRY_ATTEMPTS`, `PAINTER_RETRY_BASE_MS`, `PAINTER_RETRY_MAX_MS`
    /// - `PAINTER_RECONNECT_DELAY_MS`: default 1000
    #[must_use]
    pub fn from_env() -> Self {
        let retry = RetryPolicy::new(
            env_parse("PAINTER_RETRY_ATTEMPTS", DEFAULT_RETRY_ATTEMPTS),
            Duration::from_millis(env_parse("PAINTER_RETRY_BASE_MS", DEFAULT_RETRY_BASE_MS)),
            Duration::from_millis(env_parse("PAINTER_RETRY_MAX_MS", DEFAULT_RETRY_MAX_MS)),
        );
        let join_retry_ms = env_parse("PAINTER_JOIN_RETRY_MS", DEFAULT_JOIN_RETRY_MS);

        Self {
            board_url: env_string("PAINTER_BOARD_URL", DEFAULT_BOARD_URL),
            paint_url: env_string("PAINTER_PAINT_URL", DEFAULT_PAINT_URL),
            socket_url: env_string("PAINTER_SOCKET_URL", DEFAULT_SOCKET_URL),
            request_timeout: Duration::from_secs(env_parse(
                "PAINTER_REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )),
            channel: ChannelTimings {
                join_timeout: Duration::from_millis(env_parse("PAINTER_JOIN_TIMEOUT_MS", DEFAULT_JOIN_TIMEOUT_MS)),
                join_retry: (join_retry_ms > 0).then(|| Duration::from_millis(join_retry_ms)),
                liveness_timeout: Duration::from_secs(env_parse(
                    "PAINTER_LIVENESS_TIMEOUT_SECS",
                    DEFAULT_LIVENESS_TIMEOUT_SECS,
                )),
            },
            snapshot_retry: retry,
            paint_retry: retry,
            reconnect_delay: Duration::from_millis(env_parse(
                "PAINTER_RECONNECT_DELAY_MS",
                DEFAULT_RECONNECT_DELAY_MS,
            )),
        }
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_owned())
        .trim()
        .to_owned()
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
