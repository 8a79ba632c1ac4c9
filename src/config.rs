//! Engine configuration parsed from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ErrorCode;
use crate::queue::OfflineFlush;

pub const DEFAULT_API_URL: &str = "http://localhost:8000/api";
pub const DEFAULT_WS_URL: &str = "ws://localhost:8000/api/ws";
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 3000;
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_RECENT_LIMIT: usize = 6;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value}")]
    InvalidValue { var: &'static str, value: String },
}

impl ErrorCode for ConfigError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidValue { .. } => "E_CONFIG_INVALID",
        }
    }
}

/// Reconnect policy: fixed interval, bounded attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_RECONNECT_INTERVAL_MS),
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Base URL of the authoritative REST API, without trailing slash.
    pub api_url: String,
    /// Base URL of the push transport; the board id is appended as a path segment.
    pub ws_url: String,
    /// Auth token sent as a bearer header and as the transport `token` parameter.
    pub token: Option<String>,
    pub reconnect: ReconnectPolicy,
    pub offline_flush: OfflineFlush,
    /// File backing the recently-viewed boards list.
    pub recent_file: PathBuf,
    pub recent_limit: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_owned(),
            ws_url: DEFAULT_WS_URL.to_owned(),
            token: None,
            reconnect: ReconnectPolicy::default(),
            offline_flush: OfflineFlush::default(),
            recent_file: default_recent_file(),
            recent_limit: DEFAULT_RECENT_LIMIT,
        }
    }
}

impl SyncConfig {
    /// Build typed config from environment variables.
    ///
    /// Optional:
    /// - `BOARDSYNC_API_URL`: default `http://localhost:8000/api`
    /// - `BOARDSYNC_WS_URL`: default `ws://localhost:8000/api/ws`
    /// - `BOARDSYNC_TOKEN`: no default; needed to open the push transport
    /// - `BOARDSYNC_RECONNECT_INTERVAL_MS`: default 3000
    /// - `BOARDSYNC_MAX_RECONNECT_ATTEMPTS`: default 5
    /// - `BOARDSYNC_OFFLINE_FLUSH`: `replay` (default) or `discard`
    /// - `BOARDSYNC_RECENT_FILE`: default `~/.boardsync/recent.json`
    /// - `BOARDSYNC_RECENT_LIMIT`: default 6
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for an unknown flush policy.
    /// Unparseable numbers fall back to their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_url = env_url("BOARDSYNC_API_URL", DEFAULT_API_URL);
        let ws_url = env_url("BOARDSYNC_WS_URL", DEFAULT_WS_URL);
        let token = std::env::var("BOARDSYNC_TOKEN").ok().filter(|t| !t.trim().is_empty());
        let reconnect = ReconnectPolicy {
            interval: Duration::from_millis(env_parse("BOARDSYNC_RECONNECT_INTERVAL_MS", DEFAULT_RECONNECT_INTERVAL_MS)),
            max_attempts: env_parse("BOARDSYNC_MAX_RECONNECT_ATTEMPTS", DEFAULT_MAX_RECONNECT_ATTEMPTS),
        };
        let offline_flush = parse_offline_flush(std::env::var("BOARDSYNC_OFFLINE_FLUSH").ok().as_deref())?;
        let recent_file = std::env::var("BOARDSYNC_RECENT_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_recent_file());
        let recent_limit = env_parse("BOARDSYNC_RECENT_LIMIT", DEFAULT_RECENT_LIMIT);

        Ok(Self { api_url, ws_url, token, reconnect, offline_flush, recent_file, recent_limit })
    }
}

fn env_url(key: &str, default: &str) -> String {
    std::env::var(key)
        .unwrap_or_else(|_| default.to_owned())
        .trim_end_matches('/')
        .to_owned()
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn parse_offline_flush(raw: Option<&str>) -> Result<OfflineFlush, ConfigError> {
    match raw.map(str::trim).unwrap_or("replay") {
        "" | "replay" => Ok(OfflineFlush::Replay),
        "discard" => Ok(OfflineFlush::Discard),
        other => Err(ConfigError::InvalidValue { var: "BOARDSYNC_OFFLINE_FLUSH", value: other.to_owned() }),
    }
}

fn default_recent_file() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".boardsync")
        .join("recent.json")
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
