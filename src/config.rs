//! Server configuration loaded from environment variables

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::protocol::MAX_NAME_BYTES;

/// Runtime settings for the chat server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the TCP listener binds to
    pub bind_addr: SocketAddr,
    /// Route the WebSocket endpoint is mounted on
    pub path: String,
    /// How often the server pings each client
    pub ping_interval: Duration,
    /// How long a connection may stay silent before it is dropped
    pub idle_timeout: Duration,
    /// Largest WebSocket message accepted from a client
    pub max_frame_size: usize,
    /// Per-session outbound queue capacity
    pub outbound_queue: usize,
    /// Longest display name accepted at handshake, in bytes
    pub max_name_len: usize,
    /// Longest chat message accepted, in bytes
    pub max_message_len: usize,
    /// Whether a sender also receives its own chat messages
    pub echo_messages: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            path: "/chat".to_string(),
            ping_interval: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(15),
            max_frame_size: 64 * 1024,
            outbound_queue: 256,
            max_name_len: MAX_NAME_BYTES,
            max_message_len: 2000,
            echo_messages: false,
        }
    }
}

impl ServerConfig {
    /// Load config from environment variables, keeping defaults for unset or
    /// unparseable values
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let mut path = std::env::var("CHAT_PATH")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.path);
        if !path.starts_with('/') {
            path.insert(0, '/');
        }

        let max_name_len = env_parse("CHAT_MAX_NAME_LEN", defaults.max_name_len);
        let max_name_len = if (1..=MAX_NAME_BYTES).contains(&max_name_len) {
            max_name_len
        } else {
            tracing::warn!(
                max_name_len,
                "CHAT_MAX_NAME_LEN must be between 1 and 255, clamping"
            );
            max_name_len.clamp(1, MAX_NAME_BYTES)
        };

        let config = Self {
            bind_addr: env_parse("CHAT_BIND_ADDR", defaults.bind_addr),
            path,
            ping_interval: Duration::from_secs(
                env_parse("CHAT_PING_INTERVAL_SECS", defaults.ping_interval.as_secs()).max(1),
            ),
            idle_timeout: Duration::from_secs(
                env_parse("CHAT_IDLE_TIMEOUT_SECS", defaults.idle_timeout.as_secs()).max(1),
            ),
            max_frame_size: env_parse("CHAT_MAX_FRAME_BYTES", defaults.max_frame_size),
            outbound_queue: env_parse("CHAT_OUTBOUND_QUEUE", defaults.outbound_queue).max(1),
            max_name_len,
            max_message_len: env_parse("CHAT_MAX_MESSAGE_LEN", defaults.max_message_len),
            echo_messages: std::env::var("CHAT_ECHO_MESSAGES")
                .map(|v| v != "0" && v.to_lowercase() != "false")
                .unwrap_or(defaults.echo_messages),
        };

        tracing::info!(
            bind_addr = %config.bind_addr,
            path = %config.path,
            ping_interval_secs = config.ping_interval.as_secs(),
            idle_timeout_secs = config.idle_timeout.as_secs(),
            echo_messages = config.echo_messages,
            "Server config loaded"
        );

        config
    }
}

/// Parse an env var, warning and falling back to `default` on bad input
fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, value = %raw, error = %e, "Invalid config value, using default");
                default
            }
        },
        Err(_) => default,
    }
}
