use std::time::Duration;

pub const DEFAULT_SERVER_PORT: u16 = 3000;
pub const SSE_KEEPALIVE_SECS: u64 = 15;
pub const DEFAULT_BROADCAST_BUFFER: usize = 256;
pub const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_REMOTE_CONNECT_TIMEOUT_SECS: u64 = 3;
pub const DEFAULT_OUTLINE_DEBOUNCE_MS: u64 = 150;
pub const MAX_TILES_PER_REQUEST: usize = 256;

pub fn server_port() -> u16 {
    std::env::var("SERVER_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_SERVER_PORT)
}

/// Base URL of the remote document store. Unset or blank disables it.
pub fn remote_store_url() -> Option<String> {
    std::env::var("REMOTE_STORE_URL")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn remote_timeout() -> Duration {
    std::env::var("REMOTE_TIMEOUT_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(DEFAULT_REMOTE_TIMEOUT_SECS))
}

pub fn remote_connect_timeout() -> Duration {
    std::env::var("REMOTE_CONNECT_TIMEOUT_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(DEFAULT_REMOTE_CONNECT_TIMEOUT_SECS))
}

pub fn sse_broadcast_buffer() -> usize {
    std::env::var("SSE_BROADCAST_BUFFER")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_BROADCAST_BUFFER)
}

/// Quiet period after the last edit before outlines are recomputed.
pub fn outline_debounce() -> Duration {
    std::env::var("OUTLINE_DEBOUNCE_MS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or_else(|| Duration::from_millis(DEFAULT_OUTLINE_DEBOUNCE_MS))
}
