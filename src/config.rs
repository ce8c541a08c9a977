use std::env;
use std::time::Duration;

use crate::error::RelayError;

#[derive(Debug, Clone)]
pub struct Config {
    pub stream_url: String,
    pub broadcast_room: String,
    pub reconnect_max_attempts: u32,
    pub reconnect_delay: Duration,
    pub ping_interval: Duration,
    pub call_timeout: Duration,
    pub dedup_retention: Duration,
    pub event_buffer_size: usize,
    pub push_queue_size: usize,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Result<Self, RelayError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            stream_url: env::var("STREAM_URL")
                .unwrap_or_else(|_| "ws://localhost:4000/stream".to_string()),
            broadcast_room: env::var("BROADCAST_ROOM").unwrap_or_else(|_| "riders".to_string()),
            reconnect_max_attempts: parse_or_default("RECONNECT_MAX_ATTEMPTS", 10)?,
            reconnect_delay: Duration::from_millis(parse_or_default("RECONNECT_DELAY_MS", 1_000)?),
            ping_interval: Duration::from_secs(parse_or_default("PING_INTERVAL_SECS", 30)?),
            call_timeout: Duration::from_secs(parse_or_default("CALL_TIMEOUT_SECS", 10)?),
            dedup_retention: Duration::from_millis(parse_or_default("DEDUP_RETENTION_MS", 2_000)?),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 256)?,
            push_queue_size: parse_or_default("PUSH_QUEUE_SIZE", 64)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, RelayError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| RelayError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
