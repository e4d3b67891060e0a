use std::fmt;

use serde::{Deserialize, Serialize};

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_QUEUE_SIZE: usize = 128;
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 4;

/// Largest accepted POST body in bytes.
pub const MAX_BODY_BYTES: usize = 1024;

pub const TAP_ROUTE: &str = "/tap";
pub const SWIPE_ROUTE: &str = "/swipe";
pub const KEY_ROUTE: &str = "/key";
pub const TEXT_ROUTE: &str = "/text";
pub const CAPTURE_ROUTE: &str = "/cap";
pub const HEALTH_ROUTE: &str = "/health";
pub const METRICS_ROUTE: &str = "/metrics";

const OK_PREFIX: &str = "OK|";
const ERROR_PREFIX: &str = "ERROR|";

/// One response body line in the `OK|...` / `ERROR|...` convention.
///
/// Clients only ever need to look at the prefix to learn whether the request
/// succeeded, so every action result and every rejection is rendered through
/// this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyLine {
    Ok(String),
    Error(String),
}

impl ReplyLine {
    pub fn ok(message: impl Into<String>) -> Self {
        Self::Ok(message.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Ok(message) | Self::Error(message) => message,
        }
    }
}

impl fmt::Display for ReplyLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok(message) => write!(f, "{OK_PREFIX}{message}"),
            Self::Error(message) => write!(f, "{ERROR_PREFIX}{message}"),
        }
    }
}

/// Point-in-time dispatcher counters served by the metrics route.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchMetrics {
    pub admitted: u64,
    pub rejected_busy: u64,
    pub rejected_queue_full: u64,
    pub rejected_invalid: u64,
    pub enqueued: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub delivered: u64,
    pub discarded: u64,
    pub acknowledged: u64,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub available_permits: usize,
    pub workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
}

impl HealthStatus {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_line_renders_prefixes() {
        assert_eq!(ReplyLine::ok("tapped 10 20 1 0").to_string(), "OK|tapped 10 20 1 0");
        assert_eq!(ReplyLine::error("queue full").to_string(), "ERROR|queue full");
    }

    #[test]
    fn message_keeps_embedded_separators() {
        let line = ReplyLine::error("executing command failed: output:a|b");
        assert!(!line.is_ok());
        assert_eq!(line.message(), "executing command failed: output:a|b");
        assert_eq!(
            line.to_string(),
            "ERROR|executing command failed: output:a|b"
        );
    }

    #[test]
    fn metrics_snapshot_serializes_as_flat_json() {
        let metrics = DispatchMetrics {
            admitted: 3,
            queue_capacity: 128,
            ..DispatchMetrics::default()
        };
        let value = serde_json::to_value(metrics).expect("metrics should serialize");
        assert_eq!(value["admitted"], 3);
        assert_eq!(value["queue_capacity"], 128);
    }
}
