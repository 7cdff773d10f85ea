//! Structured request log events

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Message carried by the start event
pub const REQUEST_STARTED: &str = "request started";

/// Message carried by the completion event
pub const REQUEST_COMPLETED: &str = "request completed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Error,
}

/// One structured log line
///
/// Serializes to a flat JSON object with camelCase keys. Optional fields are
/// omitted when absent, so a start event never carries `statusCode` and a
/// completion event never carries `userAgent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    pub level: LogLevel,
    pub message: String,
    pub service: String,
    /// ISO-8601 (RFC 3339, millisecond precision, UTC)
    pub timestamp: String,
    pub correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_millis: Option<u64>,
}

impl LogEvent {
    /// Bare event with only the always-present fields
    pub fn new(
        level: LogLevel,
        message: impl Into<String>,
        service: impl Into<String>,
        at: DateTime<Utc>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            level,
            message: message.into(),
            service: service.into(),
            timestamp: format_timestamp(at),
            correlation_id: correlation_id.into(),
            method: None,
            path: None,
            client_address: None,
            user_agent: None,
            status_code: None,
            duration_millis: None,
        }
    }

    /// True for the completion half of a start/completion pair
    pub fn is_completion(&self) -> bool {
        self.status_code.is_some()
    }
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
