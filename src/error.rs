use thiserror::Error;

/// Errors raised while building the observability stack.
///
/// None of these can occur on the request path: they surface at startup,
/// when configuration is loaded and the recorder is constructed.
#[derive(Debug, Error)]
pub enum ObservabilityError {
    /// Histogram bucket boundaries are unusable
    #[error("Invalid histogram buckets: {0}")]
    InvalidBuckets(String),

    /// Correlation header name is not a valid HTTP header name
    #[error("Invalid header name: {0}")]
    InvalidHeaderName(String),

    /// Prometheus recorder could not be built
    #[error("Metrics error: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    /// Configuration source could not be read or deserialized
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Configuration was read but failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Errors reported by a [`LogSink`](crate::observability::LogSink).
///
/// The middleware swallows these; they only ever reach the internal error log.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Event could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Sink buffer is full and the event was dropped
    #[error("Sink saturated, event dropped")]
    Saturated,

    /// Background writer has shut down
    #[error("Sink closed")]
    Closed,
}

impl SinkError {
    /// Short machine-friendly name used in internal error logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Serialization(_) => "serialization",
            Self::Saturated => "saturated",
            Self::Closed => "closed",
        }
    }
}

pub type Result<T> = std::result::Result<T, ObservabilityError>;
