use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ObservabilityError, Result};
use crate::metrics::{validate_buckets, DEFAULT_BUCKETS};
use crate::observability::{ObserverConfig, DEFAULT_REQUEST_ID_HEADER};

/// Environment prefix, e.g. `REQUEST_OBSERVABILITY__SERVER__PORT=9000`
pub const ENV_PREFIX: &str = "REQUEST_OBSERVABILITY";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}

/// Where request events go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Through the process `tracing` subscriber
    Tracing,
    /// JSON lines on stdout from a background writer
    Stream,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub service: String,
    pub request_id_header: String,
    pub echo_request_id: bool,
    pub histogram_buckets: Vec<f64>,
    pub sink: SinkKind,
    pub stream_capacity: usize,
    pub stream_batch_size: usize,
    pub stream_flush_ms: u64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service: env!("CARGO_PKG_NAME").to_string(),
            request_id_header: DEFAULT_REQUEST_ID_HEADER.to_string(),
            echo_request_id: true,
            histogram_buckets: DEFAULT_BUCKETS.to_vec(),
            sink: SinkKind::Tracing,
            stream_capacity: 10_000,
            stream_batch_size: 100,
            stream_flush_ms: 100,
        }
    }
}

impl ObservabilityConfig {
    pub fn observer_config(&self) -> Result<ObserverConfig> {
        Ok(ObserverConfig::new(self.service.clone())
            .with_request_id_header(&self.request_id_header)?
            .with_echo_request_id(self.echo_request_id))
    }
}

/// Load configuration: defaults, then the file, then environment overrides
///
/// Without an explicit path, `config.{toml,yaml,json}` in the working
/// directory is used if it exists.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let file = match path {
        Some(path) => config::File::from(path).required(true),
        None => config::File::with_name("config").required(false),
    };

    let builder = config::Config::builder().add_source(file).add_source(
        config::Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("observability.histogram_buckets"),
    );

    build_config(builder)
}

fn build_config(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<Config> {
    let cfg: Config = builder.build()?.try_deserialize()?;
    validate_config(&cfg)?;
    Ok(cfg)
}

pub fn validate_config(cfg: &Config) -> Result<()> {
    let obs = &cfg.observability;

    if obs.service.trim().is_empty() {
        return Err(ObservabilityError::InvalidConfig(
            "observability.service cannot be empty".to_string(),
        ));
    }

    // Surfaces header-name errors at load time instead of at server start
    obs.observer_config()?;

    validate_buckets(&obs.histogram_buckets)?;

    if obs.sink == SinkKind::Stream {
        if obs.stream_capacity == 0 {
            return Err(ObservabilityError::InvalidConfig(
                "observability.stream_capacity must be greater than 0".to_string(),
            ));
        }
        if obs.stream_batch_size == 0 {
            return Err(ObservabilityError::InvalidConfig(
                "observability.stream_batch_size must be greater than 0".to_string(),
            ));
        }
        if obs.stream_flush_ms == 0 {
            return Err(ObservabilityError::InvalidConfig(
                "observability.stream_flush_ms must be greater than 0".to_string(),
            ));
        }
    }

    if cfg.server.log_level.trim().is_empty() {
        return Err(ObservabilityError::InvalidConfig(
            "server.log_level cannot be empty".to_string(),
        ));
    }

    Ok(())
}
