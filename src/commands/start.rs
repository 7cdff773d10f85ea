use anyhow::Result;
use colored::Colorize;
use request_observability::{config, init_tracing, server};
use std::path::Path;
use tracing::info;

/// Execute the start command
///
/// This will:
/// 1. Load configuration and apply command-line overrides
/// 2. Initialize tracing
/// 3. Start the server (blocks until shutdown)
pub async fn execute(
    config_path: Option<&Path>,
    service: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    let mut cfg = config::load_config(config_path)?;

    if let Some(service) = service {
        cfg.observability.service = service;
    }
    if let Some(port) = port {
        cfg.server.port = port;
    }
    config::validate_config(&cfg)?;

    println!(
        "{}",
        format!("Starting {} in foreground mode...", cfg.observability.service).green()
    );

    let _log_guard = init_tracing(&cfg.server.log_level, cfg.server.log_format);
    info!(
        service = %cfg.observability.service,
        version = env!("CARGO_PKG_VERSION"),
        "Starting observed service"
    );

    server::start_server(cfg).await?;

    Ok(())
}
