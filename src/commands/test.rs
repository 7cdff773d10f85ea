use anyhow::Result;
use colored::Colorize;
use request_observability::config::{self, SinkKind};
use std::path::Path;

/// Execute the test command
///
/// This validates the configuration file without starting the server
pub fn execute(config_path: Option<&Path>) -> Result<()> {
    println!("{}", "Testing configuration...".yellow());

    // Load configuration (this will validate it)
    let cfg = config::load_config(config_path)?;

    println!("{}", "✓ Configuration test successful".green());
    println!();

    println!("{}", "Configuration Summary:".bold());
    println!("  {}: {}:{}", "Server".cyan(), cfg.server.host, cfg.server.port);
    println!("  {}: {}", "Log Level".cyan(), cfg.server.log_level);
    println!("  {}: {:?}", "Log Format".cyan(), cfg.server.log_format);
    println!();

    let obs = &cfg.observability;
    println!("{}", "Observability:".cyan());
    println!("    Service: {}", obs.service);
    println!("    Request ID header: {}", obs.request_id_header);
    println!(
        "    Echo request ID: {}",
        if obs.echo_request_id {
            "enabled".green()
        } else {
            "disabled".red()
        }
    );
    println!("    Histogram buckets (s): {:?}", obs.histogram_buckets);
    match obs.sink {
        SinkKind::Tracing => println!("    Sink: tracing"),
        SinkKind::Stream => println!(
            "    Sink: stream (capacity {}, batch {}, flush {}ms)",
            obs.stream_capacity, obs.stream_batch_size, obs.stream_flush_ms
        ),
    }

    Ok(())
}
