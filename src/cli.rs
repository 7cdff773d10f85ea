use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "observed-service", version, about = "Demo HTTP service with request observability")]
pub struct Cli {
    /// Configuration file path (config.{toml,yaml,json} in the working directory if omitted)
    #[arg(short, long, global = true, env = "REQUEST_OBSERVABILITY_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the service (default)
    Start {
        /// Override observability.service, to run several named instances
        #[arg(short, long)]
        service: Option<String>,

        /// Override server.port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Test configuration validity
    Test,

    /// Show version information
    Version,
}

impl Cli {
    /// Get the command to execute, defaulting to Start if none provided
    pub fn get_command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Start {
            service: None,
            port: None,
        })
    }
}
