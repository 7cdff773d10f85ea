use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let config_path = args.config.as_deref();

    match args.get_command() {
        cli::Commands::Start { service, port } => {
            commands::start::execute(config_path, service, port).await?;
        }
        cli::Commands::Test => {
            commands::test::execute(config_path)?;
        }
        cli::Commands::Version => {
            println!("observed-service v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
