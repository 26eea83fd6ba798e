//! Finloop CLI entry point.

use clap::Parser;

use finloop::cli::{Cli, Commands};
use finloop::infrastructure::config::ConfigLoader;
use finloop::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match ConfigLoader::load_from_dir(&cli.config_dir) {
        Ok(config) => config,
        Err(err) => finloop::cli::handle_error(err, cli.json),
    };

    let _logger = match LoggerImpl::init(&LogConfig::from(&config.logging)) {
        Ok(logger) => logger,
        Err(err) => finloop::cli::handle_error(err, cli.json),
    };

    let result = match cli.command {
        Commands::Ask(args) => finloop::cli::commands::ask::execute(args, &config, cli.json).await,
        Commands::Trace(args) => {
            finloop::cli::commands::trace::execute(args, &config, cli.json).await
        }
    };

    if let Err(err) = result {
        finloop::cli::handle_error(err, cli.json);
    }
}
