// Lockbox: Application Entry Point
//
// Parses CLI arguments, loads configuration, installs logging (held by a
// guard that flushes on shutdown), and dispatches to the command handler.

use clap::Parser;

use lockbox::cli::{execute, resolve_config, Cli};
use lockbox::telemetry::init_logging;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match resolve_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let guard = match init_logging(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let result = execute(cli.command, config).await;
    guard.shutdown();

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
