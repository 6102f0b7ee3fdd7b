//! bittorrent-client - Main entry point
//!
//! Parses the command line, sets up logging on stderr and runs one
//! subcommand.

use anyhow::Result;
use bittorrent_client::cli::commands;
use bittorrent_client::{CliArgs, ClientConfig};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let args = CliArgs::parse_args();
    init_logging(&args);
    debug!("CLI arguments: {:?}", args);

    if let Err(e) = run(&args).await {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: &CliArgs) -> Result<()> {
    let config = ClientConfig::from_args(args)?;
    commands::run(&args.command, &config).await
}

/// Initialize logging based on verbosity settings
///
/// Logs go to stderr; `RUST_LOG` overrides the level chosen by flags.
fn init_logging(args: &CliArgs) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level().to_string().to_lowercase()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if args.verbose {
        subscriber.pretty().init();
    } else {
        subscriber.compact().init();
    }
}
