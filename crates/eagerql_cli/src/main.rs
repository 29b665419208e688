//! Main entry point for the eagerql CLI.

use clap::Parser;
use eagerql_cli::Cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    let default_filter = if cli.verbose {
        "eagerql=debug,eagerql_runtime=debug"
    } else if cli.quiet {
        "eagerql=warn,eagerql_runtime=warn"
    } else {
        "eagerql=info,eagerql_runtime=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match eagerql_cli::run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
