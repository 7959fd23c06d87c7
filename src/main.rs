//! Lightbox entry point: parse arguments, install logging, run the
//! selected role.

use clap::Parser;
use tracing::error;

use lightbox::app::{self, init_tracing};
use lightbox::cli::{Cli, Commands};
use lightbox::config::Config;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = Config::from_env();
    let result = match cli.command {
        Commands::Serve => app::run_serve(config).await,
        Commands::Worker { consumer } => app::run_worker(config, consumer).await,
    };

    if let Err(e) = result {
        error!("Fatal: {:#}", e);
        std::process::exit(1);
    }
}
