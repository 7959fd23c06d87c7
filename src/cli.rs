//! Command-line interface.

use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "lightbox", about = "Photo ingest and asynchronous processing pipeline", version)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the ingest node: HTTP API, blob upload, queue produce,
    /// notification fabric
    Serve,

    /// Run a worker node consuming the processing queue
    Worker {
        /// Consumer name within the worker group; unique per instance
        #[arg(long)]
        consumer: Option<String>,
    },
}
