//! dhus CLI - Command-line interface
//!
//! This binary provides search and download commands on top of the dhus
//! client library.

mod commands;
mod error;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::common::ConnectionArgs;
use commands::{download, search};

#[derive(Parser)]
#[command(
    name = "dhus",
    version,
    about = "Search and download satellite products from DHuS catalogs"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search the catalog
    Search {
        #[command(flatten)]
        connection: ConnectionArgs,
        #[command(flatten)]
        args: search::SearchArgs,
    },

    /// Download product archives
    Download {
        #[command(flatten)]
        connection: ConnectionArgs,
        #[command(flatten)]
        args: download::DownloadArgs,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Search { connection, args } => search::run(&connection, &args),
        Commands::Download { connection, args } => download::run(&connection, &args),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
