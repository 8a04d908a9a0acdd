//! Downlink CLI - fetch and inspect catalog-declared content caches.

mod commands;
mod error;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Catalog-driven download cache for remote content.
#[derive(Debug, Parser)]
#[command(name = "downlink", version, about)]
struct Cli {
    /// Verbose logging (also honors RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Download everything a catalog declares and verify it on disk
    Fetch(commands::fetch::FetchArgs),
    /// Reconcile a catalog against the cache and print per-entry state
    Status(commands::status::StatusArgs),
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Command::Fetch(args) => commands::fetch::run(args),
        Command::Status(args) => commands::status::run(args),
    };

    if let Err(err) = result {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "downlink=debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
