//! BurrowDB CLI
//!
//! Command-line tools for BurrowDB log inspection.
//!
//! # Commands
//!
//! - `dump` - Print every log record in order
//! - `verify` - Walk the log validating envelopes and record encoding

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// BurrowDB command-line log tools.
#[derive(Parser)]
#[command(name = "burrowdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the log directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every log record in order
    Dump {
        /// Maximum number of records to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Walk backward from the newest record instead
        #[arg(short, long)]
        backward: bool,
    },

    /// Walk the log validating envelopes and record encoding
    Verify,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Dump { limit, backward } => {
            let path = cli.path.ok_or("Log path required for dump")?;
            commands::dump::run(&path, limit, backward)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Log path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Version => {
            println!("BurrowDB CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("BurrowDB Core v{}", burrowdb_core::VERSION);
        }
    }

    Ok(())
}
