//! skein CLI
//!
//! Command-line tools for skein log directories.
//!
//! # Commands
//!
//! - `printlog` - Print log records
//! - `verify` - Check every file header and record checksum
//! - `archive` - List or remove log files no longer needed
//! - `stat` - Display log and transaction statistics

mod commands;

use clap::{Parser, Subcommand};
use skein_core::Lsn;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// skein command-line log tools.
#[derive(Parser)]
#[command(name = "skein")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the environment directory
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
    /// Print log records
    Printlog {
        /// Start at this record (FILE/OFFSET)
        #[arg(short, long)]
        start: Option<Lsn>,

        /// Maximum number of records to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify every log file header and record checksum
    Verify,

    /// List log files no longer needed by the last checkpoint
    Archive {
        /// Remove the files instead of listing them
        #[arg(short, long)]
        remove: bool,
    },

    /// Display log and transaction statistics
    Stat {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Printlog {
            start,
            limit,
            format,
        } => {
            let path = cli.path.ok_or("Environment path required for printlog")?;
            commands::printlog::run(&path, start, limit, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Environment path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Archive { remove } => {
            let path = cli.path.ok_or("Environment path required for archive")?;
            commands::archive::run(&path, remove)?;
        }
        Commands::Stat { format } => {
            let path = cli.path.ok_or("Environment path required for stat")?;
            commands::stat::run(&path, &format)?;
        }
        Commands::Version => {
            println!("skein CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("skein core v{}", skein_core::VERSION);
        }
    }

    Ok(())
}
