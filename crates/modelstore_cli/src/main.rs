//! ModelStore CLI
//!
//! Command-line tools for ModelStore log files.
//!
//! # Commands
//!
//! - `inspect` - Display layout, record counts and a class histogram
//! - `migrate` - Copy a store into a new file with another encoding
//! - `compact` - Rewrite the log so it holds only live records

mod commands;

use clap::{Parser, Subcommand};
use modelstore_core::EncodingKind;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// ModelStore command-line tools.
#[derive(Parser)]
#[command(name = "modelstore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store's log file
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
    /// Display store layout and statistics
    Inspect {
        /// Show the number of entities per class
        #[arg(short, long)]
        classes: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Copy every entity into a new store
    Migrate {
        /// Path of the new log file
        target: PathBuf,

        /// Encoding of the new store (indexed, array, list)
        #[arg(short, long, default_value = "indexed")]
        encoding: EncodingKind,

        /// Skip the class to instances index in the new store
        #[arg(long)]
        no_index: bool,
    },

    /// Compact the log to reclaim space
    Compact {
        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

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
        Commands::Inspect { classes, format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, classes, &format)?;
        }
        Commands::Migrate {
            target,
            encoding,
            no_index,
        } => {
            let path = cli.path.ok_or("Store path required for migrate")?;
            commands::migrate::run(&path, &target, encoding, !no_index)?;
        }
        Commands::Compact { dry_run } => {
            let path = cli.path.ok_or("Store path required for compact")?;
            commands::compact::run(&path, dry_run)?;
        }
        Commands::Version => {
            println!("ModelStore CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("ModelStore Core v{}", modelstore_core::VERSION);
            println!("Store format v{}", modelstore_core::FORMAT_VERSION);
        }
    }

    Ok(())
}
