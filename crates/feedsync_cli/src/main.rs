//! feedsync CLI
//!
//! Command-line tools for a feedsync local store.
//!
//! # Commands
//!
//! - `sync` - Run one sync attempt against a tenant API
//! - `inspect` - Display store statistics and sync metadata
//! - `dump` - Print the stored records of a table
//! - `verify` - Verify log integrity
//! - `compact` - Rewrite the log as a single image
//! - `reset` - Wipe all local rows and metadata

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// feedsync command-line tools.
#[derive(Parser)]
#[command(name = "feedsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long, env = "FEEDSYNC_DB")]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sync attempt
    Sync {
        /// Tenant identifier, used as the API subdomain
        #[arg(short, long)]
        tenant: String,

        /// API host, e.g. api.example.com
        #[arg(long)]
        host: String,

        /// URL scheme
        #[arg(long, default_value = "https")]
        protocol: String,

        /// Bearer token
        #[arg(long, env = "FEEDSYNC_TOKEN", hide_env_values = true)]
        token: String,

        /// Read the whole response before decoding it
        #[arg(long)]
        buffered: bool,

        /// Sync even if the last sync is recent
        #[arg(long)]
        force: bool,

        /// Overall stream deadline in seconds
        #[arg(long, default_value = "120")]
        timeout: u64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Display store statistics and sync metadata
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the stored records of a table as NDJSON
    Dump {
        /// Table to dump
        table: String,

        /// Maximum number of records to print
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Verify log integrity
    Verify,

    /// Rewrite the log as a single image
    Compact,

    /// Wipe all local rows and metadata
    Reset {
        /// Confirm the wipe
        #[arg(long)]
        yes: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG overrides the default level
    let default = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Sync {
            tenant,
            host,
            protocol,
            token,
            buffered,
            force,
            timeout,
            format,
        } => {
            let path = cli.path.ok_or("Store path required for sync")?;
            let options = commands::sync::SyncOptions {
                tenant,
                host,
                protocol,
                token,
                buffered,
                force,
                timeout_secs: timeout,
            };
            commands::sync::run(&path, &options, &format)?;
        }
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Dump { table, limit } => {
            let path = cli.path.ok_or("Store path required for dump")?;
            commands::dump::run(&path, &table, limit)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Store path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Compact => {
            let path = cli.path.ok_or("Store path required for compact")?;
            commands::compact::run(&path)?;
        }
        Commands::Reset { yes } => {
            let path = cli.path.ok_or("Store path required for reset")?;
            if !yes {
                return Err("Refusing to wipe the store without --yes".into());
            }
            commands::reset::run(&path)?;
        }
        Commands::Version => {
            println!("feedsync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "Store schema {}",
                feedsync_store::CURRENT_SCHEMA_VERSION
            );
        }
    }

    Ok(())
}
