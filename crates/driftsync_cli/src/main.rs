//! driftsync CLI
//!
//! Command-line tools for inspecting and maintaining driftsync replicas.
//!
//! # Commands
//!
//! - `inspect` - Display replica contents and metadata
//! - `migrate` - Move entities out of the legacy aggregate document
//! - `sweep` - Remove entities that no longer exist upstream
//! - `resolve` - Resolve two entity snapshots offline

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// driftsync replica maintenance tools.
#[derive(Parser)]
#[command(name = "driftsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the replica file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Entity kind to operate on
    #[arg(global = true, short, long, default_value = "task")]
    kind: String,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display replica contents and metadata
    Inspect {
        /// List every entity
        #[arg(short, long)]
        entities: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Move entities out of the legacy aggregate document
    Migrate {
        /// Legacy document id (defaults to the plural of the kind)
        #[arg(long)]
        legacy_doc: Option<String>,

        /// Field of the legacy document holding the entity array
        #[arg(long, default_value = "items")]
        legacy_field: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Remove entities that no longer exist upstream
    Sweep {
        /// Entity ids to keep
        #[arg(long = "keep", value_delimiter = ',')]
        keep: Vec<String>,

        /// JSON file holding an array of entity ids to keep
        #[arg(long)]
        keep_file: Option<PathBuf>,

        /// Allow an empty keep set, removing every entity
        #[arg(long)]
        allow_empty: bool,

        /// Dry run - show what would be removed
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Resolve two entity snapshots offline
    Resolve {
        /// JSON file with the local snapshot (omit for a local deletion)
        #[arg(long)]
        local: Option<PathBuf>,

        /// JSON file with the remote snapshot (omit for a remote deletion)
        #[arg(long)]
        remote: Option<PathBuf>,

        /// Strategy (last_write_wins, local_priority, remote_priority, field_level)
        #[arg(short, long, default_value = "last_write_wins")]
        strategy: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
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
        Commands::Inspect { entities, format } => {
            let path = cli.path.ok_or("Replica path required for inspect")?;
            let config = commands::adapter_config(&cli.kind, None, None)?;
            commands::inspect::run(&path, &config, entities, &format).await?;
        }
        Commands::Migrate {
            legacy_doc,
            legacy_field,
            format,
        } => {
            let path = cli.path.ok_or("Replica path required for migrate")?;
            let config = commands::adapter_config(&cli.kind, legacy_doc, Some(legacy_field))?;
            commands::migrate::run(&path, config, &format).await?;
        }
        Commands::Sweep {
            keep,
            keep_file,
            allow_empty,
            dry_run,
        } => {
            let path = cli.path.ok_or("Replica path required for sweep")?;
            let config = commands::adapter_config(&cli.kind, None, None)?;
            let keep = commands::sweep::keep_set(keep, keep_file.as_deref())?;
            if keep.is_empty() && !allow_empty {
                return Err("Refusing to sweep with an empty keep set (pass --allow-empty)".into());
            }
            commands::sweep::run(&path, config, &keep, dry_run).await?;
        }
        Commands::Resolve {
            local,
            remote,
            strategy,
            format,
        } => {
            commands::resolve::run(local.as_deref(), remote.as_deref(), &strategy, &format)?;
        }
        Commands::Version => {
            println!("driftsync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("driftsync Engine v{}", driftsync_engine::VERSION);
        }
    }

    Ok(())
}
