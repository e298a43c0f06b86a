use std::path::PathBuf;

use clap::{Parser, Subcommand};
use warpgrid_kvstate::StateStore;

mod commands;

#[derive(Parser)]
#[command(
    name = "warpkv",
    about = "WarpGrid key/value state store client",
    version,
    propagate_version = true,
)]
struct Cli {
    /// TOML file with store properties (connectionString, tableName, ...)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Connection string, e.g. postgres://user@host/db or sqlite:state.db
    #[arg(long, global = true)]
    connection_string: Option<String>,
    /// Override the table name
    #[arg(long, global = true)]
    table: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a record as JSON (null if absent or expired)
    Get {
        key: String,
    },
    /// Write a record
    Set {
        key: String,
        value: String,
        /// Only write if the stored etag still matches
        #[arg(long)]
        etag: Option<String>,
        /// Expire the record after this many seconds
        #[arg(long)]
        ttl: Option<u64>,
        /// Fail if a live record already exists
        #[arg(long)]
        first_write: bool,
    },
    /// Delete a record
    Delete {
        key: String,
        /// Only delete if the stored etag still matches
        #[arg(long)]
        etag: Option<String>,
    },
    /// Apply a JSON array of operations in one transaction
    Multi {
        file: PathBuf,
    },
    /// Remove expired records now
    Sweep,
    /// Check database connectivity
    Ping,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("warpkv=info".parse()?)
                .add_directive("warpgrid_kvstate=warn".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let metadata = commands::state::load_metadata(
        cli.config.as_deref(),
        cli.connection_string.as_deref(),
        cli.table.as_deref(),
    )?;
    let store = StateStore::init(metadata).await?;

    let output = match cli.command {
        Commands::Get { key } => commands::state::get(&store, &key).await,
        Commands::Set {
            key,
            value,
            etag,
            ttl,
            first_write,
        } => commands::state::set(&store, &key, &value, etag, ttl, first_write).await,
        Commands::Delete { key, etag } => commands::state::delete(&store, &key, etag).await,
        Commands::Multi { file } => commands::state::multi(&store, &file).await,
        Commands::Sweep => commands::state::sweep(&store).await,
        Commands::Ping => commands::state::ping(&store).await,
    };

    store.close().await?;
    println!("{}", output?);
    Ok(())
}
