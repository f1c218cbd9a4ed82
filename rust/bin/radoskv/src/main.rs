//! `radoskv`: command-line access to a pool-backed datastore.
//!
//! Usage:
//!   radoskv -c <cluster.toml> -p <pool> <command>
//!
//! Set `RUST_LOG=radoskv=debug` to see backend activity.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use radoskv::PoolDatastore;
use tracing::debug;

/// Key-value access to one pool of an object cluster.
#[derive(Parser, Debug)]
#[command(name = "radoskv", about = "Pool-backed key-value store client")]
struct Cli {
    /// Path to the cluster config file.
    #[arg(short = 'c', long = "config", required = true)]
    config: PathBuf,

    /// Pool to operate on.
    #[arg(short = 'p', long = "pool", default_value = "data")]
    pool: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Store a value.
    Put {
        key: String,
        /// Value as a literal string.
        #[arg(required_unless_present = "file", conflicts_with = "file")]
        value: Option<String>,
        /// Read the value from a file.
        #[arg(short = 'f', long = "file")]
        file: Option<PathBuf>,
    },

    /// Print a value to stdout as raw bytes.
    Get { key: String },

    /// Delete a key.
    Rm { key: String },

    /// Exit with status 0 if the key exists, 1 otherwise.
    Has { key: String },

    /// Print the size of a value in bytes.
    Size { key: String },

    /// List keys under a prefix.
    Ls {
        /// Plain string prefix (default: everything).
        #[arg(default_value = "")]
        prefix: String,
        /// Skip fetching values; print sizes instead.
        #[arg(long)]
        keys_only: bool,
        /// Skip this many entries.
        #[arg(long, default_value_t = 0)]
        offset: usize,
        /// Return at most this many entries (0 = no limit).
        #[arg(long, default_value_t = 0)]
        limit: usize,
        /// Sort by key.
        #[arg(long)]
        sorted: bool,
        /// Sort by value, then key.
        #[arg(long, conflicts_with = "keys_only")]
        by_value: bool,
        /// Reverse the sort order.
        #[arg(long)]
        reverse: bool,
        /// Only keys sorting strictly after this one.
        #[arg(long)]
        after: Option<String>,
        /// Only entries whose value equals this string.
        #[arg(long = "value", conflicts_with = "keys_only")]
        value_eq: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    debug!("opening pool {} with {}", cli.pool, cli.config.display());
    let ds = PoolDatastore::open(&cli.config, &cli.pool)
        .map_err(|e| anyhow::anyhow!("failed to open datastore: {}", e))?;

    let result = match cli.command {
        Commands::Put { key, value, file } => {
            let value = match (value, file) {
                (_, Some(path)) => std::fs::read(&path)
                    .map_err(|e| anyhow::anyhow!("cannot read {}: {}", path.display(), e))?,
                (Some(v), None) => v.into_bytes(),
                (None, None) => anyhow::bail!("either a value or --file is required"),
            };
            commands::put(&ds, &key, &value)
        }
        Commands::Get { key } => commands::get(&ds, &key),
        Commands::Rm { key } => commands::rm(&ds, &key),
        Commands::Has { key } => match commands::has(&ds, &key) {
            Ok(false) => {
                ds.close()?;
                std::process::exit(1);
            }
            other => other.map(|_| ()),
        },
        Commands::Size { key } => commands::size(&ds, &key),
        Commands::Ls {
            prefix,
            keys_only,
            offset,
            limit,
            sorted,
            by_value,
            reverse,
            after,
            value_eq,
        } => commands::ls(
            &ds,
            commands::ListArgs {
                prefix,
                keys_only,
                offset,
                limit,
                sorted,
                by_value,
                reverse,
                after,
                value_eq,
            },
        ),
    };

    ds.close()?;
    result
}
