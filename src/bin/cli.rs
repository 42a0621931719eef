//! segkv CLI
//!
//! Opens a data directory, runs one operation against it, and closes it.

use clap::{Parser, Subcommand};
use segkv::{Config, Database, SyncStrategy};
use tracing_subscriber::{fmt, EnvFilter};

/// segkv CLI
#[derive(Parser, Debug)]
#[command(name = "segkv-cli")]
#[command(about = "Inspect and modify a segkv data directory")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./segkv_data")]
    dir: String,

    /// Segment size bound in bytes
    #[arg(short, long, default_value = "10485760")]
    segment_size: u64,

    /// fsync every write before it is acknowledged
    #[arg(long)]
    sync: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Put {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete a key
    Delete {
        /// The key to delete
        key: String,
    },

    /// Merge the oldest segments now
    Compact,

    /// Print segment statistics
    Stats,
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();

    let sync_strategy = if args.sync {
        SyncStrategy::EveryWrite
    } else {
        SyncStrategy::None
    };
    let config = Config::builder()
        .data_dir(&args.dir)
        .segment_size_bound(args.segment_size)
        .sync_strategy(sync_strategy)
        .build();

    let db = match Database::open_with_config(config) {
        Ok(db) => db,
        Err(e) => {
            tracing::error!("Failed to open database: {}", e);
            std::process::exit(1);
        }
    };

    let outcome = run(&db, args.command);
    let closed = db.close();

    if let Err(e) = outcome.and(closed) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(db: &Database, command: Commands) -> segkv::Result<()> {
    match command {
        Commands::Get { key } => match db.get(key.as_bytes())? {
            Some(value) => println!("{}", String::from_utf8_lossy(&value)),
            None => eprintln!("(not found)"),
        },
        Commands::Put { key, value } => {
            db.put(key.as_bytes(), value.as_bytes())?;
            println!("OK");
        }
        Commands::Delete { key } => {
            db.delete(key.as_bytes())?;
            println!("OK");
        }
        Commands::Compact => {
            if db.compact()? {
                println!("Merged; {} segments remain", db.segment_count());
            } else {
                println!("Nothing to merge");
            }
        }
        Commands::Stats => {
            let stats = db.stats();
            println!("segments:        {}", stats.segment_count);
            println!("indexed keys:    {}", stats.indexed_keys);
            println!("total bytes:     {}", stats.total_bytes);
            println!("segment ids:     {:?}", db.segment_ids());
        }
    }
    Ok(())
}
