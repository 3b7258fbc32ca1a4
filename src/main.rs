//! partstream -- bulk multi-part object transfer tool.
//!
//! Thin CLI over the transfer engine: one subcommand per operation, all
//! driven to completion before exit.  The runtime is sized from the
//! configuration so part fan-out has threads to land on.

use std::collections::BTreeSet;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use partstream::backend::aws::AwsStore;
use partstream::backend::memory::MemoryStore;
use partstream::backend::store::ObjectStore;
use partstream::config::{load_config, TransferConfig};
use partstream::engine::TransferEngine;

/// Command-line arguments for the partstream tool.
#[derive(Parser, Debug)]
#[command(
    name = "partstream",
    version,
    about = "Concurrent multi-part object transfers"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "partstream.example.yaml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a local file to an object.
    Put {
        bucket: String,
        object: String,
        file: String,
    },
    /// Download an object to a local file.
    Get {
        bucket: String,
        object: String,
        file: String,
    },
    /// Print the size of an object in bytes.
    Stat { bucket: String, object: String },
    /// List object names under a prefix.
    List { bucket: String, prefix: String },
    /// Delete the named files under a directory-style prefix.
    Delete {
        bucket: String,
        dir: String,
        files: Vec<String>,
    },
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing / logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    info!("Loading configuration from {}", cli.config);
    let config = load_config(&cli.config)?;

    partstream::metrics::describe_metrics();

    // Runtime sized from config: every part of a transfer becomes a task.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .enable_all()
        .build()?;
    runtime.block_on(run(cli.command, config))
}

async fn run(command: Command, config: TransferConfig) -> anyhow::Result<()> {
    let store: Arc<dyn ObjectStore> = match config.backend.as_str() {
        "memory" => {
            info!("Memory backend initialized (contents are lost on exit)");
            Arc::new(MemoryStore::new())
        }
        _ => Arc::new(AwsStore::new(&config.aws).await?),
    };
    let engine = TransferEngine::new(store, config);

    match command {
        Command::Put {
            bucket,
            object,
            file,
        } => {
            let data = tokio::fs::read(&file).await?;
            let len = data.len();
            engine.put(&bucket, &object, data.into()).await?;
            info!("Uploaded {len} bytes to [{bucket}] {object}");
        }
        Command::Get {
            bucket,
            object,
            file,
        } => {
            let size = engine.get_size(&bucket, &object).await?;
            let mut buf = vec![0u8; size as usize];
            engine.get_range(&bucket, &object, 0, size, &mut buf).await?;
            tokio::fs::write(&file, &buf).await?;
            info!("Downloaded {size} bytes from [{bucket}] {object}");
        }
        Command::Stat { bucket, object } => {
            let size = engine.get_size(&bucket, &object).await?;
            println!("{size}");
        }
        Command::List { bucket, prefix } => {
            for name in engine.list(&bucket, &prefix).await? {
                println!("{name}");
            }
        }
        Command::Delete { bucket, dir, files } => {
            let count = files.len();
            let files: BTreeSet<String> = files.into_iter().collect();
            engine.delete(&bucket, &dir, &files).await?;
            info!("Deleted {count} objects under [{bucket}] {dir}");
        }
    }
    Ok(())
}
