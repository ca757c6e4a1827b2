//! imgdedup - ingest image folders into a deduplicated asset store

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use imgdedup::config::{parse_delay_list, Config, ConfigOptions};
use imgdedup::dedup::DeduplicationService;
use imgdedup::ingest::{discover_images, Ingestor};
use imgdedup::store::SqliteAssetStore;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "imgdedup")]
#[command(about = "Content-addressed image ingest with per-owner deduplication")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest every image under a directory
    Ingest {
        /// SQLite database file
        #[arg(long)]
        db: PathBuf,

        /// Owner the assets belong to
        #[arg(long)]
        owner: String,

        /// Parallel uploads
        #[arg(long)]
        concurrency: Option<usize>,

        /// Retries after the first failed attempt
        #[arg(long)]
        max_retries: Option<u32>,

        /// Explicit retry delays in milliseconds, e.g. 100,500,2000
        #[arg(long)]
        retry_delays_ms: Option<String>,

        /// Keep concurrency fixed instead of tuning it from outcomes
        #[arg(long)]
        no_adaptive: bool,

        /// Directory to scan
        dir: PathBuf,
    },

    /// Print or verify the SHA-256 checksum of a file
    Checksum {
        file: PathBuf,

        /// Expected checksum; exits non-zero on mismatch
        #[arg(long)]
        expect: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the JSON result
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    match args.command {
        Command::Ingest {
            db,
            owner,
            concurrency,
            max_retries,
            retry_delays_ms,
            no_adaptive,
            dir,
        } => {
            let retry_delays_ms = retry_delays_ms
                .as_deref()
                .map(parse_delay_list)
                .transpose()?;
            let config = Config::new(
                owner,
                db,
                ConfigOptions {
                    concurrency,
                    max_retries,
                    retry_delays_ms,
                    no_adaptive,
                    ..Default::default()
                },
            )?;
            run_ingest(config, dir).await
        }
        Command::Checksum { file, expect } => run_checksum(file, expect).await,
    }
}

async fn run_ingest(config: Arc<Config>, dir: PathBuf) -> Result<()> {
    if !dir.is_dir() {
        return Err(anyhow!("{} is not a directory", dir.display()));
    }

    let store = SqliteAssetStore::open(&config.database_path).await?;
    info!("Opened asset store at {}", store.path().display());

    let images = discover_images(&dir);
    info!("Found {} images under {}", images.len(), dir.display());

    let ingestor = Ingestor::from_config(&config, Arc::new(store));
    let summary = ingestor.ingest_paths(images).await;

    println!("{}", serde_json::to_string_pretty(&summary)?);

    if !summary.failures.is_empty() {
        error!("{} files failed to ingest", summary.failures.len());
        std::process::exit(1);
    }
    Ok(())
}

async fn run_checksum(file: PathBuf, expect: Option<String>) -> Result<()> {
    let content = tokio::fs::read(&file)
        .await
        .map_err(|e| anyhow!("Failed to read {}: {}", file.display(), e))?;
    let checksum = DeduplicationService::compute_checksum_only(&content);

    let Some(expected) = expect else {
        println!("{}", checksum);
        return Ok(());
    };

    if DeduplicationService::verify_checksum(&content, &expected) {
        println!("OK {}", checksum);
        Ok(())
    } else {
        error!(
            "Checksum mismatch for {}: expected {}, got {}",
            file.display(),
            expected,
            checksum
        );
        std::process::exit(1);
    }
}
