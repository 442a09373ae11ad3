// ingest-inspect/src/main.rs

//! Dataset Ingestion Inspector
//!
//! This binary builds a reader from an ingestion config, prints how the
//! dataset is split across shards, and reads a few records from the selected
//! shard.
//!
//! # Usage
//!
//! ```bash
//! # Inspect a directory of images with defaults
//! ingest-inspect --path /data/train
//!
//! # Inspect shard 2 of 8 of a RecordIO container
//! ingest-inspect --path /data/train.rec --source recordio --shard-id 2 --shard-count 8
//!
//! # Start from a configuration file
//! ingest-inspect --config ingest.toml --samples 20
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ingest_core::dataset::{PrefetchingReader, Reader, RecordSource};
use ingest_core::sources::{ArchiveSource, FileSource, FixedRecordSource, NumpySource, RecordIoSource};
use ingest_core::{IngestConfig, LocalStorage, SourceKind, StorageBackend};

/// Dataset ingestion inspector
#[derive(Parser, Debug)]
#[command(name = "ingest-inspect")]
#[command(about = "Print the shard plan of a dataset and sample its records")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Dataset root (overrides the config)
    #[arg(short, long)]
    path: Option<PathBuf>,

    /// Source kind: files, numpy, recordio, fixed, archive
    #[arg(short, long)]
    source: Option<SourceKind>,

    /// Shard to read
    #[arg(long)]
    shard_id: Option<u32>,

    /// Total number of shards
    #[arg(long)]
    shard_count: Option<u32>,

    /// Batch size used for padding
    #[arg(long)]
    batch_size: Option<usize>,

    /// Number of records to read from the shard
    #[arg(short = 'n', long, default_value = "10")]
    samples: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let filter = tracing_subscriber::filter::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::filter::EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = match &args.config {
        Some(path) => IngestConfig::from_file(path)?,
        None => IngestConfig::default(),
    }
    .with_env_overrides();

    if let Some(path) = args.path {
        config.reader.path = path;
    }
    if let Some(source) = args.source {
        config.reader.source = source;
    }
    if let Some(shard_id) = args.shard_id {
        config.reader.shard_id = shard_id;
    }
    if let Some(shard_count) = args.shard_count {
        config.reader.shard_count = shard_count;
    }
    if let Some(batch_size) = args.batch_size {
        config.reader.batch_size = batch_size;
    }
    config.validate()?;

    tracing::info!("Inspecting {}", config.reader.path.display());
    tracing::info!("  Source: {:?}", config.reader.source);
    tracing::info!(
        "  Shard: {} of {}",
        config.reader.shard_id,
        config.reader.shard_count
    );
    tracing::info!("  Batch size: {}", config.reader.batch_size);

    let storage: Arc<dyn StorageBackend> = Arc::new(LocalStorage::new(&config.storage)?);

    match config.reader.source {
        SourceKind::Files => inspect(&config, FileSource::new(storage, &config.reader), args.samples)?,
        SourceKind::Numpy => inspect(&config, NumpySource::new(storage, &config.reader), args.samples)?,
        SourceKind::RecordIo => inspect(&config, RecordIoSource::new(storage, &config.reader), args.samples)?,
        SourceKind::Fixed => inspect(&config, FixedRecordSource::new(storage, &config.reader), args.samples)?,
        SourceKind::Archive => inspect(&config, ArchiveSource::new(storage, &config.reader), args.samples)?,
    }

    Ok(())
}

fn inspect<S>(config: &IngestConfig, source: S, samples: usize) -> ingest_core::Result<()>
where
    S: RecordSource + 'static,
{
    let reader = Reader::new(&config.reader, source)?;
    let plan = reader.plan();
    let policy = reader.policy();

    println!(
        "{} records, {} shards, batch size {}, largest shard {}",
        plan.dataset_size(),
        plan.shard_count(),
        plan.batch_size(),
        plan.largest_size()
    );
    for shard in 0..plan.shard_count() {
        let bounds = plan.bounds(shard);
        let padding = if policy.pad_last_batch_repeated {
            plan.padded_count(shard)
        } else {
            0
        };
        println!(
            "  shard {:>4}: [{}, {})  {} records  +{} padding",
            shard,
            bounds.start,
            bounds.end,
            bounds.len(),
            padding
        );
    }
    if reader.is_looping() {
        println!(
            "shard {} loops over {} records per pass",
            reader.shard_id(),
            reader.remaining_count()
        );
    } else {
        println!(
            "shard {} reports {} records this epoch ({} padded in the last batch)",
            reader.shard_id(),
            reader.remaining_count(),
            reader.last_batch_padded_size()
        );
    }

    let mut prefetcher = PrefetchingReader::new(reader, &config.prefetch);
    for sample in prefetcher.by_ref().take(samples) {
        let sample = sample?;
        match sample.label {
            Some(label) => println!("  {}  {} bytes  label {}", sample.id, sample.data.len(), label),
            None => println!("  {}  {} bytes", sample.id, sample.data.len()),
        }
    }
    prefetcher.stop();

    Ok(())
}
