// ingest-core/src/dataset/mod.rs

//! Sharded iteration over a record source.
//!
//! This module divides an enumerated record list into contiguous shards,
//! pads shard tails to a batch multiple, and walks one shard per reader
//! with optional shuffling and aspect-ratio grouping. Container formats
//! plug in through [`RecordSource`].
//!
//! # Example
//!
//! ```ignore
//! use ingest_core::dataset::{PrefetchingReader, Reader};
//! use ingest_core::sources::FileSource;
//! use std::sync::Arc;
//!
//! let config = IngestConfig::from_file("ingest.toml")?.with_env_overrides();
//! let storage = Arc::new(LocalStorage::new(&config.storage)?);
//! let source = FileSource::new(storage, &config.reader);
//! let reader = Reader::new(&config.reader, source)?;
//!
//! for sample in PrefetchingReader::new(reader, &config.prefetch) {
//!     let sample = sample?;
//!     // Hand sample.data to the decoder
//! }
//! ```

mod bucket;
mod cursor;
mod plan;
mod prefetch;
mod reader;
mod source;

pub use bucket::BucketedShuffle;
pub use cursor::RecordCursor;
pub use plan::{compute_bounds, BatchPolicy, PaddedDataset, ShardBounds, ShardPlan, ShardSize};
pub use prefetch::{PrefetchingReader, Sample};
pub use reader::Reader;
pub use source::{MetadataLookup, OpaqueByteProvider, ProviderKey, RecordPayload, RecordSource};
