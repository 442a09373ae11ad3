// ingest-core/src/lib.rs

//! Dataset Ingestion - Core Library
//!
//! This crate enumerates records stored as plain files, array files, framed
//! record containers or tar archives, partitions them across distributed
//! workers, and serves each worker's shard record by record.

pub mod config;
pub mod error;
pub mod storage;

// Re-export commonly used types for convenience
pub use config::{IngestConfig, LastBatchPolicy, ReaderConfig, SourceKind};
pub use error::{IngestError, Result};
pub use storage::{LocalStorage, ObjectMeta, StorageBackend, StorageReader};

pub mod format;
pub mod header_cache;
pub use header_cache::HeaderCache;

pub mod dataset;
pub use dataset::{
    BatchPolicy, MetadataLookup, OpaqueByteProvider, PrefetchingReader, ProviderKey, Reader,
    RecordPayload, RecordSource, Sample, ShardPlan, ShardSize,
};

pub mod sources;
