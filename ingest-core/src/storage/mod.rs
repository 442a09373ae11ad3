// ingest-core/src/storage/mod.rs

//! Storage abstraction for record ingestion.
//!
//! Sources read through a shared [`StorageBackend`] so that record bytes can
//! come from buffered file reads, memory maps or an in-memory buffer handed
//! over by a byte provider, all behind the same [`StorageReader`] handle.
//!
//! # Example
//!
//! ```no_run
//! use ingest_core::config::StorageConfig;
//! use ingest_core::storage::{LocalStorage, StorageBackend};
//! use std::path::Path;
//!
//! let storage = LocalStorage::new(&StorageConfig::default()).unwrap();
//! let mut reader = storage.open_read(Path::new("train/cat.jpg")).unwrap();
//! let head = reader.read_range(0, 4).unwrap();
//! ```

mod local;
mod memory;
mod traits;

pub use local::LocalStorage;
pub use memory::MemoryReader;
pub use traits::{ObjectMeta, StorageBackend, StorageReader};
