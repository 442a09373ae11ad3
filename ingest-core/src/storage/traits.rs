// ingest-core/src/storage/traits.rs

//! Storage abstraction traits for record ingestion.
//!
//! Readers never write: every backend here is a read-only view of a dataset
//! root, whether it lives on a local filesystem or behind a byte provider.

use std::io::{Read, Seek};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Metadata about a stored object.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    /// Size of the object in bytes.
    pub size: u64,
    /// Last modification time, if available.
    pub modified: Option<std::time::SystemTime>,
    /// Whether this object is a directory.
    pub is_dir: bool,
}

/// A handle for reading from storage.
///
/// This trait extends `Read` and `Seek` with additional methods for
/// efficient random access.
pub trait StorageReader: Read + Seek + Send {
    /// Returns the total size of the object in bytes.
    fn size(&self) -> u64;

    /// Reads a range of bytes from the object.
    ///
    /// # Arguments
    ///
    /// * `start` - The byte offset to start reading from.
    /// * `length` - The number of bytes to read.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the read fails or the range extends past
    /// the end of the object.
    fn read_range(&mut self, start: u64, length: usize) -> Result<Vec<u8>>;
}

/// The core storage backend trait.
///
/// # Object Safety
///
/// This trait is object-safe and can be used with `Arc<dyn StorageBackend>`,
/// which is how sources share one backend.
pub trait StorageBackend: Send + Sync {
    /// Checks if an object exists at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the existence check fails (e.g., permission denied).
    fn exists(&self, path: &Path) -> Result<bool>;

    /// Retrieves metadata for an object.
    ///
    /// # Errors
    ///
    /// Returns an error if the object doesn't exist or metadata cannot be read.
    fn metadata(&self, path: &Path) -> Result<ObjectMeta>;

    /// Opens an object for reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the object doesn't exist or cannot be opened.
    fn open_read(&self, path: &Path) -> Result<Box<dyn StorageReader>>;

    /// Lists the entries directly below a directory, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not a directory or cannot be read.
    fn list(&self, prefix: &Path) -> Result<Vec<String>>;

    /// Lists every regular file below a directory, recursively.
    ///
    /// Paths are relative to `root` and sorted, so the result is a stable
    /// record order.
    ///
    /// # Errors
    ///
    /// Returns an error if the root does not exist or cannot be traversed.
    fn walk(&self, root: &Path) -> Result<Vec<PathBuf>>;
}
