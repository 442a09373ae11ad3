// ingest-core/src/sources/mod.rs

//! Record sources for each supported container layout.
//!
//! Every source implements [`RecordSource`](crate::dataset::RecordSource)
//! and is handed to a [`Reader`](crate::dataset::Reader), which does the
//! sharding and iteration. Sources read through a shared
//! [`StorageBackend`] so the same code serves local files and test doubles.

mod archive;
mod files;
mod fixed;
mod numpy;
mod provider;
mod recordio;

pub use archive::{ArchiveRecord, ArchiveSource};
pub use files::{FileRecord, FileSource};
pub use fixed::{FixedRecord, FixedRecordSource};
pub use numpy::{NumpyRecord, NumpySource};
pub use provider::{ProviderRecord, ProviderSource};
pub use recordio::{RecordIoRecord, RecordIoSource};

use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::{IngestError, Result};
use crate::storage::StorageBackend;

/// Final component of `path` as a string.
pub(crate) fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Lists the files below `root` whose name passes `keep`, sorted.
///
/// When `root` is itself a file it is the only candidate. Returned paths
/// are `root` joined with the relative path.
pub(crate) fn discover<F>(storage: &dyn StorageBackend, root: &Path, keep: F) -> Result<Vec<PathBuf>>
where
    F: Fn(&str) -> bool,
{
    let meta = storage.metadata(root)?;
    if !meta.is_dir {
        return Ok(if keep(&file_name_of(root)) {
            vec![root.to_path_buf()]
        } else {
            Vec::new()
        });
    }

    Ok(storage
        .walk(root)?
        .into_iter()
        .filter(|rel| keep(&file_name_of(rel)))
        .map(|rel| root.join(rel))
        .collect())
}

/// Reads a whole text object, such as a file list or an index.
pub(crate) fn read_text(storage: &dyn StorageBackend, path: &Path) -> Result<String> {
    let mut reader = storage.open_read(path)?;
    let mut text = String::new();
    reader
        .read_to_string(&mut text)
        .map_err(|e| IngestError::storage_with_source(path, "failed to read text file", e))?;
    Ok(text)
}
