// ingest-core/src/header_cache.rs

//! Process-wide cache of parsed array headers.
//!
//! Several readers over the same dataset (one per shard) resolve the same
//! headers; the cache lets each file be parsed once. Parsing happens outside
//! the lock, so a slow file never blocks lookups of other files. When two
//! callers race on the same path, the first insert wins and both receive
//! the same `Arc`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::format::ArrayHeader;

#[derive(Debug, Default)]
pub struct HeaderCache {
    entries: Mutex<HashMap<PathBuf, Arc<ArrayHeader>>>,
}

impl HeaderCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Option<Arc<ArrayHeader>> {
        self.entries.lock().get(path).cloned()
    }

    /// Returns the cached header for `path`, running `parse` on a miss.
    ///
    /// A failed parse is not cached; the next call retries.
    pub fn get_or_parse<F>(&self, path: &Path, parse: F) -> Result<Arc<ArrayHeader>>
    where
        F: FnOnce() -> Result<ArrayHeader>,
    {
        if let Some(header) = self.get(path) {
            return Ok(header);
        }

        let parsed = Arc::new(parse()?);
        let mut entries = self.entries.lock();
        Ok(entries.entry(path.to_path_buf()).or_insert(parsed).clone())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
