// ingest-core/src/storage/memory.rs

//! In-memory reader for bytes that never touch the filesystem.

use std::io::{Cursor, Read, Seek, SeekFrom};

use super::traits::StorageReader;
use crate::error::{IngestError, Result};

/// A [`StorageReader`] over an owned byte buffer.
pub struct MemoryReader {
    cursor: Cursor<Vec<u8>>,
    label: String,
}

impl MemoryReader {
    /// Wraps `data`; `label` names the buffer in error messages.
    pub fn new(data: Vec<u8>, label: impl Into<String>) -> Self {
        Self {
            cursor: Cursor::new(data),
            label: label.into(),
        }
    }
}

impl Read for MemoryReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl Seek for MemoryReader {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.cursor.seek(pos)
    }
}

impl StorageReader for MemoryReader {
    fn size(&self) -> u64 {
        self.cursor.get_ref().len() as u64
    }

    fn read_range(&mut self, start: u64, length: usize) -> Result<Vec<u8>> {
        let data = self.cursor.get_ref();
        let end = start.saturating_add(length as u64);
        if end > data.len() as u64 {
            return Err(IngestError::storage(
                &self.label,
                format!(
                    "read range {}..{} exceeds buffer size {}",
                    start,
                    end,
                    data.len()
                ),
            ));
        }
        Ok(data[start as usize..end as usize].to_vec())
    }
}
