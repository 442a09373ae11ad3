// ingest-core/src/sources/fixed.rs

//! Fixed-size records packed back to back (CIFAR-10 style binaries).
//!
//! Each record is `label_bytes` of label followed by the payload. Files are
//! selected by name prefix so a split (`data_batch_*` vs `test_batch`) is
//! chosen by configuration.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::warn;

use super::{discover, file_name_of};
use crate::config::ReaderConfig;
use crate::dataset::{RecordPayload, RecordSource};
use crate::error::{IngestError, Result};
use crate::storage::StorageBackend;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedRecord {
    pub path: Arc<PathBuf>,
    pub index: u64,
}

pub struct FixedRecordSource {
    storage: Arc<dyn StorageBackend>,
    root: PathBuf,
    file_prefix: String,
    record_size: u64,
    label_bytes: u64,
}

impl FixedRecordSource {
    pub fn new(storage: Arc<dyn StorageBackend>, config: &ReaderConfig) -> Self {
        Self {
            storage,
            root: config.path.clone(),
            file_prefix: config.fixed.file_prefix.clone(),
            record_size: config.fixed.record_size as u64,
            label_bytes: config.fixed.label_bytes as u64,
        }
    }
}

impl RecordSource for FixedRecordSource {
    type Record = FixedRecord;

    fn name(&self) -> &str {
        "fixed"
    }

    fn enumerate(&mut self) -> Result<Vec<FixedRecord>> {
        if self.record_size <= self.label_bytes {
            return Err(IngestError::config(
                "reader.fixed.record_size must be greater than reader.fixed.label_bytes",
            ));
        }
        let files = discover(&*self.storage, &self.root, |name| name.starts_with(&self.file_prefix))?;
        let mut records = Vec::new();

        for file in files {
            let size = self.storage.metadata(&file)?.size;
            let count = size / self.record_size;
            let tail = size % self.record_size;
            if tail != 0 {
                warn!(
                    file = %file.display(),
                    trailing_bytes = tail,
                    "ignoring partial record at end of file"
                );
            }

            let path = Arc::new(file);
            records.extend((0..count).map(|index| FixedRecord {
                path: Arc::clone(&path),
                index,
            }));
        }
        Ok(records)
    }

    fn open(&self, record: &FixedRecord) -> Result<RecordPayload> {
        let context = record.path.to_string_lossy().into_owned();
        let mut reader = self.storage.open_read(&record.path)?;

        let offset = record.index * self.record_size;
        let label = reader.read_range(offset, self.label_bytes as usize)?;
        let payload = RecordPayload::new(
            reader,
            context,
            offset + self.label_bytes,
            self.record_size - self.label_bytes,
        );
        Ok(match label.first() {
            Some(&byte) => payload.with_label(f32::from(byte)),
            None => payload,
        })
    }

    fn record_id(&self, record: &FixedRecord) -> String {
        format!("{}_{}", file_name_of(&record.path), record.index)
    }
}
