// ingest-core/src/sources/archive.rs

//! Members of uncompressed tar archives.
//!
//! Each archive is scanned once to index its members; records are then read
//! straight from the recorded byte ranges.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use super::discover;
use crate::config::ReaderConfig;
use crate::dataset::{RecordPayload, RecordSource};
use crate::error::Result;
use crate::format::tar::scan_archive;
use crate::storage::StorageBackend;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveRecord {
    pub archive: Arc<PathBuf>,
    pub member: String,
    pub data_offset: u64,
    pub size: u64,
}

pub struct ArchiveSource {
    storage: Arc<dyn StorageBackend>,
    config: ReaderConfig,
}

impl ArchiveSource {
    pub fn new(storage: Arc<dyn StorageBackend>, config: &ReaderConfig) -> Self {
        Self {
            storage,
            config: config.clone(),
        }
    }
}

impl RecordSource for ArchiveSource {
    type Record = ArchiveRecord;

    fn name(&self) -> &str {
        "archive"
    }

    fn enumerate(&mut self) -> Result<Vec<ArchiveRecord>> {
        let archives = discover(&*self.storage, &self.config.path, |name| {
            name.rsplit_once('.')
                .is_some_and(|(_, ext)| ext.eq_ignore_ascii_case("tar"))
        })?;

        let mut records = Vec::new();
        for path in archives {
            let context = path.to_string_lossy().into_owned();
            let mut reader = self.storage.open_read(&path)?;
            let members = scan_archive(&mut *reader, &context)?;
            debug!(archive = %context, members = members.len(), "indexed archive");

            let archive = Arc::new(path);
            let wanted = members.into_iter().filter(|m| {
                let name = m.path.rsplit('/').next().unwrap_or(m.path.as_str());
                self.config.accepts_extension(name)
            });
            records.extend(wanted.map(|m| ArchiveRecord {
                archive: Arc::clone(&archive),
                member: m.path,
                data_offset: m.data_offset,
                size: m.size,
            }));
        }
        Ok(records)
    }

    fn open(&self, record: &ArchiveRecord) -> Result<RecordPayload> {
        let reader = self.storage.open_read(&record.archive)?;
        let context = format!("{}:{}", record.archive.display(), record.member);
        Ok(RecordPayload::new(reader, context, record.data_offset, record.size))
    }

    fn record_id(&self, record: &ArchiveRecord) -> String {
        record.member.clone()
    }
}
