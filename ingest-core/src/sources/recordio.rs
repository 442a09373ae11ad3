// ingest-core/src/sources/recordio.rs

//! Records stored as frames of a RecordIO container (`.rec` + `.idx`).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::read_text;
use crate::config::ReaderConfig;
use crate::dataset::{RecordPayload, RecordSource};
use crate::error::{IngestError, Result};
use crate::format::recordio::{read_frame, FrameIndex, FrameIndexEntry};
use crate::storage::StorageBackend;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordIoRecord {
    pub entry: FrameIndexEntry,
    pub record_id: u64,
    pub label: f32,
}

/// Serves frame payloads from a single container.
///
/// `path` names either the `.rec` file, whose `.idx` sibling is used, or a
/// directory holding exactly one of each.
pub struct RecordIoSource {
    storage: Arc<dyn StorageBackend>,
    root: PathBuf,
    data_path: Option<PathBuf>,
}

impl RecordIoSource {
    pub fn new(storage: Arc<dyn StorageBackend>, config: &ReaderConfig) -> Self {
        Self {
            storage,
            root: config.path.clone(),
            data_path: None,
        }
    }

    /// Data file resolved by the last `enumerate`.
    pub fn data_path(&self) -> Option<&Path> {
        self.data_path.as_deref()
    }

    fn locate(&self) -> Result<(PathBuf, PathBuf)> {
        let meta = self.storage.metadata(&self.root)?;
        if !meta.is_dir {
            return Ok((self.root.clone(), self.root.with_extension("idx")));
        }

        let entries = self.storage.list(&self.root)?;
        let pick = |ext: &str| -> Result<PathBuf> {
            let matches: Vec<&String> = entries
                .iter()
                .filter(|name| name.rsplit_once('.').is_some_and(|(_, e)| e.eq_ignore_ascii_case(ext)))
                .collect();
            match matches.as_slice() {
                [one] => Ok(self.root.join(one.as_str())),
                [] => Err(IngestError::dataset(
                    self.root.to_string_lossy(),
                    format!("no .{ext} file in directory"),
                )),
                _ => Err(IngestError::dataset(
                    self.root.to_string_lossy(),
                    format!("expected exactly one .{ext} file, found {}", matches.len()),
                )),
            }
        };
        Ok((pick("rec")?, pick("idx")?))
    }
}

impl RecordSource for RecordIoSource {
    type Record = RecordIoRecord;

    fn name(&self) -> &str {
        "recordio"
    }

    fn enumerate(&mut self) -> Result<Vec<RecordIoRecord>> {
        let (data_path, index_path) = self.locate()?;
        let data_len = self.storage.metadata(&data_path)?.size;
        let index_context = index_path.to_string_lossy().into_owned();
        let index = FrameIndex::parse(&read_text(&*self.storage, &index_path)?, data_len, &index_context)?;
        debug!(index = %index_context, frames = index.len(), data_len, "built frame index");

        let context = data_path.to_string_lossy().into_owned();
        let mut reader = self.storage.open_read(&data_path)?;
        let mut records = Vec::with_capacity(index.len());
        for entry in index.entries() {
            match read_frame(&mut *reader, entry, &context) {
                Ok(frame) => records.push(RecordIoRecord {
                    entry: *entry,
                    record_id: frame.header.record_id,
                    label: frame.label,
                }),
                Err(e) => warn!(
                    offset = entry.seek_offset,
                    error = %e,
                    "dropping frame that does not decode"
                ),
            }
        }

        if records.len() < index.len() {
            info!(
                container = %context,
                kept = records.len(),
                dropped = index.len() - records.len(),
                "frame index contains undecodable frames"
            );
        }
        self.data_path = Some(data_path);
        Ok(records)
    }

    fn open(&self, record: &RecordIoRecord) -> Result<RecordPayload> {
        let data_path = self
            .data_path
            .as_deref()
            .ok_or_else(|| IngestError::dataset("recordio", "container opened before enumeration"))?;
        let context = data_path.to_string_lossy().into_owned();

        let mut reader = self.storage.open_read(data_path)?;
        let frame = read_frame(&mut *reader, &record.entry, &context)?;
        Ok(RecordPayload::new(reader, context, frame.payload_offset, frame.payload_length).with_label(frame.label))
    }

    fn record_id(&self, record: &RecordIoRecord) -> String {
        record.record_id.to_string()
    }
}
