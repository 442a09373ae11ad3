// ingest-core/src/dataset/source.rs

//! The capability set a container format provides to the sharded reader.
//!
//! A source only knows how to list its records in a stable order and how to
//! resolve one record to a byte range. Sharding, padding, shuffling and
//! epoch bookkeeping live in [`super::Reader`] and are shared by every
//! format.

use std::fmt;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use crate::error::{IngestError, Result};
use crate::format::ArrayHeader;
use crate::storage::StorageReader;

/// A container format adapter.
pub trait RecordSource: Send {
    /// Handle for one record, cheap to clone (padding duplicates it).
    type Record: Clone + Send;

    /// Short name used in logs and error messages.
    fn name(&self) -> &str;

    /// Lists every record in a stable order.
    ///
    /// Called once while the reader is constructed. An error here aborts
    /// construction.
    fn enumerate(&mut self) -> Result<Vec<Self::Record>>;

    /// Resolves `record` to its payload.
    ///
    /// Errors are per record; the reader reports them as a zero-size open
    /// and keeps going.
    fn open(&self, record: &Self::Record) -> Result<RecordPayload>;

    /// Identifier reported for `record` (file name, member path, frame id).
    fn record_id(&self, record: &Self::Record) -> String;

    /// Scalar used by aspect-ratio grouping, if the source can provide one.
    fn grouping_key(&self, _record: &Self::Record) -> Option<f32> {
        None
    }
}

/// An opened record: a byte window over a storage reader.
pub struct RecordPayload {
    reader: Box<dyn StorageReader>,
    context: String,
    offset: u64,
    len: u64,
    pos: u64,
    label: Option<f32>,
    header: Option<Arc<ArrayHeader>>,
}

impl RecordPayload {
    /// Window of `len` bytes starting at `offset` in `reader`.
    ///
    /// `context` names the backing object in error messages.
    pub fn new(reader: Box<dyn StorageReader>, context: impl Into<String>, offset: u64, len: u64) -> Self {
        Self {
            reader,
            context: context.into(),
            offset,
            len,
            pos: 0,
            label: None,
            header: None,
        }
    }

    /// Window covering the whole of `reader`.
    pub fn whole(reader: Box<dyn StorageReader>, context: impl Into<String>) -> Self {
        let len = reader.size();
        Self::new(reader, context, 0, len)
    }

    pub fn with_label(mut self, label: f32) -> Self {
        self.label = Some(label);
        self
    }

    pub fn with_header(mut self, header: Arc<ArrayHeader>) -> Self {
        self.header = Some(header);
        self
    }

    /// Declared payload size in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes not yet delivered by [`Self::read`].
    pub fn remaining(&self) -> u64 {
        self.len - self.pos
    }

    pub fn label(&self) -> Option<f32> {
        self.label
    }

    pub fn header(&self) -> Option<&Arc<ArrayHeader>> {
        self.header.as_ref()
    }

    /// Copies the next `min(buf.len(), remaining)` bytes into `buf`.
    ///
    /// A short destination is not an error; the rest stays readable.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = (buf.len() as u64).min(self.remaining()) as usize;
        if n == 0 {
            return Ok(0);
        }

        self.reader
            .seek(SeekFrom::Start(self.offset + self.pos))
            .and_then(|_| self.reader.read_exact(&mut buf[..n]))
            .map_err(|e| IngestError::storage_with_source(&self.context, "failed to read record payload", e))?;

        self.pos += n as u64;
        Ok(n)
    }

    /// Reads the remaining payload into a new buffer.
    pub fn read_to_vec(&mut self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.remaining() as usize];
        let n = self.read(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }
}

impl fmt::Debug for RecordPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordPayload")
            .field("context", &self.context)
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("pos", &self.pos)
            .field("label", &self.label)
            .finish()
    }
}

/// Annotation metadata consulted while enumerating files.
///
/// Names are paths relative to the dataset root, as returned by
/// [`Self::relative_paths`].
pub trait MetadataLookup: Send + Sync {
    /// Whether the annotations know about `name`.
    fn exists(&self, name: &str) -> bool;

    /// Every annotated record, in dataset order.
    fn relative_paths(&self) -> Vec<String>;

    /// `(height, width)` of `name`, when known.
    fn size_of(&self, name: &str) -> Option<(u32, u32)>;
}

/// Key a byte provider understands.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProviderKey {
    Name(String),
    Offset(u64),
}

impl fmt::Display for ProviderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKey::Name(name) => f.write_str(name),
            ProviderKey::Offset(offset) => write!(f, "@{offset}"),
        }
    }
}

/// Extraction backend that returns the raw bytes of one entry.
pub trait OpaqueByteProvider: Send + Sync {
    /// Fetches the entry at `key`. With `length` set, at most that many
    /// bytes are returned.
    fn fetch(&self, key: &ProviderKey, length: Option<u64>) -> Result<Vec<u8>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryReader;

    fn payload(data: &[u8], offset: u64, len: u64) -> RecordPayload {
        RecordPayload::new(Box::new(MemoryReader::new(data.to_vec(), "mem")), "mem", offset, len)
    }

    #[test]
    fn test_read_window() {
        let mut p = payload(b"headerPAYLOADtrailer", 6, 7);
        assert_eq!(p.len(), 7);

        let mut buf = [0u8; 32];
        assert_eq!(p.read(&mut buf).unwrap(), 7);
        assert_eq!(&buf[..7], b"PAYLOAD");
        assert_eq!(p.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_short_buffer_reads_in_pieces() {
        let mut p = payload(b"0123456789", 2, 6);
        let mut buf = [0u8; 4];

        assert_eq!(p.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"2345");
        assert_eq!(p.remaining(), 2);
        assert_eq!(p.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"67");
    }

    #[test]
    fn test_whole_and_label() {
        let p = RecordPayload::whole(Box::new(MemoryReader::new(b"abc".to_vec(), "m")), "m").with_label(3.0);
        assert_eq!(p.len(), 3);
        assert_eq!(p.label(), Some(3.0));
        assert!(p.header().is_none());
    }

    #[test]
    fn test_window_past_end_is_storage_error() {
        let mut p = payload(b"abc", 1, 10);
        let mut buf = [0u8; 10];
        assert!(matches!(p.read(&mut buf), Err(IngestError::Storage { .. })));
    }

    #[test]
    fn test_read_to_vec() {
        let mut p = payload(b"xxdatayy", 2, 4);
        assert_eq!(p.read_to_vec().unwrap(), b"data");
    }

    #[test]
    fn test_provider_key_display() {
        assert_eq!(ProviderKey::Name("a/b.jpg".into()).to_string(), "a/b.jpg");
        assert_eq!(ProviderKey::Offset(512).to_string(), "@512");
    }
}
