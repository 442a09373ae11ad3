// ingest-core/src/sources/numpy.rs

//! One record per `.npy` array file.

use std::path::PathBuf;
use std::sync::Arc;

use super::{discover, file_name_of};
use crate::config::ReaderConfig;
use crate::dataset::{RecordPayload, RecordSource};
use crate::error::{IngestError, Result};
use crate::format::npy::read_header;
use crate::header_cache::HeaderCache;
use crate::storage::StorageBackend;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumpyRecord {
    pub path: PathBuf,
}

/// Serves the data section of array files.
///
/// Headers are parsed on first open and kept in a [`HeaderCache`], which
/// can be shared between the readers of all shards.
pub struct NumpySource {
    storage: Arc<dyn StorageBackend>,
    root: PathBuf,
    cache: Arc<HeaderCache>,
}

impl NumpySource {
    pub fn new(storage: Arc<dyn StorageBackend>, config: &ReaderConfig) -> Self {
        Self {
            storage,
            root: config.path.clone(),
            cache: Arc::new(HeaderCache::new()),
        }
    }

    pub fn with_cache(mut self, cache: Arc<HeaderCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache(&self) -> &Arc<HeaderCache> {
        &self.cache
    }
}

impl RecordSource for NumpySource {
    type Record = NumpyRecord;

    fn name(&self) -> &str {
        "numpy"
    }

    fn enumerate(&mut self) -> Result<Vec<NumpyRecord>> {
        let paths = discover(&*self.storage, &self.root, |name| {
            name.rsplit_once('.')
                .is_some_and(|(_, ext)| ext.eq_ignore_ascii_case("npy"))
        })?;
        Ok(paths.into_iter().map(|path| NumpyRecord { path }).collect())
    }

    fn open(&self, record: &NumpyRecord) -> Result<RecordPayload> {
        let context = record.path.to_string_lossy().into_owned();
        let mut reader = self.storage.open_read(&record.path)?;
        let header = self
            .cache
            .get_or_parse(&record.path, || read_header(&mut *reader, &context))?;

        let data_len = header.num_bytes() as u64;
        let data_end = header
            .data_offset
            .checked_add(data_len)
            .ok_or_else(|| IngestError::format(&context, "array size overflows"))?;
        if reader.size() < data_end {
            return Err(IngestError::format(
                &context,
                format!(
                    "truncated: expected {} data bytes after offset {}, file holds {}",
                    data_len,
                    header.data_offset,
                    reader.size()
                ),
            ));
        }

        let offset = header.data_offset;
        Ok(RecordPayload::new(reader, context, offset, data_len).with_header(header))
    }

    fn record_id(&self, record: &NumpyRecord) -> String {
        file_name_of(&record.path)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{storage, write_file};
    use super::*;
    use crate::format::npy::tests::npy_header;
    use crate::format::DType;
    use tempfile::TempDir;

    fn npy_file(dict: &str, data: &[u8]) -> Vec<u8> {
        let mut bytes = npy_header(dict);
        bytes.extend_from_slice(data);
        bytes
    }

    #[test]
    fn test_enumerate_and_open() {
        let temp = TempDir::new().unwrap();
        let data: Vec<u8> = (0..24).collect();
        write_file(
            &temp,
            "b.npy",
            &npy_file("{'descr': '|u1', 'fortran_order': False, 'shape': (4, 6), }", &data),
        );
        write_file(&temp, "a.NPY", &npy_file("{'descr': '<f4', 'fortran_order': False, 'shape': (2,), }", &[0; 8]));
        write_file(&temp, "c.txt", b"not an array");

        let mut src = NumpySource::new(storage(), &ReaderConfig::for_path(temp.path()));
        let records = src.enumerate().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(src.record_id(&records[0]), "a.NPY");

        let mut payload = src.open(&records[1]).unwrap();
        assert_eq!(payload.len(), 24);
        let header = payload.header().unwrap().clone();
        assert_eq!(header.dtype, DType::U8);
        assert_eq!(header.shape, vec![4, 6]);
        assert_eq!(payload.read_to_vec().unwrap(), data);
    }

    #[test]
    fn test_header_parsed_once() {
        let temp = TempDir::new().unwrap();
        write_file(&temp, "x.npy", &npy_file("{'descr': '<i4', 'fortran_order': False, 'shape': (3,), }", &[1; 12]));

        let cache = Arc::new(HeaderCache::new());
        let mut src = NumpySource::new(storage(), &ReaderConfig::for_path(temp.path())).with_cache(cache.clone());
        let records = src.enumerate().unwrap();

        let first = src.open(&records[0]).unwrap();
        let second = src.open(&records[0]).unwrap();
        assert!(Arc::ptr_eq(first.header().unwrap(), second.header().unwrap()));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_truncated_data_is_format_error() {
        let temp = TempDir::new().unwrap();
        write_file(&temp, "t.npy", &npy_file("{'descr': '<f4', 'fortran_order': False, 'shape': (10,), }", &[0; 12]));

        let mut src = NumpySource::new(storage(), &ReaderConfig::for_path(temp.path()));
        let records = src.enumerate().unwrap();
        let err = src.open(&records[0]).unwrap_err();
        assert!(matches!(err, IngestError::Format { .. }));
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn test_oversized_shape_is_format_error() {
        let temp = TempDir::new().unwrap();
        write_file(
            &temp,
            "huge.npy",
            &npy_file(
                "{'descr': '<f4', 'fortran_order': False, 'shape': (4294967296, 4294967296, 4294967296), }",
                &[0; 16],
            ),
        );

        let mut src = NumpySource::new(storage(), &ReaderConfig::for_path(temp.path()));
        let records = src.enumerate().unwrap();
        let err = src.open(&records[0]).unwrap_err();
        assert!(matches!(err, IngestError::Format { .. }));
        assert!(err.to_string().contains("overflows"));
        assert!(src.cache().is_empty());
    }

    #[test]
    fn test_big_endian_rejected_on_open() {
        let temp = TempDir::new().unwrap();
        write_file(&temp, "be.npy", &npy_file("{'descr': '>f4', 'fortran_order': False, 'shape': (1,), }", &[0; 4]));

        let mut src = NumpySource::new(storage(), &ReaderConfig::for_path(temp.path()));
        let records = src.enumerate().unwrap();
        assert!(matches!(src.open(&records[0]), Err(IngestError::Format { .. })));
        assert!(src.cache().is_empty());
    }
}
