// ingest-core/src/sources/files.rs

//! One record per file: directory trees and explicit file lists.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use super::{discover, file_name_of, read_text};
use crate::config::ReaderConfig;
use crate::dataset::{MetadataLookup, RecordPayload, RecordSource};
use crate::error::Result;
use crate::storage::StorageBackend;

#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    /// Location handed to the storage backend.
    pub path: PathBuf,
    /// Path relative to the dataset root, the key used for metadata.
    pub relative: String,
    /// Label from the file list, if one was given.
    pub label: Option<f32>,
}

/// Serves whole files as records.
///
/// Records come from, in order of precedence:
/// 1. the metadata lookup, when both a lookup and a file list are configured;
/// 2. the file list, one `<path> [label]` entry per line;
/// 3. a recursive walk of the root, filtered by extension and, when a lookup
///    is attached, by the lookup's `exists`.
pub struct FileSource {
    storage: Arc<dyn StorageBackend>,
    config: ReaderConfig,
    metadata: Option<Arc<dyn MetadataLookup>>,
}

impl FileSource {
    pub fn new(storage: Arc<dyn StorageBackend>, config: &ReaderConfig) -> Self {
        Self {
            storage,
            config: config.clone(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Arc<dyn MetadataLookup>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    fn resolve(&self, listed: &str) -> PathBuf {
        let path = Path::new(listed);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config.path.join(path)
        }
    }

    fn relative_name(&self, path: &Path) -> String {
        path.strip_prefix(&self.config.path)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    /// Keeps only entries that exist in storage.
    fn existing(&self, entries: Vec<(String, Option<f32>)>) -> Result<Vec<FileRecord>> {
        let mut records = Vec::with_capacity(entries.len());
        for (listed, label) in entries {
            let path = self.resolve(&listed);
            if !self.storage.exists(&path)? {
                warn!(path = %path.display(), "listed file does not exist, skipping");
                continue;
            }
            records.push(FileRecord {
                relative: self.relative_name(&path),
                path,
                label,
            });
        }
        Ok(records)
    }

    fn from_file_list(&self, list: &Path) -> Result<Vec<FileRecord>> {
        let text = read_text(&*self.storage, list)?;
        let mut entries = Vec::new();

        for (line_no, line) in text.lines().enumerate() {
            let mut tokens = line.split_whitespace();
            let Some(listed) = tokens.next() else {
                continue;
            };
            let label = match tokens.next().map(str::parse::<f32>) {
                Some(Ok(label)) => Some(label),
                Some(Err(_)) => {
                    warn!(list = %list.display(), line = line_no + 1, "ignoring unparsable label");
                    None
                }
                None => None,
            };
            entries.push((listed.to_string(), label));
        }

        debug!(list = %list.display(), entries = entries.len(), "parsed file list");
        self.existing(entries)
    }

    fn from_directory(&self) -> Result<Vec<FileRecord>> {
        let candidates = discover(&*self.storage, &self.config.path, |name| self.config.accepts_extension(name))?;
        let mut records = Vec::with_capacity(candidates.len());

        for path in candidates {
            let relative = self.relative_name(&path);
            if let Some(metadata) = &self.metadata {
                if !metadata.exists(&relative) {
                    warn!(file = %relative, "file has no metadata entry, excluding it");
                    continue;
                }
            }
            records.push(FileRecord {
                path,
                relative,
                label: None,
            });
        }
        Ok(records)
    }
}

impl RecordSource for FileSource {
    type Record = FileRecord;

    fn name(&self) -> &str {
        "files"
    }

    fn enumerate(&mut self) -> Result<Vec<FileRecord>> {
        match (&self.config.file_list_path, &self.metadata) {
            (Some(_), Some(metadata)) => {
                let entries = metadata.relative_paths().into_iter().map(|p| (p, None)).collect();
                self.existing(entries)
            }
            (Some(list), None) => self.from_file_list(list),
            (None, _) => self.from_directory(),
        }
    }

    fn open(&self, record: &FileRecord) -> Result<RecordPayload> {
        let reader = self.storage.open_read(&record.path)?;
        let payload = RecordPayload::whole(reader, record.path.to_string_lossy());
        Ok(match record.label {
            Some(label) => payload.with_label(label),
            None => payload,
        })
    }

    fn record_id(&self, record: &FileRecord) -> String {
        file_name_of(&record.path)
    }

    /// Width over height, from the metadata lookup.
    fn grouping_key(&self, record: &FileRecord) -> Option<f32> {
        let (height, width) = self.metadata.as_ref()?.size_of(&record.relative)?;
        if height == 0 {
            return None;
        }
        Some(width as f32 / height as f32)
    }
}

impl std::fmt::Debug for FileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSource")
            .field("root", &self.config.path)
            .field("file_list", &self.config.file_list_path)
            .field("has_metadata", &self.metadata.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{storage, write_file};
    use super::*;
    use crate::error::IngestError;
    use std::collections::HashMap;
    use tempfile::TempDir;

    struct MockLookup {
        sizes: HashMap<String, (u32, u32)>,
        order: Vec<String>,
    }

    impl MockLookup {
        fn new(entries: &[(&str, (u32, u32))]) -> Self {
            Self {
                sizes: entries.iter().map(|(n, s)| (n.to_string(), *s)).collect(),
                order: entries.iter().map(|(n, _)| n.to_string()).collect(),
            }
        }
    }

    impl MetadataLookup for MockLookup {
        fn exists(&self, name: &str) -> bool {
            self.sizes.contains_key(name)
        }

        fn relative_paths(&self) -> Vec<String> {
            self.order.clone()
        }

        fn size_of(&self, name: &str) -> Option<(u32, u32)> {
            self.sizes.get(name).copied()
        }
    }

    fn source(temp: &TempDir) -> FileSource {
        FileSource::new(storage(), &ReaderConfig::for_path(temp.path()))
    }

    #[test]
    fn test_directory_walk_filters_extensions() {
        let temp = TempDir::new().unwrap();
        write_file(&temp, "b.JPG", b"bb");
        write_file(&temp, "a.png", b"a");
        write_file(&temp, "readme.md", b"#");
        write_file(&temp, "noext", b"?");
        write_file(&temp, "nested/c.wav", b"ccc");

        let mut src = source(&temp);
        let records = src.enumerate().unwrap();
        let names: Vec<_> = records.iter().map(|r| r.relative.as_str()).collect();
        assert_eq!(names, vec!["a.png", "b.JPG", "nested/c.wav"]);
        assert_eq!(src.record_id(&records[2]), "c.wav");
    }

    #[test]
    fn test_configured_extensions_replace_defaults() {
        let temp = TempDir::new().unwrap();
        write_file(&temp, "a.png", b"a");
        write_file(&temp, "b.Bin", b"b");

        let mut config = ReaderConfig::for_path(temp.path());
        config.extensions = vec!["bin".to_string()];
        let mut src = FileSource::new(storage(), &config);
        let names: Vec<String> = src.enumerate().unwrap().into_iter().map(|r| r.relative).collect();
        assert_eq!(names, vec!["b.Bin"]);
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let temp = TempDir::new().unwrap();
        let mut src = FileSource::new(storage(), &ReaderConfig::for_path(temp.path().join("gone")));
        assert!(matches!(src.enumerate(), Err(IngestError::Storage { .. })));
    }

    #[test]
    fn test_file_list_with_labels() {
        let temp = TempDir::new().unwrap();
        write_file(&temp, "img/x.jpg", b"xx");
        write_file(&temp, "img/y.jpg", b"yyy");
        let abs = temp.path().join("img/y.jpg");
        write_file(
            &temp,
            "list.txt",
            format!("img/x.jpg 3\n\n{} 7\nimg/missing.jpg 1\nimg/x.jpg oops\n", abs.display()).as_bytes(),
        );

        let mut config = ReaderConfig::for_path(temp.path());
        config.file_list_path = Some(temp.path().join("list.txt"));
        let mut src = FileSource::new(storage(), &config);

        let records = src.enumerate().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].label, Some(3.0));
        assert_eq!(records[1].relative, "img/y.jpg");
        assert_eq!(records[1].label, Some(7.0));
        assert_eq!(records[2].label, None);

        let mut payload = src.open(&records[1]).unwrap();
        assert_eq!(payload.len(), 3);
        assert_eq!(payload.label(), Some(7.0));
        assert_eq!(payload.read_to_vec().unwrap(), b"yyy");
    }

    #[test]
    fn test_unreadable_file_list_is_fatal() {
        let temp = TempDir::new().unwrap();
        let mut config = ReaderConfig::for_path(temp.path());
        config.file_list_path = Some(temp.path().join("nope.txt"));
        let mut src = FileSource::new(storage(), &config);
        assert!(matches!(src.enumerate(), Err(IngestError::Storage { .. })));
    }

    #[test]
    fn test_metadata_excludes_unknown_files() {
        let temp = TempDir::new().unwrap();
        write_file(&temp, "a.jpg", b"a");
        write_file(&temp, "b.jpg", b"b");
        write_file(&temp, "c.jpg", b"c");

        let lookup = Arc::new(MockLookup::new(&[("a.jpg", (100, 200)), ("c.jpg", (300, 150))]));
        let mut src = source(&temp).with_metadata(lookup);

        let records = src.enumerate().unwrap();
        let names: Vec<_> = records.iter().map(|r| r.relative.as_str()).collect();
        assert_eq!(names, vec!["a.jpg", "c.jpg"]);
        assert_eq!(src.grouping_key(&records[0]), Some(2.0));
        assert_eq!(src.grouping_key(&records[1]), Some(0.5));
    }

    #[test]
    fn test_metadata_paths_replace_file_list() {
        let temp = TempDir::new().unwrap();
        write_file(&temp, "z.jpg", b"z");
        write_file(&temp, "a.jpg", b"a");

        let mut config = ReaderConfig::for_path(temp.path());
        config.file_list_path = Some(temp.path().join("unused.txt"));
        let lookup = Arc::new(MockLookup::new(&[("z.jpg", (1, 1)), ("gone.jpg", (1, 1)), ("a.jpg", (1, 1))]));
        let mut src = FileSource::new(storage(), &config).with_metadata(lookup);

        let records = src.enumerate().unwrap();
        let names: Vec<_> = records.iter().map(|r| r.relative.as_str()).collect();
        assert_eq!(names, vec!["z.jpg", "a.jpg"]);
    }

    #[test]
    fn test_no_grouping_key_without_metadata() {
        let temp = TempDir::new().unwrap();
        write_file(&temp, "a.jpg", b"a");
        let mut src = source(&temp);
        let records = src.enumerate().unwrap();
        assert_eq!(src.grouping_key(&records[0]), None);
    }
}
