// ingest-core/src/config.rs

//! Configuration management for record ingestion.
//!
//! This module provides configuration parsing from TOML files, environment
//! variable overrides, and validation of configuration values. The
//! `[reader]` section is the flat options record every reader is built from.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::dataset::ShardSize;
use crate::error::{IngestError, Result};

/// Extensions recognised by directory scans when none are configured.
pub const DEFAULT_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "ppm", "bmp", "pgm", "tif", "tiff", "webp", "wav",
];

// Top-level ingestion configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub storage: StorageConfig,
    pub reader: ReaderConfig,
    pub prefetch: PrefetchConfig,
}

/// Kind of record source a reader enumerates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Plain files from a directory walk or a file list.
    #[default]
    Files,
    /// Self-describing `.npy` array files.
    Numpy,
    /// Framed `.rec` container with a companion `.idx` offset index.
    RecordIo,
    /// Concatenated fixed-size records with a leading label.
    Fixed,
    /// Members of tar archives.
    Archive,
}

impl FromStr for SourceKind {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "files" => Ok(Self::Files),
            "numpy" | "npy" => Ok(Self::Numpy),
            "recordio" | "rec" => Ok(Self::RecordIo),
            "fixed" => Ok(Self::Fixed),
            "archive" | "tar" => Ok(Self::Archive),
            other => Err(IngestError::config(format!("unknown source kind '{other}'"))),
        }
    }
}

/// How a shard's ragged tail batch is reported and consumed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LastBatchPolicy {
    /// Complete the tail batch with padded samples.
    #[default]
    Fill,
    /// Deliver the tail batch; downstream trims the padded samples.
    Partial,
    /// Never deliver the tail batch.
    Drop,
}

impl FromStr for LastBatchPolicy {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "fill" => Ok(Self::Fill),
            "partial" => Ok(Self::Partial),
            "drop" => Ok(Self::Drop),
            other => Err(IngestError::config(format!(
                "unknown last batch policy '{other}'"
            ))),
        }
    }
}

// Storage configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    // Base path that relative record paths are resolved against.
    pub base_path: PathBuf,
    // Buffer size in bytes for I/O operations.
    pub buffer_size: usize,
    // Whether to use memory-mapped I/O.
    pub use_mmap: bool,
    // File size threshold (bytes) above which to use mmap.
    pub mmap_threshold: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("."),
            buffer_size: 64 * 1024, // 64 KB
            use_mmap: true,
            mmap_threshold: 1024 * 1024, // 1 MB
        }
    }
}

/// Layout of a fixed-size record container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixedRecordConfig {
    /// Only files whose name starts with this prefix are read.
    pub file_prefix: String,
    /// Size of one record including its label bytes.
    pub record_size: usize,
    /// Number of leading label bytes in each record.
    pub label_bytes: usize,
}

impl Default for FixedRecordConfig {
    fn default() -> Self {
        Self {
            file_prefix: "data_batch".to_string(),
            record_size: 3073,
            label_bytes: 1,
        }
    }
}

/// Options a reader is constructed from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Dataset root: a directory, a container file, or an archive.
    pub path: PathBuf,
    /// Optional explicit record list, one `<path> [label]` per line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_list_path: Option<PathBuf>,
    pub source: SourceKind,
    pub shard_id: u32,
    pub shard_count: u32,
    pub batch_size: usize,
    pub shuffle: bool,
    /// Shuffle seed. Entropy-seeded when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Treat the dataset as endlessly repeating.
    #[serde(rename = "loop")]
    pub looping: bool,
    pub last_batch_policy: LastBatchPolicy,
    pub pad_last_batch_repeated: bool,
    pub stick_to_shard: bool,
    /// Forced logical shard size; -1 derives it from the data.
    pub shard_size: i64,
    // File extensions (without the dot) accepted by directory scans.
    pub extensions: Vec<String>,
    // Batch records of similar aspect ratio together when shuffling.
    pub aspect_ratio_grouping: bool,
    pub aspect_ratio_threshold: f32,
    pub fixed: FixedRecordConfig,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            file_list_path: None,
            source: SourceKind::Files,
            shard_id: 0,
            shard_count: 1,
            batch_size: 1,
            shuffle: false,
            seed: None,
            looping: false,
            last_batch_policy: LastBatchPolicy::Fill,
            pad_last_batch_repeated: false,
            stick_to_shard: true,
            shard_size: -1,
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            aspect_ratio_grouping: false,
            aspect_ratio_threshold: 1.0,
            fixed: FixedRecordConfig::default(),
        }
    }
}

impl ReaderConfig {
    /// Creates a configuration for `path` with every other option defaulted.
    pub fn for_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Returns the shard size mode encoded by `shard_size`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for values other than -1 or a positive
    /// size.
    pub fn shard_size_mode(&self) -> Result<ShardSize> {
        match self.shard_size {
            -1 => Ok(ShardSize::Auto),
            n if n > 0 => Ok(ShardSize::Fixed(n as usize)),
            n => Err(IngestError::config(format!(
                "reader.shard_size must be -1 or greater than 0, got {n}"
            ))),
        }
    }

    /// Returns true if `file_name` has one of the configured extensions.
    pub fn accepts_extension(&self, file_name: &str) -> bool {
        let Some((_, ext)) = file_name.rsplit_once('.') else {
            return false;
        };
        self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))
    }

    /// Validates the reader options.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a missing path, a zero batch size or
    /// shard count, an invalid shard size, or a shard id outside the shard
    /// count.
    pub fn validate(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(IngestError::config("reader.path is required"));
        }
        if self.batch_size == 0 {
            return Err(IngestError::config(
                "reader.batch_size must be greater than 0",
            ));
        }
        if self.shard_count == 0 {
            return Err(IngestError::config(
                "reader.shard_count must be greater than 0",
            ));
        }
        if self.shard_id >= self.shard_count {
            return Err(IngestError::invalid_shard(self.shard_id, self.shard_count));
        }
        self.shard_size_mode()?;

        if self.aspect_ratio_grouping && !self.aspect_ratio_threshold.is_finite() {
            return Err(IngestError::config(
                "reader.aspect_ratio_threshold must be finite",
            ));
        }
        if self.source == SourceKind::Fixed && self.fixed.record_size <= self.fixed.label_bytes {
            return Err(IngestError::config(
                "reader.fixed.record_size must be greater than reader.fixed.label_bytes",
            ));
        }
        Ok(())
    }
}

// Background prefetch options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    // Whether records are read ahead on a background thread.
    pub enabled: bool,
    // Number of samples buffered ahead of the consumer.
    pub depth: usize,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            depth: 4,
        }
    }
}

impl FromStr for IngestConfig {
    type Err = IngestError;

    /// Parse configuration from a TOML string.
    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s)
            .map_err(|e| IngestError::config_with_source("failed to parse TOML config", e))
    }
}

impl IngestConfig {
    // Load configuration from a TOML file.
    //
    // # Errors
    //
    // Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            IngestError::storage_with_source(path, "failed to read config file", e)
        })?;
        let config: Self = content.parse()?;
        config.validate()?;
        Ok(config)
    }

    // Apply environment variable overrides.
    //
    // Environment variables are prefixed with `INGEST_` followed by the
    // section and field name. For example:
    // - `INGEST_STORAGE_BASE_PATH` overrides `storage.base_path`
    // - `INGEST_READER_SHARD_ID` overrides `reader.shard_id`
    // - `INGEST_READER_LAST_BATCH_POLICY` overrides `reader.last_batch_policy`
    // - `INGEST_PREFETCH_DEPTH` overrides `prefetch.depth`
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        // Storage overrides
        if let Ok(val) = std::env::var("INGEST_STORAGE_BASE_PATH") {
            self.storage.base_path = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("INGEST_STORAGE_BUFFER_SIZE") {
            if let Ok(v) = val.parse() {
                self.storage.buffer_size = v;
            }
        }
        if let Ok(val) = std::env::var("INGEST_STORAGE_USE_MMAP") {
            if let Ok(v) = val.parse() {
                self.storage.use_mmap = v;
            }
        }
        if let Ok(val) = std::env::var("INGEST_STORAGE_MMAP_THRESHOLD") {
            if let Ok(v) = val.parse() {
                self.storage.mmap_threshold = v;
            }
        }

        // Reader overrides
        if let Ok(val) = std::env::var("INGEST_READER_PATH") {
            self.reader.path = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("INGEST_READER_FILE_LIST_PATH") {
            self.reader.file_list_path = Some(PathBuf::from(val));
        }
        if let Ok(val) = std::env::var("INGEST_READER_SOURCE") {
            if let Ok(v) = val.parse() {
                self.reader.source = v;
            }
        }
        if let Ok(val) = std::env::var("INGEST_READER_SHARD_ID") {
            if let Ok(v) = val.parse() {
                self.reader.shard_id = v;
            }
        }
        if let Ok(val) = std::env::var("INGEST_READER_SHARD_COUNT") {
            if let Ok(v) = val.parse() {
                self.reader.shard_count = v;
            }
        }
        if let Ok(val) = std::env::var("INGEST_READER_BATCH_SIZE") {
            if let Ok(v) = val.parse() {
                self.reader.batch_size = v;
            }
        }
        if let Ok(val) = std::env::var("INGEST_READER_SHUFFLE") {
            if let Ok(v) = val.parse() {
                self.reader.shuffle = v;
            }
        }
        if let Ok(val) = std::env::var("INGEST_READER_SEED") {
            if let Ok(v) = val.parse() {
                self.reader.seed = Some(v);
            }
        }
        if let Ok(val) = std::env::var("INGEST_READER_LOOP") {
            if let Ok(v) = val.parse() {
                self.reader.looping = v;
            }
        }
        if let Ok(val) = std::env::var("INGEST_READER_LAST_BATCH_POLICY") {
            if let Ok(v) = val.parse() {
                self.reader.last_batch_policy = v;
            }
        }
        if let Ok(val) = std::env::var("INGEST_READER_PAD_LAST_BATCH_REPEATED") {
            if let Ok(v) = val.parse() {
                self.reader.pad_last_batch_repeated = v;
            }
        }
        if let Ok(val) = std::env::var("INGEST_READER_STICK_TO_SHARD") {
            if let Ok(v) = val.parse() {
                self.reader.stick_to_shard = v;
            }
        }
        if let Ok(val) = std::env::var("INGEST_READER_SHARD_SIZE") {
            if let Ok(v) = val.parse() {
                self.reader.shard_size = v;
            }
        }

        // Prefetch overrides
        if let Ok(val) = std::env::var("INGEST_PREFETCH_ENABLED") {
            if let Ok(v) = val.parse() {
                self.prefetch.enabled = v;
            }
        }
        if let Ok(val) = std::env::var("INGEST_PREFETCH_DEPTH") {
            if let Ok(v) = val.parse() {
                self.prefetch.depth = v;
            }
        }

        self
    }

    // Validate all configuration values.
    //
    // # Errors
    //
    // Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.storage.buffer_size == 0 {
            return Err(IngestError::config(
                "storage.buffer_size must be greater than 0",
            ));
        }

        self.reader.validate()?;

        if self.prefetch.enabled && self.prefetch.depth == 0 {
            return Err(IngestError::config(
                "prefetch.depth must be greater than 0 when prefetch is enabled",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn valid_config() -> IngestConfig {
        IngestConfig {
            reader: ReaderConfig::for_path("/data/train"),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = IngestConfig::default();

        assert_eq!(config.storage.base_path, PathBuf::from("."));
        assert_eq!(config.storage.buffer_size, 64 * 1024);
        assert!(config.storage.use_mmap);
        assert_eq!(config.storage.mmap_threshold, 1024 * 1024);

        assert_eq!(config.reader.source, SourceKind::Files);
        assert_eq!(config.reader.shard_id, 0);
        assert_eq!(config.reader.shard_count, 1);
        assert_eq!(config.reader.batch_size, 1);
        assert_eq!(config.reader.last_batch_policy, LastBatchPolicy::Fill);
        assert_eq!(config.reader.shard_size, -1);
        assert!(config.reader.stick_to_shard);
        assert!(!config.reader.looping);
        assert!(config.reader.seed.is_none());
        assert_eq!(config.reader.extensions.len(), DEFAULT_EXTENSIONS.len());

        assert!(config.prefetch.enabled);
        assert_eq!(config.prefetch.depth, 4);
    }

    #[test]
    fn test_default_requires_path() {
        let config = IngestConfig::default();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, IngestError::Config { .. }));
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_from_str_partial() {
        let toml = r#"
            [reader]
            path = "/data/imagenet"
            batch_size = 32
        "#;
        let config: IngestConfig = toml.parse().unwrap();

        assert_eq!(config.reader.path, PathBuf::from("/data/imagenet"));
        assert_eq!(config.reader.batch_size, 32);
        // Other reader fields should be defaults
        assert_eq!(config.reader.shard_count, 1);
        // Other sections should be defaults
        assert!(config.storage.use_mmap);
    }

    #[test]
    fn test_from_str_full() {
        let toml = r#"
            [storage]
            base_path = "/mnt"
            buffer_size = 131072
            use_mmap = false
            mmap_threshold = 2097152

            [reader]
            path = "train.rec"
            source = "recordio"
            shard_id = 2
            shard_count = 8
            batch_size = 64
            shuffle = true
            seed = 42
            loop = true
            last_batch_policy = "drop"
            pad_last_batch_repeated = true
            stick_to_shard = false
            shard_size = 1000
            extensions = ["jpg", "PNG"]
            aspect_ratio_grouping = true
            aspect_ratio_threshold = 1.5

            [reader.fixed]
            file_prefix = "test_batch"
            record_size = 785
            label_bytes = 1

            [prefetch]
            enabled = false
            depth = 16
        "#;

        let config: IngestConfig = toml.parse().unwrap();

        assert_eq!(config.storage.base_path, PathBuf::from("/mnt"));
        assert_eq!(config.storage.buffer_size, 131072);
        assert!(!config.storage.use_mmap);

        assert_eq!(config.reader.source, SourceKind::RecordIo);
        assert_eq!(config.reader.shard_id, 2);
        assert_eq!(config.reader.shard_count, 8);
        assert_eq!(config.reader.batch_size, 64);
        assert!(config.reader.shuffle);
        assert_eq!(config.reader.seed, Some(42));
        assert!(config.reader.looping);
        assert_eq!(config.reader.last_batch_policy, LastBatchPolicy::Drop);
        assert!(config.reader.pad_last_batch_repeated);
        assert!(!config.reader.stick_to_shard);
        assert_eq!(config.reader.shard_size_mode().unwrap(), ShardSize::Fixed(1000));
        assert!(config.reader.aspect_ratio_grouping);
        assert_eq!(config.reader.aspect_ratio_threshold, 1.5);
        assert_eq!(config.reader.fixed.record_size, 785);
        assert_eq!(config.reader.fixed.file_prefix, "test_batch");

        assert!(!config.prefetch.enabled);
        assert_eq!(config.prefetch.depth, 16);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_str_invalid_toml() {
        let result: std::result::Result<IngestConfig, _> = "invalid = [".parse();
        assert!(result.is_err());
    }

    #[test]
    fn test_from_str_unknown_policy() {
        let toml = r#"
            [reader]
            last_batch_policy = "pad"
        "#;
        let result: std::result::Result<IngestConfig, _> = toml.parse();
        assert!(result.is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [reader]
            path = "/tmp/test"
            "#
        )
        .unwrap();

        let config = IngestConfig::from_file(file.path()).unwrap();
        assert_eq!(config.reader.path, PathBuf::from("/tmp/test"));
    }

    #[test]
    fn test_from_file_not_found() {
        let result = IngestConfig::from_file("/nonexistent/config.toml");
        assert!(matches!(result, Err(IngestError::Storage { .. })));
    }

    #[test]
    fn test_validate_invalid_batch_size() {
        let mut config = valid_config();
        config.reader.batch_size = 0;
        assert!(matches!(config.validate(), Err(IngestError::Config { .. })));
    }

    #[test]
    fn test_validate_invalid_shard_count() {
        let mut config = valid_config();
        config.reader.shard_count = 0;
        assert!(matches!(config.validate(), Err(IngestError::Config { .. })));
    }

    #[test]
    fn test_validate_shard_id_out_of_range() {
        let mut config = valid_config();
        config.reader.shard_count = 4;
        config.reader.shard_id = 4;
        assert!(matches!(
            config.validate(),
            Err(IngestError::InvalidShard { shard_id: 4, total_shards: 4 })
        ));
    }

    #[test]
    fn test_validate_shard_size() {
        let mut config = valid_config();
        config.reader.shard_size = 0;
        assert!(config.validate().is_err());

        config.reader.shard_size = -2;
        assert!(config.validate().is_err());

        config.reader.shard_size = 17;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_fixed_record_layout() {
        let mut config = valid_config();
        config.reader.source = SourceKind::Fixed;
        config.reader.fixed.record_size = 1;
        config.reader.fixed.label_bytes = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_invalid_buffer_size() {
        let mut config = valid_config();
        config.storage.buffer_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_prefetch_depth() {
        let mut config = valid_config();
        config.prefetch.depth = 0;
        assert!(config.validate().is_err());

        config.prefetch.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_accepts_extension() {
        let config = ReaderConfig::default();
        assert!(config.accepts_extension("cat.JPG"));
        assert!(config.accepts_extension("dog.tiff"));
        assert!(config.accepts_extension("a.b.wav"));
        assert!(!config.accepts_extension("notes.txt"));
        assert!(!config.accepts_extension("jpg"));
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!("DROP".parse::<LastBatchPolicy>().unwrap(), LastBatchPolicy::Drop);
        assert_eq!("tar".parse::<SourceKind>().unwrap(), SourceKind::Archive);
        assert!("lmdb".parse::<SourceKind>().is_err());
    }

    // Helper to clear all INGEST_ environment variables for test isolation
    fn clear_ingest_env_vars() {
        for (key, _) in std::env::vars() {
            if key.starts_with("INGEST_") {
                std::env::remove_var(&key);
            }
        }
    }

    // Environment variable tests are combined into a single test to avoid
    // race conditions when tests run in parallel, since env vars are global state.
    #[test]
    fn test_env_overrides() {
        clear_ingest_env_vars();

        std::env::set_var("INGEST_READER_PATH", "/env/path");
        std::env::set_var("INGEST_READER_SHARD_ID", "3");
        std::env::set_var("INGEST_READER_SHARD_COUNT", "4");
        std::env::set_var("INGEST_READER_LAST_BATCH_POLICY", "partial");
        std::env::set_var("INGEST_READER_LOOP", "true");
        std::env::set_var("INGEST_STORAGE_BUFFER_SIZE", "32768");
        std::env::set_var("INGEST_PREFETCH_DEPTH", "9");

        let config = IngestConfig::default().with_env_overrides();

        assert_eq!(config.reader.path, PathBuf::from("/env/path"));
        assert_eq!(config.reader.shard_id, 3);
        assert_eq!(config.reader.shard_count, 4);
        assert_eq!(config.reader.last_batch_policy, LastBatchPolicy::Partial);
        assert!(config.reader.looping);
        assert_eq!(config.storage.buffer_size, 32768);
        assert_eq!(config.prefetch.depth, 9);

        clear_ingest_env_vars();

        // Invalid values are ignored
        std::env::set_var("INGEST_READER_BATCH_SIZE", "not_a_number");
        std::env::set_var("INGEST_READER_SOURCE", "lmdb");

        let config = IngestConfig::default().with_env_overrides();
        assert_eq!(config.reader.batch_size, 1);
        assert_eq!(config.reader.source, SourceKind::Files);

        clear_ingest_env_vars();
    }

    #[test]
    fn test_serialize_roundtrip() {
        let original = valid_config();
        let toml_str = toml::to_string(&original).unwrap();
        let parsed: IngestConfig = toml_str.parse().unwrap();

        assert_eq!(original.reader.path, parsed.reader.path);
        assert_eq!(original.reader.looping, parsed.reader.looping);
        assert_eq!(original.reader.extensions, parsed.reader.extensions);
        assert_eq!(original.storage.buffer_size, parsed.storage.buffer_size);
    }
}
