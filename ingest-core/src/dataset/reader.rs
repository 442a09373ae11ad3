// ingest-core/src/dataset/reader.rs

//! The sharded record reader shared by every source.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use super::bucket::BucketedShuffle;
use super::cursor::RecordCursor;
use super::plan::{BatchPolicy, ShardPlan};
use super::source::{RecordPayload, RecordSource};
use crate::config::ReaderConfig;
use crate::error::{IngestError, Result};
use crate::format::npy::copy_strided;
use crate::format::ArrayHeader;

/// Iterates one shard of a record source.
///
/// Construction enumerates the source, plans the shards, pads the record
/// list when repeated padding is requested, and applies the first shuffle.
/// Any failure there is returned and no reader exists. After that, each
/// record is consumed with [`open`](Self::open), [`read`](Self::read) and
/// [`close`](Self::close), and [`reset`](Self::reset) marks the epoch
/// boundary.
///
/// A reader belongs to one worker and is not shared.
pub struct Reader<S: RecordSource> {
    source: S,
    /// Records in shard order, padding included.
    records: Vec<S::Record>,
    /// Position in the shard layout -> index into `records`.
    order: Vec<usize>,
    /// Per-shard `(offset, len)` of the unpadded records in `order`.
    shuffle_ranges: Vec<(usize, usize)>,
    /// Plan over the enumerated records; drives the reported counts.
    base_plan: ShardPlan,
    /// Plan over `records`; drives the cursor.
    plan: ShardPlan,
    policy: BatchPolicy,
    looping: bool,
    shuffle: bool,
    grouping: Option<(BucketedShuffle, Vec<f32>)>,
    rng: StdRng,
    cursor: RecordCursor,
    current: Option<RecordPayload>,
    last_id: Option<String>,
    last_label: Option<f32>,
}

impl<S: RecordSource> Reader<S> {
    /// Builds a reader over `source`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for invalid options and propagates
    /// whatever the source's enumeration fails with.
    pub fn new(config: &ReaderConfig, mut source: S) -> Result<Self> {
        config.validate()?;
        let shard_size = config.shard_size_mode()?;
        let shard_count = config.shard_count as usize;
        let shard_id = config.shard_id as usize;

        let records = source.enumerate()?;
        let record_count = records.len();
        if record_count == 0 {
            warn!(source = source.name(), path = %config.path.display(), "no records found");
        }

        let base_plan = ShardPlan::new(record_count, shard_count, config.batch_size, shard_size)?;
        let padded = base_plan.pad(records, config.pad_last_batch_repeated);
        let plan = if padded.total_padded() > 0 {
            ShardPlan::new(padded.len(), shard_count, config.batch_size, shard_size)?
        } else {
            base_plan.clone()
        };
        let shuffle_ranges = (0..shard_count)
            .map(|s| (padded.shard_offset(s), padded.actual_sizes[s]))
            .collect();

        let grouping = if config.aspect_ratio_grouping {
            let keys: Option<Vec<f32>> = padded.records.iter().map(|r| source.grouping_key(r)).collect();
            match keys {
                Some(keys) => Some((
                    BucketedShuffle::new(config.aspect_ratio_threshold, config.batch_size),
                    keys,
                )),
                None => {
                    warn!(
                        source = source.name(),
                        "aspect-ratio grouping requested but the source has no size for every record"
                    );
                    None
                }
            }
        } else {
            None
        };

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let policy = BatchPolicy {
            last_batch: config.last_batch_policy,
            pad_last_batch_repeated: config.pad_last_batch_repeated,
            stick_to_shard: config.stick_to_shard,
        };

        info!(
            source = source.name(),
            shard_id,
            shard_count,
            records = record_count,
            padded = padded.total_padded(),
            shard_records = base_plan.actual_size(shard_id),
            "loaded dataset"
        );

        let mut reader = Self {
            order: (0..padded.len()).collect(),
            records: padded.records,
            cursor: RecordCursor::new(&plan, shard_id),
            source,
            shuffle_ranges,
            base_plan,
            plan,
            policy,
            looping: config.looping,
            shuffle: config.shuffle,
            grouping,
            rng,
            current: None,
            last_id: None,
            last_label: None,
        };
        reader.reshuffle();
        Ok(reader)
    }

    /// Opens the record at the cursor and advances past it.
    ///
    /// Returns the payload size. A record that fails to open is still
    /// consumed; its error is returned so the caller can skip it.
    pub fn try_open(&mut self) -> Result<usize> {
        self.close();

        let shard = self.cursor.shard_id();
        if self.records.is_empty() || (self.policy.stick_to_shard && self.plan.bounds(shard).is_empty()) {
            self.cursor.advance(&self.plan, self.policy.stick_to_shard);
            self.last_id = None;
            self.last_label = None;
            return Ok(0);
        }

        let record = &self.records[self.order[self.cursor.current()]];
        self.cursor.advance(&self.plan, self.policy.stick_to_shard);
        self.last_id = Some(self.source.record_id(record));
        self.last_label = None;

        let payload = self.source.open(record)?;
        let size = payload.len() as usize;
        self.last_label = payload.label();
        self.current = Some(payload);
        Ok(size)
    }

    /// Like [`try_open`](Self::try_open), but logs a failure and reports it
    /// as a zero-size record.
    pub fn open(&mut self) -> usize {
        match self.try_open() {
            Ok(size) => size,
            Err(e) => {
                warn!(
                    source = self.source.name(),
                    record = self.last_id.as_deref().unwrap_or(""),
                    error = %e,
                    "failed to open record, skipping"
                );
                0
            }
        }
    }

    /// Copies bytes of the open record into `buf`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the underlying read fails.
    pub fn try_read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.current.as_mut() {
            Some(payload) => payload.read(buf),
            None => Ok(0),
        }
    }

    /// Copies `min(buf.len(), remaining)` bytes of the open record into
    /// `buf`. Returns 0 when nothing is open or the read fails.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        match self.try_read(buf) {
            Ok(n) => n,
            Err(e) => {
                warn!(
                    source = self.source.name(),
                    record = self.last_id.as_deref().unwrap_or(""),
                    error = %e,
                    "failed to read record"
                );
                0
            }
        }
    }

    /// Reads the open array record into `buf`, laid out row-major as
    /// `max_shape`.
    ///
    /// # Errors
    ///
    /// Returns a dataset error if no array record is open and a format
    /// error if the array does not fit `max_shape` or `buf`.
    pub fn read_padded(&mut self, buf: &mut [u8], max_shape: &[usize]) -> Result<usize> {
        let payload = self
            .current
            .as_mut()
            .ok_or_else(|| IngestError::dataset(self.source.name(), "no record is open"))?;
        let header = payload
            .header()
            .cloned()
            .ok_or_else(|| IngestError::dataset(self.source.name(), "open record is not an array"))?;

        let src = payload.read_to_vec()?;
        copy_strided(&src, &header.shape, header.dtype.size(), max_shape, buf)
    }

    /// Releases the open record, if any.
    pub fn close(&mut self) {
        self.current = None;
    }

    /// Starts the next epoch.
    pub fn reset(&mut self) {
        self.close();
        self.cursor.reset(&self.plan, &self.policy);
        self.reshuffle();
        debug!(
            source = self.source.name(),
            epoch = self.cursor.epoch(),
            shard_id = self.cursor.shard_id(),
            "reset reader"
        );
    }

    /// Records still deliverable this epoch.
    pub fn remaining_count(&self) -> usize {
        self.base_plan
            .remaining_count(&self.policy, self.looping, self.cursor.read_counter())
    }

    /// Whether the epoch is over: not looping, at a batch boundary, and
    /// nothing left to deliver.
    pub fn epoch_finished(&self) -> bool {
        !self.looping
            && self.cursor.read_counter() % self.base_plan.batch_size() == 0
            && self.remaining_count() == 0
    }

    fn reshuffle(&mut self) {
        if !self.shuffle && self.grouping.is_none() {
            return;
        }
        for &(offset, len) in &self.shuffle_ranges {
            let slots = &mut self.order[offset..offset + len];
            match &self.grouping {
                Some((bucket, keys)) => bucket.apply(slots, |i| keys[i], &mut self.rng),
                None => slots.shuffle(&mut self.rng),
            }
        }
    }

    pub fn last_id(&self) -> Option<&str> {
        self.last_id.as_deref()
    }

    pub fn last_label(&self) -> Option<f32> {
        self.last_label
    }

    /// Records needed to complete the final batch of a shard.
    pub fn last_batch_padded_size(&self) -> usize {
        self.base_plan.last_batch_padded_size()
    }

    pub fn shard_id(&self) -> usize {
        self.cursor.shard_id()
    }

    pub fn epoch(&self) -> u64 {
        self.cursor.epoch()
    }

    pub fn read_counter(&self) -> usize {
        self.cursor.read_counter()
    }

    /// Number of records iterated over, padding included.
    pub fn dataset_size(&self) -> usize {
        self.records.len()
    }

    /// Number of records the source enumerated.
    pub fn record_count(&self) -> usize {
        self.base_plan.dataset_size()
    }

    pub fn batch_size(&self) -> usize {
        self.base_plan.batch_size()
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    /// Header of the open array record.
    pub fn current_header(&self) -> Option<&ArrayHeader> {
        self.current.as_ref()?.header().map(|h| h.as_ref())
    }

    /// Shard partition of the enumerated records.
    pub fn plan(&self) -> &ShardPlan {
        &self.base_plan
    }

    pub fn policy(&self) -> &BatchPolicy {
        &self.policy
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LastBatchPolicy;
    use crate::format::{ByteOrder, DType};
    use crate::sources::FileSource;
    use crate::storage::{LocalStorage, MemoryReader};
    use std::collections::HashSet;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Record `i` is `i` repeated `1 + i % 3` times.
    struct VecSource {
        items: Vec<Vec<u8>>,
        failing: Vec<usize>,
        keys: Option<Vec<f32>>,
        header: Option<Arc<ArrayHeader>>,
    }

    impl VecSource {
        fn new(n: usize) -> Self {
            Self {
                items: (0..n).map(|i| vec![i as u8; 1 + i % 3]).collect(),
                failing: Vec::new(),
                keys: None,
                header: None,
            }
        }
    }

    impl RecordSource for VecSource {
        type Record = usize;

        fn name(&self) -> &str {
            "vec"
        }

        fn enumerate(&mut self) -> Result<Vec<usize>> {
            Ok((0..self.items.len()).collect())
        }

        fn open(&self, record: &usize) -> Result<RecordPayload> {
            if self.failing.contains(record) {
                return Err(IngestError::format(record.to_string(), "corrupt"));
            }
            let reader = Box::new(MemoryReader::new(self.items[*record].clone(), record.to_string()));
            let payload = RecordPayload::whole(reader, record.to_string()).with_label(*record as f32);
            Ok(match &self.header {
                Some(h) => payload.with_header(h.clone()),
                None => payload,
            })
        }

        fn record_id(&self, record: &usize) -> String {
            record.to_string()
        }

        fn grouping_key(&self, record: &usize) -> Option<f32> {
            self.keys.as_ref().map(|k| k[*record])
        }
    }

    fn config(shard_id: u32, shard_count: u32, batch_size: usize) -> ReaderConfig {
        let mut config = ReaderConfig::for_path("memory");
        config.shard_id = shard_id;
        config.shard_count = shard_count;
        config.batch_size = batch_size;
        config
    }

    /// Opens records until the epoch finishes, returning their ids.
    fn drain_epoch(reader: &mut Reader<VecSource>) -> Vec<String> {
        let mut ids = Vec::new();
        while !reader.epoch_finished() {
            reader.open();
            ids.push(reader.last_id().unwrap_or("-").to_string());
            assert!(ids.len() <= 1_000, "epoch never finished");
        }
        ids
    }

    #[test]
    fn test_padded_shard_repeats_last_record() {
        let mut config = config(1, 3, 2);
        config.pad_last_batch_repeated = true;
        let mut reader = Reader::new(&config, VecSource::new(9)).unwrap();

        assert_eq!(reader.dataset_size(), 12);
        assert_eq!(reader.record_count(), 9);
        assert_eq!(drain_epoch(&mut reader), vec!["3", "4", "5", "5"]);
    }

    #[test]
    fn test_fill_wraps_within_shard() {
        let mut reader = Reader::new(&config(0, 1, 4), VecSource::new(10)).unwrap();
        assert_eq!(reader.remaining_count(), 12);
        assert_eq!(reader.last_batch_padded_size(), 2);

        let ids = drain_epoch(&mut reader);
        assert_eq!(ids.len(), 12);
        assert_eq!(&ids[10..], &["0", "1"]);
    }

    #[test]
    fn test_drop_skips_tail_batch() {
        let mut config = config(0, 1, 4);
        config.last_batch_policy = LastBatchPolicy::Drop;
        let mut reader = Reader::new(&config, VecSource::new(10)).unwrap();

        let ids = drain_epoch(&mut reader);
        assert_eq!(ids, (0..8).map(|i| i.to_string()).collect::<Vec<_>>());
        assert_eq!(reader.remaining_count(), 0);

        reader.reset();
        assert_eq!(reader.epoch(), 1);
        reader.open();
        assert_eq!(reader.last_id(), Some("2"));
    }

    #[test]
    fn test_open_read_close() {
        let mut reader = Reader::new(&config(0, 1, 1), VecSource::new(3)).unwrap();

        reader.open();
        reader.open();
        let size = reader.open();
        assert_eq!(size, 3);
        assert_eq!(reader.last_id(), Some("2"));
        assert_eq!(reader.last_label(), Some(2.0));

        let mut small = [0u8; 2];
        assert_eq!(reader.read(&mut small), 2);
        assert_eq!(reader.read(&mut small), 1);
        assert_eq!(reader.read(&mut small), 0);

        reader.close();
        assert_eq!(reader.read(&mut small), 0);
    }

    #[test]
    fn test_failed_record_reports_zero() {
        let mut source = VecSource::new(4);
        source.failing = vec![1];
        let mut reader = Reader::new(&config(0, 1, 1), source).unwrap();

        assert!(reader.open() > 0);
        assert_eq!(reader.open(), 0);
        assert_eq!(reader.last_id(), Some("1"));
        assert_eq!(reader.last_label(), None);
        assert!(reader.open() > 0);
        assert_eq!(reader.last_id(), Some("2"));

        // Records 3 and 0, then the failing one again
        reader.reset();
        reader.open();
        reader.open();
        let err = reader.try_open().unwrap_err();
        assert!(err.is_record_recoverable());
    }

    #[test]
    fn test_empty_shard_serves_nothing() {
        // Two records over three shards leaves shard 0 empty
        let mut reader = Reader::new(&config(0, 3, 1), VecSource::new(2)).unwrap();
        assert_eq!(reader.plan().actual_size(0), 0);
        assert_eq!(reader.remaining_count(), 1);

        assert_eq!(reader.open(), 0);
        assert_eq!(reader.last_id(), None);
        assert!(reader.epoch_finished());
    }

    #[test]
    fn test_empty_dataset() {
        let mut reader = Reader::new(&config(0, 2, 4), VecSource::new(0)).unwrap();
        assert_eq!(reader.dataset_size(), 0);
        assert_eq!(reader.open(), 0);
    }

    #[test]
    fn test_invalid_config_aborts() {
        let result = Reader::new(&config(0, 1, 0), VecSource::new(3));
        assert!(matches!(result, Err(IngestError::Config { .. })));

        let result = Reader::new(&config(2, 2, 1), VecSource::new(3));
        assert!(matches!(result, Err(IngestError::InvalidShard { .. })));
    }

    #[test]
    fn test_seeded_shuffle_stays_in_shard() {
        let mut config = config(1, 2, 1);
        config.shuffle = true;
        config.seed = Some(7);

        let mut a = Reader::new(&config, VecSource::new(20)).unwrap();
        let mut b = Reader::new(&config, VecSource::new(20)).unwrap();
        let first = drain_epoch(&mut a);
        assert_eq!(first, drain_epoch(&mut b));

        let ids: HashSet<usize> = first.iter().map(|id| id.parse().unwrap()).collect();
        assert_eq!(ids, (10..20).collect::<HashSet<_>>());
    }

    #[test]
    fn test_shuffle_keeps_padding_at_tail() {
        let mut config = config(0, 3, 2);
        config.pad_last_batch_repeated = true;
        config.shuffle = true;
        config.seed = Some(3);

        for _ in 0..5 {
            let mut reader = Reader::new(&config, VecSource::new(9)).unwrap();
            let ids = drain_epoch(&mut reader);
            assert_eq!(ids.len(), 4);
            // Shard 0 holds 0..3 and pads with a copy of record 2
            assert_eq!(ids[3], "2");
            let mut head: Vec<&str> = ids[..3].iter().map(String::as_str).collect();
            head.sort_unstable();
            assert_eq!(head, vec!["0", "1", "2"]);
        }
    }

    #[test]
    fn test_roaming_rotates_shard() {
        let mut config = config(0, 3, 1);
        config.stick_to_shard = false;
        let mut reader = Reader::new(&config, VecSource::new(9)).unwrap();

        let ids = drain_epoch(&mut reader);
        assert_eq!(ids, vec!["0", "1", "2"]);
        reader.reset();
        assert_eq!(reader.shard_id(), 1);
        reader.open();
        assert_eq!(reader.last_id(), Some("3"));
    }

    #[test]
    fn test_loop_mode_never_finishes() {
        let mut config = config(0, 1, 2);
        config.looping = true;
        let mut reader = Reader::new(&config, VecSource::new(5)).unwrap();
        assert!(reader.is_looping());

        for _ in 0..50 {
            reader.open();
            assert_eq!(reader.remaining_count(), 5);
            assert!(!reader.epoch_finished());
        }
    }

    #[test]
    fn test_shard_size_override_counts() {
        let mut config = config(0, 2, 4);
        config.shard_size = 6;
        let reader = Reader::new(&config, VecSource::new(10)).unwrap();
        assert_eq!(reader.remaining_count(), 8);
        assert_eq!(reader.last_batch_padded_size(), 2);
    }

    #[test]
    fn test_grouping_builds_homogeneous_batches() {
        let mut source = VecSource::new(8);
        source.keys = Some(vec![0.5, 1.5, 0.6, 1.6, 0.7, 1.7, 0.8, 1.8]);
        let mut config = config(0, 1, 2);
        config.aspect_ratio_grouping = true;
        config.seed = Some(1);

        let mut reader = Reader::new(&config, source).unwrap();
        for _ in 0..3 {
            let ids: Vec<usize> = drain_epoch(&mut reader).iter().map(|id| id.parse().unwrap()).collect();
            for batch in ids.chunks(2) {
                assert_eq!(batch[0] % 2, batch[1] % 2, "mixed batch {batch:?}");
            }
            reader.reset();
        }
    }

    #[test]
    fn test_grouping_without_keys_falls_back() {
        let mut config = config(0, 1, 2);
        config.aspect_ratio_grouping = true;
        let mut reader = Reader::new(&config, VecSource::new(4)).unwrap();
        assert_eq!(drain_epoch(&mut reader), vec!["0", "1", "2", "3"]);
    }

    #[test]
    fn test_read_padded_array() {
        let mut source = VecSource::new(1);
        source.items = vec![vec![1, 2, 3, 4]];
        source.header = Some(Arc::new(ArrayHeader {
            dtype: DType::U8,
            byte_order: ByteOrder::NotApplicable,
            fortran_order: false,
            shape: vec![2, 2],
            data_offset: 0,
        }));
        let mut reader = Reader::new(&config(0, 1, 1), source).unwrap();

        assert_eq!(reader.open(), 4);
        assert_eq!(reader.current_header().unwrap().shape, vec![2, 2]);
        let mut dst = [0u8; 9];
        assert_eq!(reader.read_padded(&mut dst, &[3, 3]).unwrap(), 4);
        assert_eq!(dst, [1, 2, 0, 3, 4, 0, 0, 0, 0]);
    }

    #[test]
    fn test_read_padded_requires_array() {
        let mut reader = Reader::new(&config(0, 1, 1), VecSource::new(1)).unwrap();
        let mut dst = [0u8; 4];
        assert!(reader.read_padded(&mut dst, &[4]).is_err());
        reader.open();
        assert!(matches!(reader.read_padded(&mut dst, &[4]), Err(IngestError::Dataset { .. })));
    }

    #[test]
    fn test_file_source_end_to_end() {
        let temp = TempDir::new().unwrap();
        for (name, data) in [("a.jpg", "aa"), ("b.jpg", "bbb"), ("c.png", "c"), ("skip.txt", "x")] {
            fs::write(temp.path().join(name), data).unwrap();
        }
        let storage = Arc::new(LocalStorage::new(&Default::default()).unwrap());

        let mut config = ReaderConfig::for_path(temp.path());
        config.shard_count = 2;
        config.shard_id = 1;
        let source = FileSource::new(storage, &config);
        let mut reader = Reader::new(&config, source).unwrap();

        assert_eq!(reader.record_count(), 3);
        let size = reader.open();
        assert_eq!(reader.last_id(), Some("b.jpg"));
        let mut buf = vec![0u8; size];
        assert_eq!(reader.read(&mut buf), 3);
        assert_eq!(buf, b"bbb");
    }
}
