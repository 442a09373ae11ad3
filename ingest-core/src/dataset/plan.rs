// ingest-core/src/dataset/plan.rs

//! Index-range shard partitioning and last-batch padding.
//!
//! A dataset of `N` records is split into `S` contiguous index ranges with
//! `start(s) = floor(N * s / S)`. Shard sizes therefore differ by at most one
//! and the largest shard holds `ceil(N / S)` records. Padding repeats a
//! shard's last record until every shard has the same length and that
//! length is a multiple of the batch size.

use crate::config::LastBatchPolicy;
use crate::error::{IngestError, Result};

/// How the logical shard size is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardSize {
    /// Derived from the data: the size of the largest shard.
    Auto,
    /// Forced to the given size, rounded up to a batch multiple.
    Fixed(usize),
}

/// Batch-boundary behaviour shared by the plan and the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    pub last_batch: LastBatchPolicy,
    pub pad_last_batch_repeated: bool,
    pub stick_to_shard: bool,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            last_batch: LastBatchPolicy::Fill,
            pad_last_batch_repeated: false,
            stick_to_shard: true,
        }
    }
}

/// Index range of one shard. `end` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardBounds {
    pub start: usize,
    pub end: usize,
}

impl ShardBounds {
    /// Number of records in the shard.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    /// Inclusive index of the shard's last record, if it has one.
    pub fn last(&self) -> Option<usize> {
        if self.is_empty() {
            None
        } else {
            Some(self.end - 1)
        }
    }

    pub fn contains(&self, index: usize) -> bool {
        index >= self.start && index < self.end
    }
}

/// Start index of shard `shard` when `n` records are split `shard_count` ways.
fn start_of(n: usize, shard: usize, shard_count: usize) -> usize {
    // Widened so that n * shard cannot overflow
    ((n as u128 * shard as u128) / shard_count as u128) as usize
}

/// Rounds `value` up to the next multiple of `multiple`.
fn round_up(value: usize, multiple: usize) -> usize {
    value.div_ceil(multiple) * multiple
}

/// Computes the index range of every shard.
///
/// Holds for any `n`, including `n < shard_count` where some shards are
/// empty. A zero shard count yields no shards.
pub fn compute_bounds(n: usize, shard_count: usize) -> Vec<ShardBounds> {
    (0..shard_count)
        .map(|s| ShardBounds {
            start: start_of(n, s, shard_count),
            end: start_of(n, s + 1, shard_count),
        })
        .collect()
}

/// A dataset after last-batch padding.
#[derive(Debug, Clone)]
pub struct PaddedDataset<T> {
    /// Records in shard order, padding entries included.
    pub records: Vec<T>,
    /// Per-shard number of records before padding.
    pub actual_sizes: Vec<usize>,
    /// Per-shard number of appended padding records.
    pub padded_counts: Vec<usize>,
}

impl<T> PaddedDataset<T> {
    /// Total number of records, padding included.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records belonging to each shard, padding included.
    pub fn shard_len(&self, shard: usize) -> usize {
        self.actual_sizes[shard] + self.padded_counts[shard]
    }

    /// Index of the first record of `shard` in [`Self::records`].
    pub fn shard_offset(&self, shard: usize) -> usize {
        (0..shard).map(|s| self.shard_len(s)).sum()
    }

    /// Sum of padding records across all shards.
    pub fn total_padded(&self) -> usize {
        self.padded_counts.iter().sum()
    }
}

/// Shard partition of a dataset.
///
/// The plan is computed once per reader and never changes for the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardPlan {
    dataset_size: usize,
    shard_count: usize,
    batch_size: usize,
    shard_size: ShardSize,
}

impl ShardPlan {
    /// Creates a plan for `dataset_size` records.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `shard_count` or `batch_size` is
    /// zero, or if a fixed shard size is zero.
    pub fn new(
        dataset_size: usize,
        shard_count: usize,
        batch_size: usize,
        shard_size: ShardSize,
    ) -> Result<Self> {
        if shard_count == 0 {
            return Err(IngestError::config("shard_count must be greater than 0"));
        }
        if batch_size == 0 {
            return Err(IngestError::config("batch_size must be greater than 0"));
        }
        if shard_size == ShardSize::Fixed(0) {
            return Err(IngestError::config("fixed shard size must be greater than 0"));
        }

        Ok(Self {
            dataset_size,
            shard_count,
            batch_size,
            shard_size,
        })
    }

    pub fn dataset_size(&self) -> usize {
        self.dataset_size
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn shard_size(&self) -> ShardSize {
        self.shard_size
    }

    /// Index range of `shard`.
    ///
    /// # Panics
    ///
    /// Panics if `shard >= shard_count`.
    pub fn bounds(&self, shard: usize) -> ShardBounds {
        assert!(shard < self.shard_count, "shard {shard} out of range");
        ShardBounds {
            start: start_of(self.dataset_size, shard, self.shard_count),
            end: start_of(self.dataset_size, shard + 1, self.shard_count),
        }
    }

    pub fn start_idx(&self, shard: usize) -> usize {
        self.bounds(shard).start
    }

    /// Inclusive last index of `shard`, or `None` for an empty shard.
    pub fn end_idx(&self, shard: usize) -> Option<usize> {
        self.bounds(shard).last()
    }

    /// Number of records the partition assigns to `shard`.
    pub fn actual_size(&self, shard: usize) -> usize {
        self.bounds(shard).len()
    }

    /// `ceil(N / S)`.
    pub fn largest_size(&self) -> usize {
        self.dataset_size.div_ceil(self.shard_count)
    }

    /// Padding records appended to `shard` under repeated padding.
    pub fn padded_count(&self, shard: usize) -> usize {
        let largest = self.largest_size();
        (largest - self.actual_size(shard)) + self.tail_padding(largest)
    }

    /// Length every shard has after repeated padding.
    pub fn padded_shard_size(&self) -> usize {
        round_up(self.largest_size(), self.batch_size)
    }

    /// Records needed to complete the last batch of the logical shard.
    pub fn last_batch_padded_size(&self) -> usize {
        match self.shard_size {
            ShardSize::Auto => self.tail_padding(self.largest_size()),
            ShardSize::Fixed(size) => self.tail_padding(size),
        }
    }

    /// Logical size every shard reports.
    ///
    /// A fixed shard size replaces the data-derived largest size, rounded up
    /// to the next batch multiple.
    pub fn logical_shard_size(&self, policy: &BatchPolicy) -> usize {
        match self.shard_size {
            ShardSize::Fixed(size) => round_up(size, self.batch_size),
            ShardSize::Auto if policy.pad_last_batch_repeated => self.padded_shard_size(),
            ShardSize::Auto => self.largest_size(),
        }
    }

    /// Number of records still deliverable in the current epoch.
    ///
    /// In loop mode the dataset never ends and the logical shard size is
    /// returned regardless of progress.
    pub fn remaining_count(&self, policy: &BatchPolicy, looping: bool, read_counter: usize) -> usize {
        if looping {
            return self.logical_shard_size(policy);
        }

        let batch = self.batch_size as i64;
        let (size, add_back) = match self.shard_size {
            ShardSize::Auto => {
                let size = self.largest_size().max(self.batch_size);
                (size as i64, self.tail_padding(size) as i64)
            }
            // Already a batch multiple
            ShardSize::Fixed(size) => (round_up(size, self.batch_size).max(self.batch_size) as i64, 0),
        };

        let mut remaining = size - read_counter as i64;
        match policy.last_batch {
            LastBatchPolicy::Fill | LastBatchPolicy::Partial => remaining += add_back,
            LastBatchPolicy::Drop => remaining -= batch,
        }
        remaining.max(0) as usize
    }

    /// Pads every shard to the same batch-multiple length.
    ///
    /// Each shard is extended with copies of its own last record. An empty
    /// shard repeats the record at its start position instead. When
    /// `pad_last_batch_repeated` is false the records are returned unchanged
    /// with zero padding counts.
    ///
    /// # Panics
    ///
    /// Panics if `records.len()` differs from the plan's dataset size.
    pub fn pad<T: Clone>(&self, records: Vec<T>, pad_last_batch_repeated: bool) -> PaddedDataset<T> {
        assert_eq!(records.len(), self.dataset_size, "record count does not match plan");

        let actual_sizes: Vec<usize> = (0..self.shard_count).map(|s| self.actual_size(s)).collect();

        if !pad_last_batch_repeated || records.is_empty() {
            return PaddedDataset {
                records,
                padded_counts: vec![0; self.shard_count],
                actual_sizes,
            };
        }

        let padded_counts: Vec<usize> = (0..self.shard_count).map(|s| self.padded_count(s)).collect();
        let total = self.dataset_size + padded_counts.iter().sum::<usize>();
        let mut padded = Vec::with_capacity(total);

        for shard in 0..self.shard_count {
            let bounds = self.bounds(shard);
            padded.extend_from_slice(&records[bounds.start..bounds.end]);

            let repeat = bounds.last().unwrap_or(bounds.start.min(self.dataset_size - 1));
            for _ in 0..padded_counts[shard] {
                padded.push(records[repeat].clone());
            }
        }

        PaddedDataset {
            records: padded,
            actual_sizes,
            padded_counts,
        }
    }

    fn tail_padding(&self, size: usize) -> usize {
        (self.batch_size - size % self.batch_size) % self.batch_size
    }
}
