// ingest-core/src/dataset/cursor.rs

//! Per-worker position within a sharded dataset.

use super::plan::{BatchPolicy, ShardPlan};
use crate::config::LastBatchPolicy;

/// Iteration state of one reader.
///
/// A cursor is owned by exactly one reader and moves over the (possibly
/// padded) record list described by a [`ShardPlan`]. In shard-sticky mode it
/// never leaves its shard; otherwise it sweeps the whole dataset and the
/// shard identity rotates at every epoch boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordCursor {
    curr_index: usize,
    read_counter: usize,
    epoch: u64,
    shard_id: usize,
}

impl RecordCursor {
    /// Places a new cursor at the first record of `shard_id`.
    pub fn new(plan: &ShardPlan, shard_id: usize) -> Self {
        Self {
            curr_index: plan.start_idx(shard_id),
            read_counter: 0,
            epoch: 0,
            shard_id,
        }
    }

    /// Index of the record the next `open()` resolves.
    pub fn current(&self) -> usize {
        self.curr_index
    }

    /// Records consumed since the last epoch boundary.
    pub fn read_counter(&self) -> usize {
        self.read_counter
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn shard_id(&self) -> usize {
        self.shard_id
    }

    /// Moves to the next record and counts the current one as read.
    pub fn advance(&mut self, plan: &ShardPlan, stick_to_shard: bool) {
        self.read_counter += 1;
        self.step(plan, stick_to_shard);
    }

    /// Starts a new epoch.
    ///
    /// Rotates the shard when not shard-sticky, clears the read counter, and
    /// under the drop policy skips the batch that was not delivered.
    pub fn reset(&mut self, plan: &ShardPlan, policy: &BatchPolicy) {
        if !policy.stick_to_shard {
            self.shard_id = (self.shard_id + 1) % plan.shard_count();
        }
        self.read_counter = 0;
        self.epoch += 1;

        if policy.last_batch == LastBatchPolicy::Drop {
            for _ in 0..plan.batch_size() {
                self.step(plan, policy.stick_to_shard);
            }
        }
    }

    fn step(&mut self, plan: &ShardPlan, stick_to_shard: bool) {
        if stick_to_shard {
            let bounds = plan.bounds(self.shard_id);
            self.curr_index = if bounds.contains(self.curr_index) && self.curr_index + 1 < bounds.end {
                self.curr_index + 1
            } else {
                bounds.start
            };
        } else if plan.dataset_size() == 0 {
            self.curr_index = 0;
        } else {
            self.curr_index = (self.curr_index + 1) % plan.dataset_size();
        }
    }
}
