// ingest-core/src/dataset/bucket.rs

//! Aspect-ratio aware shuffling.
//!
//! Records are ordered by a scalar key, split at a threshold into a "low"
//! and a "high" group, and shuffled within each group. The shard is then
//! cut into batch-sized chunks whose order is shuffled, so batches stay
//! homogeneous in the key while both sample order and batch order vary from
//! epoch to epoch.

use rand::seq::SliceRandom;
use rand::Rng;

/// Two-phase shuffle over batch-sized chunks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketedShuffle {
    threshold: f32,
    batch_size: usize,
}

impl BucketedShuffle {
    pub fn new(threshold: f32, batch_size: usize) -> Self {
        Self {
            threshold,
            batch_size: batch_size.max(1),
        }
    }

    /// Rearranges `slots` in place.
    ///
    /// `slots` holds record indices and `key_of` maps an index to its
    /// grouping key. The key order is re-derived from `key_of` on every call,
    /// so the result never depends on a previous arrangement of `slots`.
    pub fn apply<R, F>(&self, slots: &mut [usize], key_of: F, rng: &mut R)
    where
        R: Rng + ?Sized,
        F: Fn(usize) -> f32,
    {
        if slots.len() < 2 {
            return;
        }

        // Ties break on the index so the sort is fully determined
        slots.sort_by(|&a, &b| key_of(a).total_cmp(&key_of(b)).then(a.cmp(&b)));

        let mid = slots.partition_point(|&idx| key_of(idx) <= self.threshold);
        let (low, high) = slots.split_at_mut(mid);
        low.shuffle(rng);
        high.shuffle(rng);

        let mut chunks: Vec<Vec<usize>> = slots.chunks(self.batch_size).map(<[usize]>::to_vec).collect();
        chunks.shuffle(rng);

        for (slot, idx) in slots.iter_mut().zip(chunks.into_iter().flatten()) {
            *slot = idx;
        }
    }
}
