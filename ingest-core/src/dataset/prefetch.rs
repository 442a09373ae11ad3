// ingest-core/src/dataset/prefetch.rs

//! Prefetching wrapper for reducing I/O stalls during training.
//!
//! This module moves a [`Reader`] onto a background thread that opens and
//! reads records ahead of the consumer into a bounded queue, so the training
//! loop does not wait on storage for every sample.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::queue::ArrayQueue;
use tracing::{debug, warn};

use super::reader::Reader;
use super::source::RecordSource;
use crate::config::PrefetchConfig;
use crate::error::{IngestError, Result};

const POLL_INTERVAL: Duration = Duration::from_micros(100);

/// One fully read record.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub id: String,
    pub data: Vec<u8>,
    pub label: Option<f32>,
}

/// Result type for prefetched items.
type PrefetchItem = Result<Sample>;

/// Reads the next deliverable sample of the current epoch.
///
/// Zero-size and unreadable records are skipped. Returns `None` at the end
/// of the epoch, and an error if a whole pass yields nothing readable.
fn read_next<S: RecordSource>(reader: &mut Reader<S>) -> Option<PrefetchItem> {
    let mut skipped = 0usize;

    loop {
        if reader.epoch_finished() {
            return None;
        }
        if skipped > reader.dataset_size().max(1) {
            return Some(Err(IngestError::dataset(
                reader.source().name(),
                "no readable record in a full pass over the shard",
            )));
        }

        let size = match reader.try_open() {
            Ok(size) => size,
            Err(e) if e.is_record_recoverable() => {
                warn!(record = reader.last_id().unwrap_or(""), error = %e, "skipping unreadable record");
                skipped += 1;
                continue;
            }
            Err(e) => return Some(Err(e)),
        };
        if size == 0 {
            debug!(record = reader.last_id().unwrap_or(""), "skipping empty record");
            skipped += 1;
            continue;
        }

        let mut data = vec![0u8; size];
        match reader.try_read(&mut data) {
            Ok(n) => data.truncate(n),
            Err(e) => {
                warn!(record = reader.last_id().unwrap_or(""), error = %e, "skipping record that failed to read");
                reader.close();
                skipped += 1;
                continue;
            }
        }

        let sample = Sample {
            id: reader.last_id().unwrap_or_default().to_string(),
            data,
            label: reader.last_label(),
        };
        reader.close();
        return Some(Ok(sample));
    }
}

/// A reader whose records are loaded by a background thread.
///
/// The thread runs until the epoch ends (never, in loop mode) or until
/// [`stop`](Self::stop) is called. With prefetching disabled, samples are
/// read inline from the same reader.
pub struct PrefetchingReader<S: RecordSource> {
    /// Queue for receiving prefetched samples.
    queue: Arc<ArrayQueue<PrefetchItem>>,
    /// Flag to signal the prefetch thread to stop.
    stop_flag: Arc<AtomicBool>,
    /// Handle to the prefetch thread; it hands the reader back on exit.
    prefetch_thread: Option<JoinHandle<Reader<S>>>,
    /// Reader used inline, or recovered from the stopped thread.
    reader: Option<Reader<S>>,
    enabled: bool,
    exhausted: bool,
}

impl<S> PrefetchingReader<S>
where
    S: RecordSource + 'static,
    S::Record: 'static,
{
    /// Starts prefetching from `reader`.
    pub fn new(reader: Reader<S>, config: &PrefetchConfig) -> Self {
        if !config.enabled || config.depth == 0 {
            return Self {
                queue: Arc::new(ArrayQueue::new(1)),
                stop_flag: Arc::new(AtomicBool::new(false)),
                prefetch_thread: None,
                reader: Some(reader),
                enabled: false,
                exhausted: false,
            };
        }

        let queue = Arc::new(ArrayQueue::new(config.depth));
        let stop_flag = Arc::new(AtomicBool::new(false));

        let queue_clone = queue.clone();
        let stop_flag_clone = stop_flag.clone();

        let prefetch_thread = thread::spawn(move || {
            let mut reader = reader;

            while !stop_flag_clone.load(Ordering::Relaxed) {
                let Some(item) = read_next(&mut reader) else {
                    break;
                };
                let failed = item.is_err();

                // Block until there is room, unless asked to stop
                let mut pending = item;
                loop {
                    if stop_flag_clone.load(Ordering::Relaxed) {
                        return reader;
                    }
                    match queue_clone.push(pending) {
                        Ok(()) => break,
                        Err(back) => {
                            pending = back;
                            thread::sleep(POLL_INTERVAL);
                        }
                    }
                }

                if failed {
                    break;
                }
            }
            reader
        });

        Self {
            queue,
            stop_flag,
            prefetch_thread: Some(prefetch_thread),
            reader: None,
            enabled: true,
            exhausted: false,
        }
    }

    /// Gets the next sample, or `None` once the epoch is over.
    ///
    /// Waits for the background thread as long as it is running.
    pub fn next_sample(&mut self) -> Result<Option<Sample>> {
        if self.exhausted {
            return Ok(None);
        }

        if !self.enabled {
            let item = match self.reader.as_mut() {
                Some(reader) => read_next(reader),
                None => None,
            };
            return self.finish_item(item);
        }

        loop {
            if let Some(item) = self.queue.pop() {
                return self.finish_item(Some(item));
            }

            let finished = self
                .prefetch_thread
                .as_ref()
                .map_or(true, JoinHandle::is_finished);
            if finished {
                // The last push may have landed after the pop above
                let item = self.queue.pop();
                return self.finish_item(item);
            }

            thread::sleep(POLL_INTERVAL);
        }
    }

    fn finish_item(&mut self, item: Option<PrefetchItem>) -> Result<Option<Sample>> {
        match item {
            Some(Ok(sample)) => Ok(Some(sample)),
            Some(Err(e)) => {
                self.exhausted = true;
                Err(e)
            }
            None => {
                self.exhausted = true;
                Ok(None)
            }
        }
    }

    /// Stops prefetching and returns the reader, for example to reset it
    /// and start the next epoch.
    ///
    /// Samples still queued are discarded. Returns `None` if the prefetch
    /// thread panicked.
    pub fn into_reader(mut self) -> Option<Reader<S>> {
        self.stop();
        self.reader.take()
    }
}

impl<S: RecordSource> PrefetchingReader<S> {
    /// Stops the prefetch thread and waits for it to exit.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);

        if let Some(thread) = self.prefetch_thread.take() {
            match thread.join() {
                Ok(reader) => self.reader = Some(reader),
                Err(_) => warn!("prefetch thread panicked"),
            }
        }
    }

    /// Returns true if prefetching is enabled.
    pub fn is_prefetching_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the number of samples currently in the prefetch queue.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }
}

impl<S> Iterator for PrefetchingReader<S>
where
    S: RecordSource + 'static,
    S::Record: 'static,
{
    type Item = Result<Sample>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_sample().transpose()
    }
}

impl<S: RecordSource> Drop for PrefetchingReader<S> {
    fn drop(&mut self) {
        self.stop();
    }
}
