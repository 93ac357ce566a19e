use crate::record::LogRecord;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Multi-producer ingestion buffer drained by the publish cycle.
///
/// Producers push into the current generation; [`LogBuffer::drain_and_reset`]
/// swaps in an empty generation and hands back the old one. An append that
/// races the swap lands in exactly one generation, so nothing is lost or
/// seen twice. Sorting happens once per drain, never on append.
#[derive(Debug, Default)]
pub struct LogBuffer {
    current: Mutex<Vec<LogRecord>>,
    ingested: AtomicU64,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record to the current generation. Never fails.
    pub fn ingest(&self, record: LogRecord) {
        self.generation().push(record);
        self.ingested.fetch_add(1, Ordering::Relaxed);
    }

    /// Take everything appended since the previous drain, ordered by
    /// ascending timestamp. Records with equal timestamps keep arrival order.
    pub fn drain_and_reset(&self) -> Vec<LogRecord> {
        let mut drained = std::mem::take(&mut *self.generation());
        drained.sort_by_key(|record| record.timestamp_ms);
        drained
    }

    /// Put undelivered records back so the next drain picks them up.
    pub fn requeue(&self, records: Vec<LogRecord>) {
        if records.is_empty() {
            return;
        }
        self.generation().extend(records);
    }

    /// Records currently waiting for the next drain.
    pub fn len(&self) -> usize {
        self.generation().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total records ever passed to [`LogBuffer::ingest`].
    pub fn ingested(&self) -> u64 {
        self.ingested.load(Ordering::Relaxed)
    }

    // A producer that panicked mid-push cannot leave the Vec half-written,
    // so a poisoned lock is still safe to use.
    fn generation(&self) -> MutexGuard<'_, Vec<LogRecord>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
