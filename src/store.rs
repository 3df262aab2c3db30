//! Shared store of decoded chunks, drained in chunk order.
//!
//! Workers insert each chunk's accepted records under the chunk's ordinal as
//! soon as they finish, in whatever order that happens. The cursor takes
//! ordinals back out strictly in sequence. The store tracks the estimated
//! heap size of what it holds so workers can throttle themselves.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::variant::AnnotationResult;

struct Entry {
    records: Vec<AnnotationResult>,
    bytes: u64,
}

#[derive(Default)]
pub struct ResultStore {
    inner: Mutex<FxHashMap<u64, Entry>>,
    next: AtomicU64,
    // cached: is `next` present?
    has_next: AtomicBool,
    bytes: AtomicU64,
    peak_bytes: AtomicU64,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert the records of chunk `ordinal`. Every ordinal must be inserted
    /// exactly once, even when no record was accepted.
    pub fn insert(&self, ordinal: u64, records: Vec<AnnotationResult>) {
        let bytes: u64 = records.iter().map(|r| r.estimated_size() as u64).sum();
        let mut inner = self.inner.lock();
        debug_assert!(!inner.contains_key(&ordinal), "duplicate chunk ordinal {ordinal}");
        inner.insert(ordinal, Entry { records, bytes });
        let current = self.bytes.fetch_add(bytes, Ordering::AcqRel) + bytes;
        self.peak_bytes.fetch_max(current, Ordering::AcqRel);
        if ordinal == self.next.load(Ordering::Acquire) {
            self.has_next.store(true, Ordering::Release);
        }
    }

    /// Take the next chunk in sequence if it has arrived.
    pub fn try_take_next(&self) -> Option<Vec<AnnotationResult>> {
        if !self.has_next.load(Ordering::Acquire) {
            return None;
        }
        let mut inner = self.inner.lock();
        let next = self.next.load(Ordering::Acquire);
        let entry = inner.remove(&next)?;
        self.next.store(next + 1, Ordering::Release);
        self.has_next.store(inner.contains_key(&(next + 1)), Ordering::Release);
        self.bytes.fetch_sub(entry.bytes, Ordering::AcqRel);
        Some(entry.records)
    }

    /// Whether the cursor could make progress right now.
    pub fn has_next(&self) -> bool {
        self.has_next.load(Ordering::Acquire)
    }

    /// Ordinal the cursor is waiting for.
    pub fn next_ordinal(&self) -> u64 {
        self.next.load(Ordering::Acquire)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Acquire)
    }

    pub fn peak_bytes(&self) -> u64 {
        self.peak_bytes.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
