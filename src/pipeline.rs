//! Producer / worker pool / ordered cursor.
//!
//! One producer thread streams raw chunks into a lock-free queue, a fixed
//! pool of workers decodes them in parallel into the shared [`ResultStore`],
//! and the caller's thread drains the store in chunk order through
//! [`AntScan`]. Nothing blocks: idle threads sleep for the configured poll
//! interval and try again.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_queue::SegQueue;
use parking_lot::Mutex;

use crate::codec::{decode_chunk, decode_chunk_with, RECORDS_PER_CHUNK};
use crate::config::{CancelToken, ReaderConfig};
use crate::error::{AntError, DecodeError, Result};
use crate::producer;
use crate::stats::Stats;
use crate::store::ResultStore;
use crate::variant::{AnnotationResult, ChrRange, Variant};

/// Attempts per chunk before a decode failure aborts the scan.
pub const MAX_DECODE_ATTEMPTS: usize = 4;

/// Caller predicate: `(global record index, variant) -> keep?`.
pub type VariantPredicate = Arc<dyn Fn(u64, &Variant) -> bool + Send + Sync>;

/// Progress callback, called with the fraction of chunks decoded.
pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;

/// How records are selected during a scan.
#[derive(Clone)]
pub enum ScanFilter {
    /// Every record.
    All,
    /// Records inside any of these ranges (sorted in file chromosome order).
    Ranges(Vec<ChrRange>),
    /// Records the predicate accepts.
    Predicate(VariantPredicate),
    /// Decode structurally, keep nothing.
    Validate,
    /// Fold every variant into the shared stats, keep nothing.
    Stats(Arc<Mutex<Stats>>),
}

impl ScanFilter {
    /// Range filter; an empty list means every record.
    pub fn ranges(ranges: Vec<ChrRange>) -> Self {
        if ranges.is_empty() {
            ScanFilter::All
        } else {
            ScanFilter::Ranges(ranges)
        }
    }

    pub fn predicate(f: impl Fn(u64, &Variant) -> bool + Send + Sync + 'static) -> Self {
        ScanFilter::Predicate(Arc::new(f))
    }

    /// Build a filter from optional ranges and an optional predicate. The two
    /// modes cannot be combined.
    pub fn from_options(
        ranges: Option<Vec<ChrRange>>,
        predicate: Option<VariantPredicate>,
    ) -> Result<Self> {
        match (ranges, predicate) {
            (Some(_), Some(_)) => Err(AntError::InvalidArgument(
                "range filtering and predicate filtering are mutually exclusive".to_string(),
            )),
            (Some(ranges), None) => Ok(Self::ranges(ranges)),
            (None, Some(p)) => Ok(ScanFilter::Predicate(p)),
            (None, None) => Ok(ScanFilter::All),
        }
    }

    fn ranges_slice(&self) -> &[ChrRange] {
        match self {
            ScanFilter::Ranges(r) => r,
            _ => &[],
        }
    }
}

impl std::fmt::Debug for ScanFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanFilter::All => write!(f, "All"),
            ScanFilter::Ranges(r) => f.debug_tuple("Ranges").field(r).finish(),
            ScanFilter::Predicate(_) => write!(f, "Predicate"),
            ScanFilter::Validate => write!(f, "Validate"),
            ScanFilter::Stats(_) => write!(f, "Stats"),
        }
    }
}

/// Raw chunk bytes handed from the producer to exactly one worker.
pub(crate) struct WorkChunk {
    /// Dense sequence number among produced chunks; the store key.
    pub ordinal: u64,
    /// Position of the chunk in the file.
    pub file_chunk: u64,
    pub data: Vec<u8>,
    /// Ranges that may hold records of this chunk.
    pub ranges: Vec<ChrRange>,
}

/// State shared by the producer, the workers and the cursor.
pub(crate) struct Shared {
    pub pending: SegQueue<WorkChunk>,
    pub store: ResultStore,
    pub producing: AtomicBool,
    pub produced: AtomicU64,
    pub finished: AtomicU64,
    /// Number of index entries, when known.
    pub total_hint: AtomicU64,
    pub stalls: AtomicU64,
    stop: AtomicBool,
    cancel: CancelToken,
    failure: Mutex<Option<AntError>>,
    memory_limit: u64,
    poll: Duration,
}

impl Shared {
    fn new(config: &ReaderConfig, cancel: CancelToken) -> Self {
        Shared {
            pending: SegQueue::new(),
            store: ResultStore::new(),
            producing: AtomicBool::new(true),
            produced: AtomicU64::new(0),
            finished: AtomicU64::new(0),
            total_hint: AtomicU64::new(0),
            stalls: AtomicU64::new(0),
            stop: AtomicBool::new(false),
            cancel,
            failure: Mutex::new(None),
            memory_limit: config.memory_limit_bytes(),
            poll: config.poll_interval,
        }
    }

    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Acquire) || self.cancel.is_cancelled()
    }

    /// Record a fatal error (the first one wins) and stop every thread.
    fn fail(&self, err: AntError) {
        let mut failure = self.failure.lock();
        if failure.is_none() {
            log::error!("scan aborted: {err}");
            *failure = Some(err);
        }
        self.stop.store(true, Ordering::Release);
    }

    fn take_failure(&self) -> Option<AntError> {
        self.failure.lock().take()
    }

    fn is_done(&self) -> bool {
        !self.producing.load(Ordering::Acquire)
            && self.store.next_ordinal() == self.produced.load(Ordering::Acquire)
    }

    // Stall while over the memory ceiling, unless the cursor is starved: the
    // chunk it waits for is in flight or at the head of the queue, and
    // refusing it would deadlock.
    fn throttled(&self) -> bool {
        self.store.bytes() > self.memory_limit && self.store.has_next()
    }

    fn progress(&self) -> f64 {
        let finished = self.finished.load(Ordering::Acquire) as f64;
        let produced = self.produced.load(Ordering::Acquire);
        let total = if self.producing.load(Ordering::Acquire) {
            produced.max(self.total_hint.load(Ordering::Acquire))
        } else {
            produced
        };
        if total == 0 {
            return 0.0;
        }
        (finished / total as f64).clamp(0.0, 1.0)
    }
}

fn decode(chunk: &WorkChunk, filter: &ScanFilter) -> std::result::Result<Vec<AnnotationResult>, DecodeError> {
    let base = chunk.file_chunk * RECORDS_PER_CHUNK;
    match filter {
        ScanFilter::All => decode_chunk(&chunk.data),
        ScanFilter::Ranges(_) => {
            decode_chunk_with(&chunk.data, |_, v| chunk.ranges.iter().any(|r| r.contains(v)))
        }
        ScanFilter::Predicate(p) => decode_chunk_with(&chunk.data, |i, v| p(base + i as u64, v)),
        ScanFilter::Validate => decode_chunk_with(&chunk.data, |_, _| false),
        ScanFilter::Stats(stats) => {
            // accumulate locally so a retried chunk is never counted twice
            let mut local = Stats::default();
            let records = decode_chunk_with(&chunk.data, |_, v| {
                local.observe(v);
                false
            })?;
            stats.lock().merge(local);
            Ok(records)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// A panic (usually from a caller predicate) counts as a failed attempt.
fn decode_with_retry(chunk: &WorkChunk, filter: &ScanFilter) -> Result<Vec<AnnotationResult>> {
    let mut attempt = 1;
    loop {
        let err = match panic::catch_unwind(AssertUnwindSafe(|| decode(chunk, filter))) {
            Ok(Ok(records)) => return Ok(records),
            Ok(Err(source)) => AntError::CorruptChunk { chunk: chunk.file_chunk, source },
            Err(payload) => AntError::WorkerPanicked {
                chunk: chunk.file_chunk,
                message: panic_message(payload.as_ref()),
            },
        };
        if attempt >= MAX_DECODE_ATTEMPTS {
            return Err(err);
        }
        log::warn!(
            "chunk {} failed to decode (attempt {attempt}/{MAX_DECODE_ATTEMPTS}): {err}",
            chunk.file_chunk
        );
        attempt += 1;
    }
}

fn run_worker(shared: &Shared, filter: &ScanFilter, progress: Option<&ProgressFn>) {
    loop {
        if shared.should_stop() {
            return;
        }
        if shared.throttled() {
            shared.stalls.fetch_add(1, Ordering::Relaxed);
            thread::sleep(shared.poll);
            continue;
        }
        let Some(chunk) = shared.pending.pop() else {
            if !shared.producing.load(Ordering::Acquire) && shared.pending.is_empty() {
                if let Some(progress) = progress {
                    // the other workers may still be decoding the tail
                    while !shared.should_stop()
                        && shared.finished.load(Ordering::Acquire)
                            < shared.produced.load(Ordering::Acquire)
                    {
                        thread::sleep(shared.poll);
                    }
                    progress(shared.progress());
                }
                return;
            }
            thread::sleep(shared.poll);
            continue;
        };
        match decode_with_retry(&chunk, filter) {
            Ok(records) => {
                let WorkChunk { ordinal, data, .. } = chunk;
                drop(data);
                shared.finished.fetch_add(1, Ordering::AcqRel);
                shared.store.insert(ordinal, records);
                if let Some(progress) = progress {
                    progress(shared.progress());
                }
            }
            Err(e) => {
                shared.fail(e);
                return;
            }
        }
    }
}

/// Ordered iterator over the records selected by a scan.
///
/// Records come out in file order with `variant.id` numbered 0, 1, 2, ...
/// A fatal error is yielded once, after which the iterator ends. Dropping the
/// iterator stops and joins the background threads.
pub struct AntScan {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
    current: std::vec::IntoIter<AnnotationResult>,
    next_id: u64,
    done: bool,
}

impl AntScan {
    pub(crate) fn start(
        path: PathBuf,
        filter: ScanFilter,
        config: &ReaderConfig,
        cancel: CancelToken,
        progress: Option<ProgressFn>,
    ) -> Result<Self> {
        let shared = Arc::new(Shared::new(config, cancel));
        let filter = Arc::new(filter);
        let mut threads = Vec::with_capacity(config.threads + 1);

        let producer_shared = shared.clone();
        let producer_filter = filter.clone();
        let spawned = thread::Builder::new().name("ant-producer".to_string()).spawn(move || {
            let shared = producer_shared;
            log::debug!("producer started for {}", path.display());
            if let Err(e) = producer::produce(&path, producer_filter.ranges_slice(), &shared) {
                shared.fail(e);
            }
            shared.producing.store(false, Ordering::Release);
        });
        match spawned {
            Ok(handle) => threads.push(handle),
            Err(e) => {
                shared.producing.store(false, Ordering::Release);
                return Err(e.into());
            }
        }

        let mut scan =
            AntScan { shared, threads, current: Vec::new().into_iter(), next_id: 0, done: false };
        for n in 0..config.threads {
            let shared = scan.shared.clone();
            let filter = filter.clone();
            // only the first worker reports progress, and it reports last
            let progress = if n == 0 { progress.clone() } else { None };
            let handle = thread::Builder::new()
                .name(format!("ant-worker-{}", n + 1))
                .spawn(move || run_worker(&shared, &filter, progress.as_ref()))?;
            scan.threads.push(handle);
        }
        Ok(scan)
    }

    /// Chunks queued but not yet picked up by a worker.
    pub fn pending_chunks(&self) -> usize {
        self.shared.pending.len()
    }

    /// Estimated bytes of decoded records waiting for the cursor.
    pub fn buffered_bytes(&self) -> u64 {
        self.shared.store.bytes()
    }

    /// High-water mark of [`AntScan::buffered_bytes`].
    pub fn peak_buffered_bytes(&self) -> u64 {
        self.shared.store.peak_bytes()
    }

    /// Number of times a worker backed off because of the memory ceiling.
    pub fn stalls(&self) -> u64 {
        self.shared.stalls.load(Ordering::Relaxed)
    }

    /// Consume the scan, keeping only the first error.
    pub fn drain(self) -> Result<u64> {
        let mut n = 0;
        for record in self {
            record?;
            n += 1;
        }
        Ok(n)
    }

    // Workers only exit on their own once every produced chunk is stored, so
    // all of them gone while the cursor still waits means one was lost.
    fn workers_gone(&self) -> bool {
        self.threads.len() > 1
            && self.threads[1..].iter().all(|h| h.is_finished())
            && !self.shared.is_done()
            && !self.shared.store.has_next()
            && !self.shared.cancel.is_cancelled()
    }

    fn finish(&mut self) {
        self.done = true;
        self.shared.stop.store(true, Ordering::Release);
        for handle in self.threads.drain(..) {
            let name = handle.thread().name().unwrap_or("ant thread").to_string();
            if handle.join().is_err() {
                log::error!("{name} panicked");
            }
        }
    }
}

impl Iterator for AntScan {
    type Item = Result<AnnotationResult>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if self.shared.cancel.is_cancelled() {
                log::info!("scan cancelled after {} records", self.next_id);
                self.finish();
                return None;
            }
            if let Some(mut record) = self.current.next() {
                record.variant.id = self.next_id;
                self.next_id += 1;
                return Some(Ok(record));
            }
            if let Some(err) = self.shared.take_failure() {
                self.finish();
                return Some(Err(err));
            }
            if let Some(records) = self.shared.store.try_take_next() {
                self.current = records.into_iter();
                continue;
            }
            if self.shared.is_done() {
                // the producer may have failed between the checks above
                let failure = self.shared.take_failure();
                self.finish();
                return failure.map(Err);
            }
            if self.workers_gone() {
                // a worker died without recording why; its chunk will never arrive
                let err = self.shared.take_failure().unwrap_or(AntError::WorkersExited);
                self.finish();
                return Some(Err(err));
            }
            thread::sleep(self.shared.poll);
        }
    }
}

impl Drop for AntScan {
    fn drop(&mut self) {
        if !self.threads.is_empty() {
            self.finish();
        }
    }
}
