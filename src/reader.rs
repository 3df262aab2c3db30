use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{CancelToken, ReaderConfig};
use crate::error::Result;
use crate::header::AntHeader;
use crate::pipeline::{AntScan, ProgressFn, ScanFilter};
use crate::stats::Stats;
use crate::variant::{ChrRange, Variant};

/// Entry point for reading an ANT file.
pub struct AntReader {
    path: PathBuf,
    header: AntHeader,
    config: ReaderConfig,
    cancel: CancelToken,
    progress: Option<ProgressFn>,
}

impl AntReader {
    /// Open a data file and check its header.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let header = AntHeader::parse(&path)?;
        Ok(AntReader {
            path,
            header,
            config: ReaderConfig::default(),
            cancel: CancelToken::new(),
            progress: None,
        })
    }

    pub fn with_config(mut self, config: ReaderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: impl Fn(f64) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(progress));
        self
    }

    pub fn collection_id(&self) -> i32 {
        self.header.collection_id
    }

    pub fn header(&self) -> &AntHeader {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Start a scan with the given filter.
    pub fn load(&self, filter: ScanFilter) -> Result<AntScan> {
        log::debug!("scanning {} with {:?}", self.path.display(), filter);
        AntScan::start(
            self.path.clone(),
            filter,
            &self.config,
            self.cancel.clone(),
            self.progress.clone(),
        )
    }

    pub fn load_all(&self) -> Result<AntScan> {
        self.load(ScanFilter::All)
    }

    /// Records inside any of `ranges`, which must be sorted in the file's
    /// chromosome order.
    pub fn load_ranges(&self, ranges: Vec<ChrRange>) -> Result<AntScan> {
        self.load(ScanFilter::ranges(ranges))
    }

    /// Records accepted by `predicate`, which receives the global record
    /// index and the variant.
    pub fn load_with(
        &self,
        predicate: impl Fn(u64, &Variant) -> bool + Send + Sync + 'static,
    ) -> Result<AntScan> {
        self.load(ScanFilter::predicate(predicate))
    }

    /// Whether every chunk decodes. Failures are logged, not returned.
    pub fn validate(&self) -> bool {
        match self.load(ScanFilter::Validate).and_then(AntScan::drain) {
            Ok(_) => {
                log::info!("{} is valid", self.path.display());
                true
            }
            Err(e) => {
                log::warn!("{} is invalid: {e}", self.path.display());
                false
            }
        }
    }

    /// Count variants and collect per-chromosome position spans.
    pub fn stats(&self) -> Result<Stats> {
        let stats = Arc::new(Mutex::new(Stats::for_collection(self.collection_id())));
        self.load(ScanFilter::Stats(stats.clone()))?.drain()?;
        let mut stats = stats.lock().clone();
        stats.sort_ranges();
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chromosome::TranscriptSource;
    use crate::codec::tests::sample_record;
    use crate::codec::RECORDS_PER_CHUNK;
    use crate::error::AntError;
    use crate::index::index_path;
    use crate::variant::AnnotationResult;
    use crate::writer::AntWriter;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    fn config() -> ReaderConfig {
        ReaderConfig::default().with_threads(3).with_poll_interval(Duration::from_millis(1))
    }

    /// chunk 0: chr1 100..=109, chunk 1: chr1 500..=509 then chr2 10..=14,
    /// chunk 2: chr2 50..=59, chunk 3: chr2 900..=909
    fn layout() -> Vec<Vec<AnnotationResult>> {
        let run = |chrom: &str, start: i64, n: i64| -> Vec<AnnotationResult> {
            (0..n).map(|i| sample_record(chrom, start + i, 2)).collect()
        };
        let mut boundary = run("chr1", 500, 10);
        boundary.extend(run("chr2", 10, 5));
        vec![run("chr1", 100, 10), boundary, run("chr2", 50, 10), run("chr2", 900, 10)]
    }

    fn write_file(dir: &Path, chunks: &[Vec<AnnotationResult>], collection_id: i32) -> PathBuf {
        let path = dir.join("test.ant");
        let mut writer = AntWriter::create(&path, collection_id).unwrap();
        for chunk in chunks {
            writer.write_chunk(chunk).unwrap();
        }
        writer.finish().unwrap();
        path
    }

    fn positions(scan: AntScan) -> Vec<(String, i64)> {
        scan.map(|r| r.unwrap())
            .map(|r| (r.variant.chromosome.to_string(), r.variant.position))
            .collect()
    }

    #[test]
    fn test_load_all_in_file_order() {
        let dir = tempfile::tempdir().unwrap();
        let chunks = layout();
        let path = write_file(dir.path(), &chunks, 4);
        let reader = AntReader::open(&path).unwrap().with_config(config());
        assert_eq!(reader.collection_id(), 4);

        let records: Vec<_> = reader.load_all().unwrap().map(|r| r.unwrap()).collect();
        let expected: Vec<_> = chunks.into_iter().flatten().collect();
        assert_eq!(records, expected);
        let ids: Vec<u64> = records.iter().map(|r| r.variant.id).collect();
        assert_eq!(ids, (0..expected.len() as u64).collect::<Vec<_>>());
    }

    #[test]
    fn test_ids_dense_under_many_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let chunks: Vec<Vec<_>> = (0..40)
            .map(|c| (0..25).map(|i| sample_record("chr3", c * 1000 + i, 1)).collect())
            .collect();
        let path = write_file(dir.path(), &chunks, 4);
        let reader = AntReader::open(&path).unwrap().with_config(config().with_threads(8));
        let scan = reader.load_with(|i, _| i % 2 == 0).unwrap();
        let records: Vec<_> = scan.map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 40 * 13);
        for (n, record) in records.iter().enumerate() {
            assert_eq!(record.variant.id, n as u64);
        }
        assert!(records.windows(2).all(|w| w[0].variant.position < w[1].variant.position));
    }

    #[test]
    fn test_range_scan() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), &layout(), 4);
        let reader = AntReader::open(&path).unwrap().with_config(config());

        let got = positions(reader.load_ranges(vec![ChrRange::new("chr1", 105, 502)]).unwrap());
        let expected: Vec<_> = (105..=109).chain(500..=502).map(|p| ("chr1".to_string(), p)).collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_range_scan_finds_records_in_boundary_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), &layout(), 4);
        let reader = AntReader::open(&path).unwrap().with_config(config());

        let ranges = vec![ChrRange::new("chr2", 12, 13), ChrRange::new("chr2", 905, 2000)];
        let got = positions(reader.load_ranges(ranges).unwrap());
        let expected: Vec<_> = [12, 13, 905, 906, 907, 908, 909]
            .into_iter()
            .map(|p| ("chr2".to_string(), p))
            .collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_empty_ranges_mean_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), &layout(), 4);
        let reader = AntReader::open(&path).unwrap().with_config(config());
        assert_eq!(reader.load_ranges(Vec::new()).unwrap().drain().unwrap(), 45);
    }

    #[test]
    fn test_predicate_sees_global_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), &layout(), 4);
        let reader = AntReader::open(&path).unwrap().with_config(config());
        let scan = reader.load_with(|i, _| i == 2 * RECORDS_PER_CHUNK + 3).unwrap();
        assert_eq!(positions(scan), vec![("chr2".to_string(), 53)]);
    }

    #[test]
    fn test_missing_index() {
        let dir = tempfile::tempdir().unwrap();
        let chunks = layout();
        let path = write_file(dir.path(), &chunks, 4);
        std::fs::remove_file(index_path(&path)).unwrap();
        let reader = AntReader::open(&path).unwrap().with_config(config());

        let mut scan = reader.load_ranges(vec![ChrRange::new("chr1", 1, 10)]).unwrap();
        assert!(matches!(scan.next(), Some(Err(AntError::MissingIndex(_)))));
        assert!(scan.next().is_none());

        // a full scan does not need the index
        let all: Vec<_> = reader.load_all().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(all, chunks.into_iter().flatten().collect::<Vec<_>>());
    }

    #[test]
    fn test_mismatched_range_naming() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), &layout(), 4);
        let reader = AntReader::open(&path).unwrap().with_config(config());
        let err = reader.load_ranges(vec![ChrRange::new("1", 1, 10)]).unwrap().drain().unwrap_err();
        assert!(err.is_chromosome_error());
    }

    fn corrupt_chunk(path: &Path, chunk: usize) {
        let index = crate::index::AntIndex::for_data_file(path).unwrap().unwrap();
        let mut bytes = std::fs::read(path).unwrap();
        let off = index.entries[chunk].offset as usize + 4;
        bytes[off..off + 8].fill(0xff);
        std::fs::write(path, bytes).unwrap();
    }

    #[test]
    fn test_corrupt_chunk_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), &layout(), 4);
        corrupt_chunk(&path, 2);
        let reader = AntReader::open(&path).unwrap().with_config(config());
        let results: Vec<_> = reader.load_all().unwrap().collect();
        let err = results.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert!(matches!(err, AntError::CorruptChunk { chunk: 2, .. }));
        assert!(results.last().unwrap().is_err());
        // nothing from the corrupt chunk or after it leaks out
        let leaked = results
            .iter()
            .filter_map(|r| r.as_ref().ok())
            .any(|r| r.variant.chromosome.as_ref() == "chr2" && r.variant.position >= 50);
        assert!(!leaked);
    }

    #[test]
    fn test_validate() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), &layout(), 4);
        let reader = AntReader::open(&path).unwrap().with_config(config());
        assert!(reader.validate());
        corrupt_chunk(&path, 1);
        assert!(!reader.validate());
    }

    #[test]
    fn test_truncated_file_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), &layout(), 4);
        let len = std::fs::metadata(&path).unwrap().len();
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 10).unwrap();
        let reader = AntReader::open(&path).unwrap().with_config(config());
        assert!(!reader.validate());
    }

    #[test]
    fn test_stats() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), &layout(), 6);
        let reader = AntReader::open(&path).unwrap().with_config(config());
        let stats = reader.stats().unwrap();
        assert_eq!(stats.dataset_version, "72.5");
        assert_eq!(stats.transcript_source, TranscriptSource::RefSeq);
        assert_eq!(stats.variant_count, 45);
        assert_eq!(
            stats.ranges,
            vec![ChrRange::new("chr1", 100, 509), ChrRange::new("chr2", 10, 909)]
        );
    }

    #[test]
    fn test_stats_unknown_collection() {
        let dir = tempfile::tempdir().unwrap();
        let chunks = vec![vec![sample_record("1", 5, 1), sample_record("2", 9, 1)]];
        let path = write_file(dir.path(), &chunks, 1234);
        let stats = AntReader::open(&path).unwrap().with_config(config()).stats().unwrap();
        assert_eq!(stats.dataset_version, "unknown");
        assert_eq!(stats.transcript_source, TranscriptSource::Ensembl);
    }

    #[test]
    fn test_cancellation_stops_quietly() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), &layout(), 4);
        let token = CancelToken::new();
        let reader =
            AntReader::open(&path).unwrap().with_config(config()).with_cancel_token(token.clone());

        let mut scan = reader.load_all().unwrap();
        assert!(scan.next().unwrap().is_ok());
        token.cancel();
        // buffered records of the current chunk are dropped too
        assert!(scan.next().is_none());
        assert!(scan.next().is_none());

        let scan = reader.load_all().unwrap();
        assert_eq!(scan.count(), 0);
    }

    #[test]
    fn test_panicking_predicate_fails_the_scan() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), &layout(), 4);
        let reader = AntReader::open(&path).unwrap().with_config(config());

        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let mut scan = reader.load_with(|_, _| panic!("bad predicate")).unwrap();
            let first = scan.next();
            let rest = scan.count();
            tx.send((first, rest)).unwrap();
        });
        let (first, rest) = rx.recv_timeout(Duration::from_secs(10)).expect("scan hung");
        match first {
            Some(Err(AntError::WorkerPanicked { message, .. })) => {
                assert!(message.contains("bad predicate"))
            }
            other => panic!("expected a worker panic, got {other:?}"),
        }
        assert_eq!(rest, 0);
    }

    #[test]
    fn test_range_scan_ignores_name_case() {
        let dir = tempfile::tempdir().unwrap();
        let chunks = vec![(0..5).map(|i| sample_record("chrX", 100 + i, 1)).collect::<Vec<_>>()];
        let path = write_file(dir.path(), &chunks, 4);
        let reader = AntReader::open(&path).unwrap().with_config(config());
        for name in ["chrX", "chrx"] {
            let scan = reader.load_ranges(vec![ChrRange::new(name, 100, 104)]).unwrap();
            assert_eq!(scan.drain().unwrap(), 5, "range on {name}");
        }
    }

    #[test]
    fn test_range_scan_over_file_without_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), &[], 4);
        assert!(index_path(&path).exists());
        let reader = AntReader::open(&path).unwrap().with_config(config());
        let scan = reader.load_ranges(vec![ChrRange::new("chr1", 1, 10)]).unwrap();
        assert_eq!(scan.drain().unwrap(), 0);
        assert_eq!(reader.load_all().unwrap().drain().unwrap(), 0);
    }

    #[test]
    fn test_progress_reaches_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), &layout(), 4);
        let last = Arc::new(AtomicU64::new(0));
        let seen = last.clone();
        let reader = AntReader::open(&path)
            .unwrap()
            .with_config(config())
            .with_progress(move |f| {
                assert!((0.0..=1.0).contains(&f));
                seen.fetch_max((f * 1000.0) as u64, Ordering::Relaxed);
            });
        reader.load_all().unwrap().drain().unwrap();
        assert_eq!(last.load(Ordering::Relaxed), 1000);
    }

    #[test]
    fn test_backpressure_bounds_decoded_memory() {
        let dir = tempfile::tempdir().unwrap();
        let chunks: Vec<Vec<_>> = (0..30)
            .map(|c| (0..200).map(|i| sample_record("chr4", c * 10_000 + i, 10)).collect())
            .collect();
        let chunk_bytes: u64 = chunks
            .iter()
            .map(|c| c.iter().map(|r| r.estimated_size() as u64).sum::<u64>())
            .max()
            .unwrap();
        let total_bytes = chunk_bytes * chunks.len() as u64;
        let limit = 1u64 << 20;
        assert!(total_bytes > 4 * limit);

        let path = write_file(dir.path(), &chunks, 4);
        let threads = 2;
        let reader = AntReader::open(&path)
            .unwrap()
            .with_config(config().with_threads(threads).with_memory_limit_mb(1));
        let mut scan = reader.load_all().unwrap();

        // nobody drains the cursor for a while
        std::thread::sleep(Duration::from_millis(500));
        assert!(scan.stalls() > 0);
        assert!(scan.pending_chunks() > 0);
        let bound = limit + (threads as u64 + 1) * chunk_bytes;
        assert!(scan.buffered_bytes() <= bound);

        let mut n = 0u64;
        for record in scan.by_ref() {
            assert_eq!(record.unwrap().variant.id, n);
            n += 1;
        }
        assert_eq!(n, 30 * 200);
        assert!(scan.peak_buffered_bytes() <= bound);
    }

    #[test]
    fn test_conflicting_filters() {
        let predicate: crate::pipeline::VariantPredicate = Arc::new(|_, _| true);
        let err = ScanFilter::from_options(Some(vec![ChrRange::new("chr1", 1, 2)]), Some(predicate))
            .unwrap_err();
        assert!(matches!(err, AntError::InvalidArgument(_)));
        assert!(matches!(ScanFilter::from_options(Some(Vec::new()), None), Ok(ScanFilter::All)));
    }
}
