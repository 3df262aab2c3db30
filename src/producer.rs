//! Sequential chunk producer.
//!
//! The producer walks the index in file order, decides which chunks can hold
//! records inside the requested ranges and pushes their raw bytes onto the
//! work queue. A chunk spans from its own index entry to the next entry
//! (inclusive, since records at the boundary position can sit on either
//! side); the last chunk runs to the end of the file.

use std::cmp::Ordering;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::Ordering as AtomicOrdering;

use crate::chromosome::compare_locus;
use crate::error::{AntError, DecodeError, Result};
use crate::header::HEADER_LEN;
use crate::index::{index_path, AntIndex, IndexEntry};
use crate::pipeline::{Shared, WorkChunk};
use crate::variant::ChrRange;

const READ_BUFFER: usize = 1 << 20;

/// What to do with one index entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Read the chunk; these ranges may hold records inside it.
    Read(Vec<ChrRange>),
    Skip,
    /// No later chunk can intersect any remaining range.
    Finished,
}

/// Decides, entry by entry, which chunks a range scan has to read.
#[derive(Debug)]
pub struct ChunkSelector<'a> {
    ranges: &'a [ChrRange],
    cursor: usize,
}

impl<'a> ChunkSelector<'a> {
    /// `ranges` must be sorted by start in the file's chromosome order.
    pub fn new(ranges: &'a [ChrRange]) -> Result<Self> {
        for pair in ranges.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if compare_locus((&a.chromosome, a.start), (&b.chromosome, b.start))? == Ordering::Greater
            {
                return Err(AntError::InvalidArgument(format!(
                    "ranges must be sorted in chromosome order: {a} comes before {b}"
                )));
            }
        }
        Ok(ChunkSelector { ranges, cursor: 0 })
    }

    pub fn select(&mut self, current: &IndexEntry, next: Option<&IndexEntry>) -> Result<Selection> {
        if self.ranges.is_empty() {
            return Ok(Selection::Read(Vec::new()));
        }
        let start = (current.chromosome.as_str(), current.position);
        // chunk starts only move forward, so a range ending before this one
        // is done for good
        while let Some(r) = self.ranges.get(self.cursor) {
            if compare_locus((&r.chromosome, r.stop), start)? != Ordering::Less {
                break;
            }
            self.cursor += 1;
        }
        if self.cursor == self.ranges.len() {
            return Ok(Selection::Finished);
        }

        let mut hits = Vec::new();
        for r in &self.ranges[self.cursor..] {
            if let Some(end) = next {
                let end = (end.chromosome.as_str(), end.position);
                if compare_locus((&r.chromosome, r.start), end)? == Ordering::Greater {
                    break;
                }
            }
            if compare_locus((&r.chromosome, r.stop), start)? != Ordering::Less {
                hits.push(r.clone());
            }
        }
        Ok(if hits.is_empty() { Selection::Skip } else { Selection::Read(hits) })
    }
}

#[cfg(target_os = "linux")]
fn advise_sequential(file: &File) {
    use std::os::unix::io::AsRawFd;
    // SAFETY: the descriptor belongs to `file`, which outlives the call.
    let rc = unsafe { libc::posix_fadvise(file.as_raw_fd(), 0, 0, libc::POSIX_FADV_SEQUENTIAL) };
    if rc != 0 {
        log::debug!("posix_fadvise failed with {rc}");
    }
}

#[cfg(not(target_os = "linux"))]
fn advise_sequential(_file: &File) {}

struct ChunkReader {
    reader: BufReader<File>,
    position: u64,
}

impl ChunkReader {
    fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        advise_sequential(&file);
        let mut reader = BufReader::with_capacity(READ_BUFFER, file);
        reader.seek(SeekFrom::Start(HEADER_LEN as u64))?;
        Ok(ChunkReader { reader, position: HEADER_LEN as u64 })
    }

    fn seek_to(&mut self, offset: u64) -> io::Result<()> {
        if offset == self.position {
            return Ok(());
        }
        if offset > self.position {
            self.reader.seek_relative((offset - self.position) as i64)?;
        } else {
            self.reader.seek(SeekFrom::Start(offset))?;
        }
        self.position = offset;
        Ok(())
    }

    /// Read one `[i32 length][bytes]` frame. `None` at a clean end of file.
    fn read_chunk(&mut self, chunk: u64) -> Result<Option<Vec<u8>>> {
        let corrupt = |source| AntError::CorruptChunk { chunk, source };
        let mut len = [0u8; 4];
        let mut filled = 0;
        while filled < len.len() {
            match self.reader.read(&mut len[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        if filled == 0 {
            return Ok(None);
        }
        if filled < len.len() {
            return Err(corrupt(DecodeError::Truncated { offset: filled, needed: len.len() - filled }));
        }
        let n = i32::from_le_bytes(len);
        let n = usize::try_from(n).map_err(|_| corrupt(DecodeError::NegativeCount(n)))?;
        let mut data = vec![0u8; n];
        self.reader.read_exact(&mut data).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => corrupt(DecodeError::Truncated { offset: 0, needed: n }),
            _ => AntError::Io(e),
        })?;
        self.position += 4 + n as u64;
        Ok(Some(data))
    }
}

fn enqueue(shared: &Shared, file_chunk: u64, data: Vec<u8>, ranges: Vec<ChrRange>) {
    let ordinal = shared.produced.load(AtomicOrdering::Acquire);
    shared.pending.push(WorkChunk { ordinal, file_chunk, data, ranges });
    shared.produced.store(ordinal + 1, AtomicOrdering::Release);
}

fn read_sequentially(reader: &mut ChunkReader, shared: &Shared) -> Result<()> {
    let mut file_chunk = 0;
    while !shared.should_stop() {
        let Some(data) = reader.read_chunk(file_chunk)? else {
            break;
        };
        enqueue(shared, file_chunk, data, Vec::new());
        file_chunk += 1;
    }
    Ok(())
}

/// Stream the selected chunks of `path` into the work queue.
pub(crate) fn produce(path: &Path, ranges: &[ChrRange], shared: &Shared) -> Result<()> {
    let index = AntIndex::for_data_file(path)?;
    let mut reader = ChunkReader::open(path)?;

    // an empty index is a file without chunks, not a missing one
    let index = match index {
        Some(index) if !ranges.is_empty() || !index.is_empty() => index,
        None if !ranges.is_empty() => return Err(AntError::MissingIndex(index_path(path))),
        _ => {
            log::debug!("no usable index for {}, reading every chunk", path.display());
            return read_sequentially(&mut reader, shared);
        }
    };

    shared.total_hint.store(index.len() as u64, AtomicOrdering::Release);
    let mut selector = ChunkSelector::new(ranges)?;
    let mut skipped = 0usize;
    for (i, current) in index.entries.iter().enumerate() {
        if shared.should_stop() {
            log::info!("producer stopping early at chunk {i}");
            return Ok(());
        }
        let chunk_ranges = match selector.select(current, index.get(i + 1))? {
            Selection::Read(r) => r,
            Selection::Skip => {
                skipped += 1;
                continue;
            }
            Selection::Finished => {
                skipped += index.len() - i;
                break;
            }
        };
        reader.seek_to(current.offset)?;
        let Some(data) = reader.read_chunk(i as u64)? else {
            return Err(AntError::CorruptChunk {
                chunk: i as u64,
                source: DecodeError::Truncated { offset: 0, needed: 4 },
            });
        };
        enqueue(shared, i as u64, data, chunk_ranges);
    }
    log::debug!(
        "producer finished: {} chunks queued, {skipped} skipped",
        shared.produced.load(AtomicOrdering::Acquire)
    );
    Ok(())
}
