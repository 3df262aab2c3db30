//! Error types for reading and writing ANT files.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for ANT operations.
pub type Result<T> = std::result::Result<T, AntError>;

/// Failures while decoding a single chunk.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The deflate stream could not be inflated.
    #[error("decompression failed: {0}")]
    Decompress(#[source] std::io::Error),

    /// The chunk ended before a field could be read.
    #[error("chunk truncated at byte {offset}: needed {needed} more bytes")]
    Truncated {
        /// Cursor position when the read was attempted.
        offset: usize,
        /// Bytes requested by the read.
        needed: usize,
    },

    /// A count field was negative.
    #[error("negative record count {0}")]
    NegativeCount(i32),

    /// A group index outside the fixed group table.
    #[error("unknown annotation group index {0}")]
    UnknownGroup(u16),

    /// A string was not valid UTF-8.
    #[error("invalid UTF-8 string at byte {0}")]
    InvalidUtf8(usize),

    /// A 7-bit encoded length ran past 5 bytes.
    #[error("malformed string length at byte {0}")]
    BadLength(usize),
}

/// Error type for ANT operations.
#[derive(Error, Debug)]
pub enum AntError {
    /// Underlying I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The 40 byte preamble is missing or short.
    #[error("invalid ANT header in '{path}': {reason}")]
    InvalidHeader {
        /// Path of the data file.
        path: PathBuf,
        /// Explanation of the problem.
        reason: String,
    },

    /// The magic/format-version tag is not the one this crate reads.
    #[error("unsupported ANT version '{found}' (expected '{expected}')")]
    UnsupportedVersion {
        /// Tag read from the file.
        found: String,
        /// Tag this crate understands.
        expected: String,
    },

    /// A line of the sidecar index could not be parsed.
    #[error("malformed index '{path}' line {line}: {reason}")]
    MalformedIndex {
        /// Path of the index file.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
        /// Explanation of the problem.
        reason: String,
    },

    /// The sidecar index is required but does not exist.
    #[error("index file '{0}' not found; range scans require an index")]
    MissingIndex(PathBuf),

    /// A chunk could not be read or decoded.
    #[error("corrupt chunk {chunk}: {source}")]
    CorruptChunk {
        /// Ordinal of the chunk in file order.
        chunk: u64,
        /// The decode failure.
        #[source]
        source: DecodeError,
    },

    /// Two chromosome names use different naming conventions.
    #[error(
        "chromosome format mismatch between '{lhs}' and '{rhs}'; ranges must use the same \
         chromosome format as the source .ant file"
    )]
    ChromosomeMismatch {
        /// Left operand.
        lhs: String,
        /// Right operand.
        rhs: String,
    },

    /// A chromosome name is not part of its canonical list.
    #[error("unknown chromosome '{0}'")]
    UnknownChromosome(String),

    /// Decoding a chunk panicked on every attempt, typically inside a caller
    /// predicate.
    #[error("worker panicked on chunk {chunk}: {message}")]
    WorkerPanicked {
        /// Ordinal of the chunk in file order.
        chunk: u64,
        /// Panic payload, when it was a string.
        message: String,
    },

    /// Every worker thread exited while chunks were still outstanding.
    #[error("decode workers exited before the scan completed")]
    WorkersExited,

    /// The caller passed something unusable.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl AntError {
    /// True for errors that belong to the "format" family (header and index).
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            AntError::InvalidHeader { .. }
                | AntError::UnsupportedVersion { .. }
                | AntError::MalformedIndex { .. }
        )
    }

    /// True for chromosome naming and ordering failures.
    pub fn is_chromosome_error(&self) -> bool {
        matches!(self, AntError::ChromosomeMismatch { .. } | AntError::UnknownChromosome(_))
    }
}
