//! Reader and writer for ANT, a chunked and indexed binary container of
//! per-variant annotations.
//!
//! Reading runs a producer thread, a pool of decode workers and an ordered
//! cursor; see [`AntReader`] and [`AntScan`].

pub mod chromosome;
pub mod codec;
pub mod config;
pub mod error;
pub mod expr;
pub mod header;
pub mod index;
pub mod pipeline;
mod producer;
pub mod reader;
pub mod stats;
pub mod store;
pub mod variant;
pub mod writer;

pub use chromosome::TranscriptSource;
pub use config::{CancelToken, ReaderConfig, DEFAULT_MEMORY_LIMIT_MB};
pub use error::{AntError, DecodeError, Result};
pub use expr::ExpressionFilter;
pub use header::AntHeader;
pub use index::{AntIndex, IndexEntry};
pub use pipeline::{AntScan, ScanFilter, VariantPredicate};
pub use reader::AntReader;
pub use stats::Stats;
pub use variant::{AnnotationGroup, AnnotationResult, ChrRange, Variant};
pub use writer::AntWriter;
