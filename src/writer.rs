use std::fs::{self, File};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::codec;
use crate::error::{AntError, Result};
use crate::header::{AntHeader, CHECKSUM_OFFSET, HEADER_LEN};
use crate::index::{index_path, IndexEntry};
use crate::variant::AnnotationResult;

/// Writes an ANT data file and its `.idx` sidecar, one chunk per call to
/// [`AntWriter::write_chunk`].
pub struct AntWriter {
    path: PathBuf,
    data: BufWriter<File>,
    index: BufWriter<File>,
    offset: u64,
    chunks: usize,
}

impl AntWriter {
    pub fn create(path: impl AsRef<Path>, collection_id: i32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let mut data = BufWriter::new(File::create(&path)?);
        let index = BufWriter::new(File::create(index_path(&path))?);
        AntHeader::new(collection_id).write_to(&mut data)?;
        Ok(AntWriter { path, data, index, offset: HEADER_LEN as u64, chunks: 0 })
    }

    /// Append one chunk and its index line. An empty batch is rejected.
    pub fn write_chunk(&mut self, records: &[AnnotationResult]) -> Result<()> {
        let first = records.first().ok_or_else(|| {
            AntError::InvalidArgument("cannot write an empty annotation chunk".to_string())
        })?;
        IndexEntry::new(&*first.variant.chromosome, first.variant.position, self.offset)
            .write_to(&mut self.index)?;

        let body = codec::encode_chunk(records)?;
        let len = i32::try_from(body.len()).map_err(|_| {
            AntError::InvalidArgument(format!("chunk of {} bytes is too large", body.len()))
        })?;
        self.data.write_all(&len.to_le_bytes())?;
        self.data.write_all(&body)?;
        self.offset += 4 + body.len() as u64;
        self.chunks += 1;
        Ok(())
    }

    /// Overwrite the two reserved checksum slots without moving the write
    /// position.
    pub fn update_checksums(&mut self, first: &[u8; 16], second: &[u8; 16]) -> Result<()> {
        let position = self.data.stream_position()?;
        self.data.seek(SeekFrom::Start(CHECKSUM_OFFSET))?;
        self.data.write_all(first)?;
        self.data.write_all(second)?;
        self.data.seek(SeekFrom::Start(position))?;
        Ok(())
    }

    pub fn chunks_written(&self) -> usize {
        self.chunks
    }

    /// Flush both files.
    pub fn finish(mut self) -> Result<()> {
        self.data.flush()?;
        self.index.flush()?;
        log::debug!("wrote {} chunks ({} bytes) to {}", self.chunks, self.offset, self.path.display());
        Ok(())
    }
}
