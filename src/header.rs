use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{AntError, Result};

pub const MAGIC: &[u8; 3] = b"ANT";
pub const FORMAT_VERSION: u8 = 3;
pub const HEADER_LEN: usize = 40;
/// Byte offset of the first checksum slot (magic + version + collection id).
pub const CHECKSUM_OFFSET: u64 = 8;

/// The fixed 40 byte preamble of an ANT data file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AntHeader {
    pub collection_id: i32,
    /// Reserved integrity slots. Read but never verified.
    pub checksums: [[u8; 16]; 2],
}

/// The version tag this crate reads and writes, e.g. `ANT3`.
pub fn version_tag() -> String {
    format!("{}{}", String::from_utf8_lossy(MAGIC), FORMAT_VERSION)
}

impl AntHeader {
    pub fn new(collection_id: i32) -> Self {
        AntHeader { collection_id, checksums: [[0; 16]; 2] }
    }

    pub fn parse(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut file = File::open(path)?;
        let mut buf = Vec::with_capacity(HEADER_LEN);
        (&mut file).take(HEADER_LEN as u64).read_to_end(&mut buf)?;
        if buf.len() != HEADER_LEN {
            return Err(AntError::InvalidHeader {
                path: path.to_path_buf(),
                reason: format!("expected {HEADER_LEN} bytes, found {}", buf.len()),
            });
        }
        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&buf);
        Self::from_bytes(&header)
    }

    pub fn from_bytes(bytes: &[u8; HEADER_LEN]) -> Result<Self> {
        // the version byte is rendered as a decimal digit, not as ASCII
        let found = format!("{}{}", String::from_utf8_lossy(&bytes[..3]), bytes[3]);
        let expected = version_tag();
        if found != expected {
            return Err(AntError::UnsupportedVersion { found, expected });
        }
        let mut id = [0u8; 4];
        id.copy_from_slice(&bytes[4..8]);
        let mut checksums = [[0u8; 16]; 2];
        checksums[0].copy_from_slice(&bytes[8..24]);
        checksums[1].copy_from_slice(&bytes[24..40]);
        Ok(AntHeader { collection_id: i32::from_le_bytes(id), checksums })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..3].copy_from_slice(MAGIC);
        out[3] = FORMAT_VERSION;
        out[4..8].copy_from_slice(&self.collection_id.to_le_bytes());
        out[8..24].copy_from_slice(&self.checksums[0]);
        out[24..40].copy_from_slice(&self.checksums[1]);
        out
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_all(&self.to_bytes())
    }
}
