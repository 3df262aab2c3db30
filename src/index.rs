//! The `.idx` sidecar: one `chromosome\tposition\toffset` line per chunk, in
//! chunk order.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::{AntError, Result};

/// First record of a chunk and where the chunk starts in the data file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub chromosome: String,
    pub position: i64,
    pub offset: u64,
}

impl IndexEntry {
    pub fn new(chromosome: impl Into<String>, position: i64, offset: u64) -> Self {
        IndexEntry { chromosome: chromosome.into(), position, offset }
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        writeln!(w, "{}\t{}\t{}", self.chromosome, self.position, self.offset)
    }
}

/// Path of the index belonging to a data file.
pub fn index_path(data_path: impl AsRef<Path>) -> PathBuf {
    let mut p = data_path.as_ref().as_os_str().to_owned();
    p.push(".idx");
    PathBuf::from(p)
}

/// Chunk index of a data file, in chunk order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AntIndex {
    pub entries: Vec<IndexEntry>,
}

impl AntIndex {
    /// Read an index. A missing file yields `Ok(None)`.
    pub fn parse(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Self::parse_str(&text, path).map(Some)
    }

    /// Index for a data file, looked up at `<data_path>.idx`.
    pub fn for_data_file(data_path: impl AsRef<Path>) -> Result<Option<Self>> {
        Self::parse(index_path(data_path))
    }

    fn parse_str(text: &str, path: &Path) -> Result<Self> {
        let mut entries = Vec::new();
        for (i, line) in text.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            let malformed = |reason: String| AntError::MalformedIndex {
                path: path.to_path_buf(),
                line: i + 1,
                reason,
            };
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() != 3 {
                return Err(malformed(format!("expected 3 fields, found {}", fields.len())));
            }
            let position = fields[1]
                .parse::<i64>()
                .map_err(|e| malformed(format!("bad position '{}': {e}", fields[1])))?;
            let offset = fields[2]
                .parse::<u64>()
                .map_err(|e| malformed(format!("bad offset '{}': {e}", fields[2])))?;
            entries.push(IndexEntry::new(fields[0], position, offset));
        }
        Ok(AntIndex { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<&IndexEntry> {
        self.entries.get(i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_index_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(AntIndex::parse(dir.path().join("nope.ant.idx")).unwrap(), None);
    }

    #[test]
    fn test_parse_entries() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("a.ant");
        fs::write(index_path(&data), "chr1\t100\t40\nchr1\t500\t900\r\n\nchr2\t50\t2000").unwrap();
        let index = AntIndex::for_data_file(&data).unwrap().unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.get(1), Some(&IndexEntry::new("chr1", 500, 900)));
        assert_eq!(index.get(2), Some(&IndexEntry::new("chr2", 50, 2000)));
    }

    #[test]
    fn test_wrong_field_count() {
        let err = AntIndex::parse_str("chr1\t100\t40\nchr1\t500\n", Path::new("x.idx")).unwrap_err();
        match err {
            AntError::MalformedIndex { line, .. } => assert_eq!(line, 2),
            e => panic!("unexpected error {e}"),
        }
    }

    #[test]
    fn test_bad_number() {
        let err = AntIndex::parse_str("chr1\tabc\t40\n", Path::new("x.idx")).unwrap_err();
        assert!(err.is_format_error());
    }

    #[test]
    fn test_index_path() {
        assert_eq!(index_path("/data/hg19.ant"), PathBuf::from("/data/hg19.ant.idx"));
    }

    #[test]
    fn test_entry_line() {
        let mut buf = Vec::new();
        IndexEntry::new("X", 77, 4096).write_to(&mut buf).unwrap();
        assert_eq!(buf, b"X\t77\t4096\n");
    }
}
