//! Summary statistics over the records of an ANT file.

use std::fmt;

use crate::chromosome::TranscriptSource;
use crate::variant::{ChrRange, Variant};

pub const UNKNOWN_DATASET: &str = "unknown";

// collection id -> (dataset version, transcript source)
const DATASETS: [(i32, &str, TranscriptSource); 6] = [
    (3, "72.4", TranscriptSource::Ensembl),
    (4, "72.4", TranscriptSource::RefSeq),
    (5, "72.5", TranscriptSource::Ensembl),
    (6, "72.5", TranscriptSource::RefSeq),
    (7, "75.2", TranscriptSource::Ensembl),
    (8, "75.2", TranscriptSource::RefSeq),
];

/// Dataset version and transcript source for a known collection id.
pub fn dataset_info(collection_id: i32) -> Option<(&'static str, TranscriptSource)> {
    DATASETS.iter().find(|(id, _, _)| *id == collection_id).map(|(_, v, s)| (*v, *s))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stats {
    pub dataset_version: String,
    pub transcript_source: TranscriptSource,
    pub variant_count: u64,
    /// Observed `[min, max]` position per chromosome.
    pub ranges: Vec<ChrRange>,
}

impl Default for Stats {
    fn default() -> Self {
        Stats {
            dataset_version: String::new(),
            transcript_source: TranscriptSource::RefSeq,
            variant_count: 0,
            ranges: Vec::new(),
        }
    }
}

impl Stats {
    /// Empty statistics labelled for a collection. Unknown collections get the
    /// "unknown" label and have their transcript source guessed from the first
    /// chromosome seen.
    pub fn for_collection(collection_id: i32) -> Self {
        let (version, source) =
            dataset_info(collection_id).unwrap_or((UNKNOWN_DATASET, TranscriptSource::RefSeq));
        Stats { dataset_version: version.to_string(), transcript_source: source, ..Self::default() }
    }

    pub fn observe(&mut self, variant: &Variant) {
        self.variant_count += 1;
        self.add_span(&variant.chromosome, variant.position, variant.position);
    }

    /// Fold another accumulator's counts and spans into this one.
    pub fn merge(&mut self, other: Stats) {
        self.variant_count += other.variant_count;
        for range in other.ranges {
            self.add_span(&range.chromosome, range.start, range.stop);
        }
    }

    fn add_span(&mut self, chromosome: &str, start: i64, stop: i64) {
        if let Some(range) = self.ranges.iter_mut().find(|r| r.chromosome == chromosome) {
            range.start = range.start.min(start);
            range.stop = range.stop.max(stop);
            return;
        }
        self.ranges.push(ChrRange::new(chromosome, start, stop));
        if self.dataset_version == UNKNOWN_DATASET {
            self.transcript_source = TranscriptSource::infer(chromosome);
        }
    }

    /// Put the per-chromosome spans in canonical chromosome order; names
    /// outside the canonical lists go last, alphabetically.
    pub fn sort_ranges(&mut self) {
        self.ranges.sort_by_key(|r| {
            let rank = TranscriptSource::infer(&r.chromosome)
                .chromosomes()
                .iter()
                .position(|c| c.eq_ignore_ascii_case(&r.chromosome));
            (rank.is_none(), rank, r.chromosome.clone())
        });
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ANT stats:")?;
        writeln!(f, "\tDataset Version: {}", self.dataset_version)?;
        writeln!(f, "\tTranscriptSource: {}", self.transcript_source)?;
        writeln!(f, "\t# Annotated Variants: {}", self.variant_count)?;
        writeln!(f, "\tChr Ranges:")?;
        for range in &self.ranges {
            writeln!(f, "\t\t{range}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_collection() {
        let stats = Stats::for_collection(7);
        assert_eq!(stats.dataset_version, "75.2");
        assert_eq!(stats.transcript_source, TranscriptSource::Ensembl);
        assert_eq!(dataset_info(99), None);
    }

    #[test]
    fn test_unknown_collection_guesses_source() {
        let mut stats = Stats::for_collection(42);
        assert_eq!(stats.dataset_version, UNKNOWN_DATASET);
        stats.observe(&Variant::new("12", 5, "A", "C"));
        assert_eq!(stats.transcript_source, TranscriptSource::Ensembl);
    }

    #[test]
    fn test_known_collection_keeps_source() {
        let mut stats = Stats::for_collection(4);
        stats.observe(&Variant::new("12", 5, "A", "C"));
        assert_eq!(stats.transcript_source, TranscriptSource::RefSeq);
    }

    #[test]
    fn test_spans_and_merge() {
        let mut a = Stats::default();
        a.observe(&Variant::new("chr1", 300, "A", "C"));
        a.observe(&Variant::new("chr1", 100, "A", "C"));
        let mut b = Stats::default();
        b.observe(&Variant::new("chr1", 900, "A", "C"));
        b.observe(&Variant::new("chrM", 7, "A", "C"));
        a.merge(b);
        a.sort_ranges();
        assert_eq!(a.variant_count, 4);
        assert_eq!(a.ranges, vec![ChrRange::new("chrM", 7, 7), ChrRange::new("chr1", 100, 900)]);
        assert!(a.to_string().contains("\t\tchr1:100-900"));
    }
}
