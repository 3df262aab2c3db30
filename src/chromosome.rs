//! Canonical chromosome ordering for the two naming conventions ANT files use.
//!
//! RefSeq style names carry a `chr` prefix and put the mitochondrion first,
//! Ensembl style names are bare and put it last. Comparisons are by position
//! in the canonical list, so `chr2 < chr10`.

use std::cmp::Ordering;
use std::fmt;

use crate::error::{AntError, Result};

const REFSEQ_CHROMOSOMES: [&str; 25] = [
    "chrM", "chr1", "chr2", "chr3", "chr4", "chr5", "chr6", "chr7", "chr8", "chr9", "chr10",
    "chr11", "chr12", "chr13", "chr14", "chr15", "chr16", "chr17", "chr18", "chr19", "chr20",
    "chr21", "chr22", "chrX", "chrY",
];

const ENSEMBL_CHROMOSOMES: [&str; 25] = [
    "1", "2", "3", "4", "5", "6", "7", "8", "9", "10", "11", "12", "13", "14", "15", "16", "17",
    "18", "19", "20", "21", "22", "X", "Y", "MT",
];

/// Chromosome naming / annotation provenance convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TranscriptSource {
    RefSeq,
    Ensembl,
}

impl TranscriptSource {
    /// Infer the convention from a chromosome name.
    pub fn infer(chromosome: &str) -> Self {
        if chromosome.starts_with("chr") {
            TranscriptSource::RefSeq
        } else {
            TranscriptSource::Ensembl
        }
    }

    /// The canonical chromosome list for this convention.
    pub fn chromosomes(self) -> &'static [&'static str] {
        match self {
            TranscriptSource::RefSeq => &REFSEQ_CHROMOSOMES,
            TranscriptSource::Ensembl => &ENSEMBL_CHROMOSOMES,
        }
    }
}

impl fmt::Display for TranscriptSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscriptSource::RefSeq => write!(f, "RefSeq"),
            TranscriptSource::Ensembl => write!(f, "Ensembl"),
        }
    }
}

fn rank(source: TranscriptSource, chromosome: &str) -> Result<usize> {
    source
        .chromosomes()
        .iter()
        .position(|c| c.eq_ignore_ascii_case(chromosome))
        .ok_or_else(|| AntError::UnknownChromosome(chromosome.to_string()))
}

/// Total order of two chromosome names.
///
/// Fails when the names use different conventions or either is not in its
/// canonical list.
pub fn compare(lhs: &str, rhs: &str) -> Result<Ordering> {
    let source = TranscriptSource::infer(lhs);
    if source != TranscriptSource::infer(rhs) {
        return Err(AntError::ChromosomeMismatch { lhs: lhs.to_string(), rhs: rhs.to_string() });
    }
    Ok(rank(source, lhs)?.cmp(&rank(source, rhs)?))
}

pub fn is_less_than(lhs: &str, rhs: &str) -> Result<bool> {
    Ok(compare(lhs, rhs)? == Ordering::Less)
}

pub fn is_greater_than(lhs: &str, rhs: &str) -> Result<bool> {
    Ok(compare(lhs, rhs)? == Ordering::Greater)
}

/// Order two genomic loci: chromosome first, then position.
pub fn compare_locus(lhs: (&str, i64), rhs: (&str, i64)) -> Result<Ordering> {
    Ok(compare(lhs.0, rhs.0)?.then(lhs.1.cmp(&rhs.1)))
}
