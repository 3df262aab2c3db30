//! Binary chunk codec.
//!
//! A chunk is a raw-deflate compressed byte stream:
//!
//! ```text
//! i32                 record count
//! per record:
//!   str               chromosome
//!   i64               position
//!   str               reference allele
//!   str               variant allele(s)
//!   u16               group count
//!   per group:
//!     u16             group index (AnnotationGroup::TABLE)
//!     u16             feature count
//!     per feature:
//!       str           feature key
//!       u16           attribute count
//!       str, str      attribute key, value
//! ```
//!
//! Integers are little-endian. A `str` is a 7-bit varint byte length followed
//! by UTF-8 bytes. On disk each chunk is framed as `[i32 length][bytes]` by the
//! writer.

use std::io::{self, Read, Write};
use std::sync::Arc;

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use rustc_hash::FxHashMap;

use crate::error::DecodeError;
use crate::variant::{Annotation, AnnotationGroup, AnnotationResult, Attributes, Features, Variant};

/// Spacing between chunk ordinals in the global record index handed to
/// predicates: `chunk * RECORDS_PER_CHUNK + position_in_chunk`.
pub const RECORDS_PER_CHUNK: u64 = 5000;

type DecodeResult<T> = std::result::Result<T, DecodeError>;

fn write_str<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    let mut len = s.len() as u32;
    while len >= 0x80 {
        w.write_all(&[(len as u8) | 0x80])?;
        len >>= 7;
    }
    w.write_all(&[len as u8])?;
    w.write_all(s.as_bytes())
}

fn write_u16<W: Write>(w: &mut W, n: usize) -> io::Result<()> {
    let n = u16::try_from(n).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, format!("count {n} does not fit in 16 bits"))
    })?;
    w.write_all(&n.to_le_bytes())
}

fn write_count<W: Write>(w: &mut W, n: usize) -> io::Result<()> {
    let n = i32::try_from(n).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, format!("record count {n} too large"))
    })?;
    w.write_all(&n.to_le_bytes())
}

fn write_variant<W: Write>(w: &mut W, v: &Variant) -> io::Result<()> {
    write_str(w, &v.chromosome)?;
    w.write_all(&v.position.to_le_bytes())?;
    write_str(w, &v.reference_allele)?;
    write_str(w, &v.variant_alleles)
}

fn write_annotation<W: Write>(w: &mut W, annotation: &Annotation) -> io::Result<()> {
    write_u16(w, annotation.len())?;
    for (group, features) in annotation {
        w.write_all(&group.to_index().to_le_bytes())?;
        write_u16(w, features.len())?;
        for (feature, attributes) in features {
            write_str(w, feature)?;
            write_u16(w, attributes.len())?;
            for (k, v) in attributes {
                write_str(w, k)?;
                write_str(w, v)?;
            }
        }
    }
    Ok(())
}

/// Encode and compress a batch of records into one chunk body.
pub fn encode_chunk(records: &[AnnotationResult]) -> io::Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    write_count(&mut encoder, records.len())?;
    for record in records {
        write_variant(&mut encoder, &record.variant)?;
        write_annotation(&mut encoder, &record.annotation)?;
    }
    encoder.finish()
}

/// Encode and compress bare variants (no annotation payload).
pub fn encode_variants(variants: &[Variant]) -> io::Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    write_count(&mut encoder, variants.len())?;
    for v in variants {
        write_variant(&mut encoder, v)?;
    }
    encoder.finish()
}

fn inflate(data: &[u8]) -> DecodeResult<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() * 4);
    DeflateDecoder::new(data).read_to_end(&mut out).map_err(DecodeError::Decompress)?;
    Ok(out)
}

/// Hands out shared copies of repeated strings within one chunk.
#[derive(Default)]
struct Interner<'a> {
    strings: FxHashMap<&'a str, Arc<str>>,
}

impl<'a> Interner<'a> {
    fn intern(&mut self, s: &'a str) -> Arc<str> {
        self.strings.entry(s).or_insert_with(|| Arc::from(s)).clone()
    }
}

struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        ByteCursor { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> DecodeResult<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.data.len()).ok_or(
            DecodeError::Truncated { offset: self.pos, needed: n },
        )?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> DecodeResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn read_u16(&mut self) -> DecodeResult<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    fn read_count(&mut self) -> DecodeResult<usize> {
        let n = i32::from_le_bytes(self.read_array()?);
        usize::try_from(n).map_err(|_| DecodeError::NegativeCount(n))
    }

    fn read_i64(&mut self) -> DecodeResult<i64> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    fn read_len(&mut self) -> DecodeResult<usize> {
        let start = self.pos;
        let mut len = 0usize;
        for shift in (0..35).step_by(7) {
            let byte = self.take(1)?[0];
            len |= ((byte & 0x7f) as usize) << shift;
            if byte & 0x80 == 0 {
                return Ok(len);
            }
        }
        Err(DecodeError::BadLength(start))
    }

    fn read_str(&mut self) -> DecodeResult<&'a str> {
        let len = self.read_len()?;
        let start = self.pos;
        std::str::from_utf8(self.take(len)?).map_err(|_| DecodeError::InvalidUtf8(start))
    }

    fn skip_str(&mut self) -> DecodeResult<()> {
        let len = self.read_len()?;
        self.take(len).map(|_| ())
    }
}

fn read_variant<'a>(
    cur: &mut ByteCursor<'a>,
    interner: &mut Interner<'a>,
) -> DecodeResult<Variant> {
    let chromosome = interner.intern(cur.read_str()?);
    let position = cur.read_i64()?;
    let reference_allele = interner.intern(cur.read_str()?);
    let variant_alleles = interner.intern(cur.read_str()?);
    Ok(Variant { chromosome, position, reference_allele, variant_alleles, id: 0 })
}

fn read_annotation<'a>(
    cur: &mut ByteCursor<'a>,
    interner: &mut Interner<'a>,
) -> DecodeResult<Annotation> {
    let groups = cur.read_u16()?;
    let mut annotation = Annotation::default();
    for _ in 0..groups {
        let index = cur.read_u16()?;
        let group = AnnotationGroup::from_index(index).ok_or(DecodeError::UnknownGroup(index))?;
        let n_features = cur.read_u16()?;
        let mut features = Features::default();
        features.reserve(n_features as usize);
        for _ in 0..n_features {
            let feature = interner.intern(cur.read_str()?);
            let n_attributes = cur.read_u16()?;
            let mut attributes = Attributes::default();
            attributes.reserve(n_attributes as usize);
            for _ in 0..n_attributes {
                let k = interner.intern(cur.read_str()?);
                let v = interner.intern(cur.read_str()?);
                attributes.insert(k, v);
            }
            features.insert(feature, attributes);
        }
        annotation.insert(group, features);
    }
    Ok(annotation)
}

// Walks past an annotation payload without building anything.
fn skip_annotation(cur: &mut ByteCursor<'_>) -> DecodeResult<()> {
    let groups = cur.read_u16()?;
    for _ in 0..groups {
        let index = cur.read_u16()?;
        if AnnotationGroup::from_index(index).is_none() {
            return Err(DecodeError::UnknownGroup(index));
        }
        let n_features = cur.read_u16()?;
        for _ in 0..n_features {
            cur.skip_str()?;
            let n_attributes = cur.read_u16()?;
            for _ in 0..n_attributes {
                cur.skip_str()?;
                cur.skip_str()?;
            }
        }
    }
    Ok(())
}

/// Decode every record of a chunk.
pub fn decode_chunk(data: &[u8]) -> Result<Vec<AnnotationResult>, DecodeError> {
    decode_chunk_with(data, |_, _| true)
}

/// Decode a chunk, materializing only records the predicate accepts.
///
/// The predicate sees the record's position within the chunk and its fully
/// parsed variant. Rejected records are skipped byte for byte so later
/// records still decode.
pub fn decode_chunk_with<F>(data: &[u8], mut predicate: F) -> Result<Vec<AnnotationResult>, DecodeError>
where
    F: FnMut(usize, &Variant) -> bool,
{
    let inflated = inflate(data)?;
    let mut cur = ByteCursor::new(&inflated);
    let mut interner = Interner::default();
    let count = cur.read_count()?;
    let mut records = Vec::with_capacity(count.min(RECORDS_PER_CHUNK as usize));
    for i in 0..count {
        let variant = read_variant(&mut cur, &mut interner)?;
        if !predicate(i, &variant) {
            skip_annotation(&mut cur)?;
            continue;
        }
        let annotation = read_annotation(&mut cur, &mut interner)?;
        records.push(AnnotationResult { variant, annotation });
    }
    Ok(records)
}

/// Decode a variant-only chunk produced by [`encode_variants`].
pub fn decode_variants(data: &[u8]) -> Result<Vec<Variant>, DecodeError> {
    let inflated = inflate(data)?;
    let mut cur = ByteCursor::new(&inflated);
    let mut interner = Interner::default();
    let count = cur.read_count()?;
    let mut variants = Vec::with_capacity(count.min(RECORDS_PER_CHUNK as usize));
    for _ in 0..count {
        variants.push(read_variant(&mut cur, &mut interner)?);
    }
    Ok(variants)
}
