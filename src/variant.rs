use mlua::{Lua, MetaMethod, UserDataFields, UserDataMethods, Value};
use rustc_hash::FxHashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;

use crate::error::AntError;

/// A single variant. `id` is assigned by the ordered reader and takes no
/// part in equality or hashing.
#[derive(Debug, Clone)]
pub struct Variant {
    pub chromosome: Arc<str>,
    /// 1-based position.
    pub position: i64,
    pub reference_allele: Arc<str>,
    /// One or more alleles, comma-joined.
    pub variant_alleles: Arc<str>,
    pub id: u64,
}

impl Variant {
    pub fn new(
        chromosome: impl Into<Arc<str>>,
        position: i64,
        reference_allele: impl Into<Arc<str>>,
        variant_alleles: impl Into<Arc<str>>,
    ) -> Self {
        Variant {
            chromosome: chromosome.into(),
            position,
            reference_allele: reference_allele.into(),
            variant_alleles: variant_alleles.into(),
            id: 0,
        }
    }

    pub fn alleles(&self) -> impl Iterator<Item = &str> {
        self.variant_alleles.split(',')
    }
}

impl PartialEq for Variant {
    fn eq(&self, other: &Self) -> bool {
        self.chromosome == other.chromosome
            && self.position == other.position
            && self.reference_allele == other.reference_allele
            && self.variant_alleles == other.variant_alleles
    }
}

impl Eq for Variant {}

impl Hash for Variant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.chromosome.hash(state);
        self.position.hash(state);
        self.reference_allele.hash(state);
        self.variant_alleles.hash(state);
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} {}>{}",
            self.chromosome, self.position, self.reference_allele, self.variant_alleles
        )
    }
}

/// Annotation source groups. The on-disk index of a group comes from
/// [`AnnotationGroup::TABLE`], not from the enum discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnnotationGroup {
    Positional,
    Allelic,
    Hgmd,
    Cosmic,
    RefSeq,
    Ensembl,
    Regulatory,
    ClinVar,
}

impl AnnotationGroup {
    pub const TABLE: [AnnotationGroup; 8] = [
        AnnotationGroup::Allelic,
        AnnotationGroup::ClinVar,
        AnnotationGroup::Cosmic,
        AnnotationGroup::Ensembl,
        AnnotationGroup::Hgmd,
        AnnotationGroup::Positional,
        AnnotationGroup::RefSeq,
        AnnotationGroup::Regulatory,
    ];

    pub fn to_index(self) -> u16 {
        // the table holds every variant exactly once
        Self::TABLE.iter().position(|g| *g == self).unwrap_or_default() as u16
    }

    pub fn from_index(index: u16) -> Option<Self> {
        Self::TABLE.get(index as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            AnnotationGroup::Positional => "Positional",
            AnnotationGroup::Allelic => "Allelic",
            AnnotationGroup::Hgmd => "Hgmd",
            AnnotationGroup::Cosmic => "Cosmic",
            AnnotationGroup::RefSeq => "RefSeq",
            AnnotationGroup::Ensembl => "Ensembl",
            AnnotationGroup::Regulatory => "Regulatory",
            AnnotationGroup::ClinVar => "ClinVar",
        }
    }
}

impl fmt::Display for AnnotationGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// attribute key -> attribute value
pub type Attributes = FxHashMap<Arc<str>, Arc<str>>;
/// feature key -> attributes
pub type Features = FxHashMap<Arc<str>, Attributes>;
/// group -> features
pub type Annotation = FxHashMap<AnnotationGroup, Features>;

/// One variant and everything annotated onto it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AnnotationResult {
    pub variant: Variant,
    pub annotation: Annotation,
}

impl Default for Variant {
    fn default() -> Self {
        Variant::new("", 0, "", "")
    }
}

impl AnnotationResult {
    pub fn new(variant: Variant) -> Self {
        AnnotationResult { variant, annotation: Annotation::default() }
    }

    /// Insert a single attribute, creating the group and feature as needed.
    pub fn insert(
        &mut self,
        group: AnnotationGroup,
        feature: &str,
        key: &str,
        value: &str,
    ) -> &mut Self {
        self.annotation
            .entry(group)
            .or_default()
            .entry(Arc::from(feature))
            .or_default()
            .insert(Arc::from(key), Arc::from(value));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.annotation.is_empty()
    }

    /// Rough heap footprint, used for the reader's memory ceiling.
    pub fn estimated_size(&self) -> usize {
        const ENTRY_OVERHEAD: usize = 48;
        let v = &self.variant;
        let mut size = std::mem::size_of::<Self>()
            + v.chromosome.len()
            + v.reference_allele.len()
            + v.variant_alleles.len();
        for features in self.annotation.values() {
            size += ENTRY_OVERHEAD;
            for (feature, attributes) in features {
                size += ENTRY_OVERHEAD + feature.len();
                for (k, val) in attributes {
                    size += ENTRY_OVERHEAD + k.len() + val.len();
                }
            }
        }
        size
    }
}

/// Inclusive genomic interval on one chromosome.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChrRange {
    pub chromosome: String,
    pub start: i64,
    pub stop: i64,
}

impl ChrRange {
    pub fn new(chromosome: impl Into<String>, start: i64, stop: i64) -> Self {
        ChrRange { chromosome: chromosome.into(), start, stop }
    }

    pub fn contains(&self, variant: &Variant) -> bool {
        variant.chromosome.eq_ignore_ascii_case(&self.chromosome)
            && self.start <= variant.position
            && variant.position <= self.stop
    }
}

impl fmt::Display for ChrRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.chromosome, self.start, self.stop)
    }
}

impl FromStr for ChrRange {
    type Err = AntError;

    /// Parse `CHR:START-STOP`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AntError::InvalidArgument(format!("range '{s}' is not CHR:START-STOP"));
        let (chromosome, span) = s.rsplit_once(':').ok_or_else(invalid)?;
        let (start, stop) = span.split_once('-').ok_or_else(invalid)?;
        if chromosome.is_empty() {
            return Err(invalid());
        }
        let start: i64 = start.trim().parse().map_err(|_| invalid())?;
        let stop: i64 = stop.trim().parse().map_err(|_| invalid())?;
        if stop < start {
            return Err(AntError::InvalidArgument(format!("range '{s}' ends before it starts")));
        }
        Ok(ChrRange::new(chromosome, start, stop))
    }
}

pub fn register_variant(lua: &Lua) -> mlua::Result<()> {
    lua.register_userdata_type::<Variant>(|reg| {
        reg.add_meta_method(MetaMethod::ToString, |_, this: &Variant, ()| Ok(this.to_string()));
        reg.add_field_method_get("chrom", |_, this: &Variant| Ok(this.chromosome.to_string()));
        reg.add_field_method_get("pos", |_, this: &Variant| Ok(this.position));
        // 0-based half-open, like a BED interval
        reg.add_field_method_get("start", |_, this: &Variant| Ok(this.position - 1));
        reg.add_field_method_get("stop", |_, this: &Variant| {
            Ok(this.position - 1 + this.reference_allele.len() as i64)
        });
        reg.add_field_method_get("REF", |_, this: &Variant| {
            Ok(this.reference_allele.to_string())
        });
        reg.add_field_method_get("ALT", |lua: &Lua, this: &Variant| {
            let t = lua.create_table()?;
            for (i, allele) in this.alleles().enumerate() {
                t.raw_set(i + 1, allele)?;
            }
            Ok(Value::Table(t))
        });
    })
}
