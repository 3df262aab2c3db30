use std::io::{self, BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};

use anttools::{
    AnnotationGroup, AnnotationResult, AntError, AntReader, ChrRange, ExpressionFilter,
    ReaderConfig, ScanFilter,
};
use clap::{ArgGroup, Parser};
use env_logger::Env;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Query, validate and summarize ANT annotation files.
#[derive(Parser, Debug)]
#[command(version, about)]
#[command(group(ArgGroup::new("filter").args(["range", "bed", "expression"])))]
struct Args {
    /// ANT file; its index is expected at <path>.idx
    path: PathBuf,

    /// Check that every chunk decodes and exit
    #[arg(long)]
    validate: bool,

    /// Print dataset version, variant count and chromosome spans
    #[arg(long)]
    stats: bool,

    /// Only records inside CHR:START-STOP
    #[arg(short, long)]
    range: Option<ChrRange>,

    /// Only records inside the intervals of a BED file (0-based starts)
    #[arg(short, long)]
    bed: Option<PathBuf>,

    /// Lua expression(s) over `variant` and `index`; a record passes if any
    /// expression is true
    #[arg(short, long)]
    expression: Vec<String>,

    /// Also print records without annotation
    #[arg(short, long)]
    all: bool,

    /// Stop after this many records
    #[arg(short, long)]
    limit: Option<usize>,

    /// Print chrom, start, stop before each record
    #[arg(long)]
    bedout: bool,

    /// Soft ceiling in MB on decoded records held in memory
    #[arg(long, default_value_t = anttools::DEFAULT_MEMORY_LIMIT_MB)]
    memlimit: usize,

    /// Number of decode threads [default: available cores]
    #[arg(short, long)]
    threads: Option<usize>,
}

/// Read BED intervals, converting to 1-based inclusive ranges.
fn read_bed(path: &Path) -> Result<Vec<ChrRange>, Box<dyn std::error::Error>> {
    let reader = io::BufReader::new(std::fs::File::open(path)?);
    let mut ranges = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 3 {
            log::warn!("skipping BED line {}: fewer than 3 fields", i + 1);
            continue;
        }
        let start: i64 = fields[1].trim().parse()?;
        let stop: i64 = fields[2].trim().parse()?;
        ranges.push(ChrRange::new(fields[0], start + 1, stop));
    }
    Ok(ranges)
}

fn annotation_text(result: &AnnotationResult) -> String {
    let mut out = Vec::new();
    for group in AnnotationGroup::TABLE {
        let Some(features) = result.annotation.get(&group) else {
            continue;
        };
        let mut features: Vec<_> = features.iter().collect();
        features.sort_by(|a, b| a.0.cmp(b.0));
        for (feature, attributes) in features {
            let mut attributes: Vec<_> =
                attributes.iter().map(|(k, v)| format!("{k}={v}")).collect();
            attributes.sort();
            out.push(format!("{group}|{feature}|{}", attributes.join(",")));
        }
    }
    out.join(";")
}

fn write_record<W: Write>(w: &mut W, result: &AnnotationResult, bedout: bool) -> io::Result<()> {
    let v = &result.variant;
    if bedout {
        write!(w, "{}\t{}\t{}\t", v.chromosome, v.position - 1, v.position)?;
    }
    writeln!(
        w,
        "{}\t{}\t{}\t{}\t{}",
        v.chromosome,
        v.position,
        v.reference_allele,
        v.variant_alleles,
        annotation_text(result)
    )
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = ReaderConfig::default().with_memory_limit_mb(args.memlimit);
    if let Some(threads) = args.threads {
        config = config.with_threads(threads);
    }
    let reader = AntReader::open(&args.path)?.with_config(config);
    log::info!(
        "opened {} (collection {}, {} threads)",
        args.path.display(),
        reader.collection_id(),
        reader.config().threads
    );

    if args.validate {
        if !reader.validate() {
            std::process::exit(1);
        }
        return Ok(());
    }
    if args.stats {
        print!("{}", reader.stats()?);
        return Ok(());
    }

    let filter = if let Some(range) = args.range {
        ScanFilter::ranges(vec![range])
    } else if let Some(bed) = args.bed.as_deref() {
        let ranges = read_bed(bed)?;
        log::info!("read {} intervals from {}", ranges.len(), bed.display());
        ScanFilter::ranges(ranges)
    } else if !args.expression.is_empty() {
        ScanFilter::Predicate(ExpressionFilter::new(&args.expression)?.into_predicate())
    } else {
        ScanFilter::All
    };

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut written = 0usize;
    for result in reader.load(filter)? {
        let result = result?;
        if !args.all && result.is_empty() {
            continue;
        }
        if let Err(e) = write_record(&mut out, &result, args.bedout) {
            if e.kind() == io::ErrorKind::BrokenPipe {
                break;
            }
            return Err(AntError::Io(e).into());
        }
        written += 1;
        if args.limit.is_some_and(|n| written >= n) {
            break;
        }
    }
    out.flush()?;
    log::info!("wrote {written} records");
    Ok(())
}
