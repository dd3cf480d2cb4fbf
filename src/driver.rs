//! Two-pass driver.
//!
//! Pass 1 streams the input through the engine and collects the losing
//! ordinals; pass 2 re-reads the same input and rewrites every record
//! with its duplicate bit settled, so output order is input order.

use std::fs::File;
use std::io::{self, Write};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use log::info;
use noodles::bam;
use noodles::bgzf::io::Writer as BgzfWriter;

use crate::args::Args;
use crate::engine::{DedupEngine, EngineOptions};
use crate::io::{check_bgzf_eof, encode_record_into, set_duplicate_flag, write_header};
use crate::library::LibraryResolver;
use crate::recab::{NullRecalibrator, Recalibrator};
use crate::utils::format_elapsed;

const PROGRESS_INTERVAL: u32 = 100_000;

/// Runs both passes over `--in` and writes `--out`.
///
/// A recalibration component may be plugged in; without one the hook is
/// a pass-through.
pub fn run(args: &Args, recalibrator: Option<&mut dyn Recalibrator>) -> Result<()> {
    let mut passthrough = NullRecalibrator::default();
    let recab: &mut dyn Recalibrator = match recalibrator {
        Some(hook) => hook,
        None => &mut passthrough,
    };

    if !args.noeof {
        check_bgzf_eof(&args.input)?;
    }

    let start = Instant::now();

    // pass 1: collect duplicate ordinals
    let mut reader = bam::io::reader::Builder::default()
        .build_from_path(&args.input)
        .with_context(|| format!("failed to open {}", args.input.display()))?;
    let header = reader.read_header().context("failed to read the input header")?;
    let resolver = LibraryResolver::from_header(&header)?;

    let mut engine = DedupEngine::new(
        resolver,
        EngineOptions {
            min_qual: args.min_qual,
            one_chrom: args.one_chrom,
            exclude_flags: args.exclude_flags,
        },
    );

    let mut ordinal: u32 = 0;
    loop {
        let mut record = engine.acquire_record();
        if reader.read_record(&mut record)? == 0 {
            engine.release_record(record);
            break;
        }

        if record.flags().is_duplicate() && !args.force {
            bail!(
                "record {ordinal} already carries the duplicate flag; \
                 rerun with --force to overwrite existing marks"
            );
        }

        engine.process(record, ordinal, recab)?;
        ordinal = ordinal
            .checked_add(1)
            .context("input exceeds 2^32-1 records")?;
        if args.verbose && ordinal % PROGRESS_INTERVAL == 0 {
            info!("pass 1: {ordinal} records scanned");
        }
    }
    engine.finish(recab);

    info!(
        "pass 1: {} records, {} duplicate ordinals in {}",
        engine.counters.total,
        engine.duplicates().len(),
        format_elapsed(start.elapsed())
    );

    // pass 2: rewrite the stream with flags settled
    let write_start = Instant::now();
    let mut reader = bam::io::reader::Builder::default().build_from_path(&args.input)?;
    reader.read_header()?;

    let out = File::create(&args.output)
        .with_context(|| format!("failed to create {}", args.output.display()))?;
    let mut writer = BgzfWriter::new(out);
    write_header(&mut writer, &header)?;
    recab.write_model()?;

    let duplicates = engine.duplicates();
    let mut record = bam::Record::default();
    let mut buf = Vec::new();
    let mut index: u32 = 0;
    let mut written: u64 = 0;
    let mut removed: u64 = 0;
    while reader.read_record(&mut record)? != 0 {
        let is_duplicate = duplicates.contains(index);
        index += 1;

        if is_duplicate && args.rm_dups {
            removed += 1;
            continue;
        }

        encode_record_into(&mut buf, &header, &record)?;
        if is_duplicate {
            set_duplicate_flag(&mut buf, true);
        } else if args.force {
            set_duplicate_flag(&mut buf, false);
        }
        recab.apply(&mut buf)?;
        writer.write_all(&buf)?;
        written += 1;

        if args.verbose && index % PROGRESS_INTERVAL == 0 {
            info!("pass 2: {index} records rewritten");
        }
    }
    writer.finish()?;

    info!(
        "pass 2: {written} records written ({removed} removed) in {}",
        format_elapsed(write_start.elapsed())
    );

    write_summary(args, &engine)?;
    info!("done in {}", format_elapsed(start.elapsed()));
    Ok(())
}

fn write_summary(args: &Args, engine: &DedupEngine) -> Result<()> {
    let duplicate_count = engine.duplicates().len();
    match args.log_path() {
        Some(path) => {
            let mut file = File::create(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            engine.counters.write_summary(&mut file, duplicate_count)?;
        }
        None => {
            let stderr = io::stderr();
            engine.counters.write_summary(&mut stderr.lock(), duplicate_count)?;
        }
    }
    Ok(())
}
