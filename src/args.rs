// Command-line argument parsing
use std::path::PathBuf;

use clap::Parser;

use crate::score::DEFAULT_MIN_QUAL;

#[derive(Parser, Debug)]
#[command(
    name = "deduprs",
    about = "Mark PCR/optical duplicates in a coordinate-sorted BAM file"
)]
pub struct Args {
    /// Coordinate-sorted BAM input file [path]
    #[arg(long = "in", value_name = "PATH")]
    pub input: PathBuf,

    /// BAM output file [path]
    #[arg(long = "out", value_name = "PATH")]
    pub output: PathBuf,

    /// Minimum base quality counted in the duplicate score [integer]
    #[arg(long = "minQual", value_name = "INT", default_value_t = DEFAULT_MIN_QUAL)]
    pub min_qual: u8,

    /// Summary destination (default: <out>.log, stderr when <out> starts with '-')
    #[arg(long, value_name = "PATH")]
    pub log: Option<PathBuf>,

    /// Treat pairs whose mates map to different references as single-ended
    #[arg(long = "oneChrom")]
    pub one_chrom: bool,

    /// Remove duplicates instead of flagging them
    #[arg(long = "rmDups")]
    pub rm_dups: bool,

    /// Accept pre-existing duplicate flags and clear them on non-duplicates
    #[arg(long)]
    pub force: bool,

    /// Log progress every 100000 records
    #[arg(long)]
    pub verbose: bool,

    /// Skip the BGZF EOF-block check on the input
    #[arg(long)]
    pub noeof: bool,

    /// Echo the parsed parameters at startup
    #[arg(long)]
    pub params: bool,

    /// Run the base-quality recalibration pass over the output
    #[arg(long)]
    pub recab: bool,

    /// Records matching this flag mask are never duplicate candidates [hex or decimal]
    #[arg(
        long = "excludeFlags",
        value_name = "MASK",
        default_value = "0xB00",
        value_parser = parse_flag_mask
    )]
    pub exclude_flags: u16,
}

fn parse_flag_mask(s: &str) -> Result<u16, String> {
    let (digits, radix) = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => (hex, 16),
        None => (s, 10),
    };
    u16::from_str_radix(digits, radix).map_err(|e| format!("invalid flag mask {s:?}: {e}"))
}

impl Args {
    /// Where the run summary goes; `None` means stderr.
    pub fn log_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.log {
            return Some(path.clone());
        }
        let output = self.output.to_string_lossy();
        if output.starts_with('-') {
            None
        } else {
            Some(PathBuf::from(format!("{output}.log")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DEFAULT_EXCLUDE_FLAGS;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults() {
        let args = parse(&["deduprs", "--in", "a.bam", "--out", "b.bam"]);
        assert_eq!(args.min_qual, DEFAULT_MIN_QUAL);
        assert_eq!(args.exclude_flags, DEFAULT_EXCLUDE_FLAGS);
        assert!(!args.rm_dups);
        assert!(!args.force);
        assert!(!args.one_chrom);
    }

    #[test]
    fn input_and_output_are_required() {
        assert!(Args::try_parse_from(["deduprs", "--in", "a.bam"]).is_err());
        assert!(Args::try_parse_from(["deduprs", "--out", "b.bam"]).is_err());
    }

    #[test]
    fn exclude_flags_accepts_hex_and_decimal() {
        let args = parse(&[
            "deduprs", "--in", "a.bam", "--out", "b.bam", "--excludeFlags", "0x100",
        ]);
        assert_eq!(args.exclude_flags, 0x100);
        let args = parse(&[
            "deduprs", "--in", "a.bam", "--out", "b.bam", "--excludeFlags", "256",
        ]);
        assert_eq!(args.exclude_flags, 256);
    }

    #[test]
    fn log_defaults_next_to_the_output() {
        let args = parse(&["deduprs", "--in", "a.bam", "--out", "b.bam"]);
        assert_eq!(args.log_path(), Some(PathBuf::from("b.bam.log")));
    }

    #[test]
    fn dash_output_logs_to_stderr() {
        let args = parse(&["deduprs", "--in", "a.bam", "--out", "-"]);
        assert_eq!(args.log_path(), None);
    }

    #[test]
    fn explicit_log_path_wins() {
        let args = parse(&[
            "deduprs", "--in", "a.bam", "--out", "b.bam", "--log", "run.log",
        ]);
        assert_eq!(args.log_path(), Some(PathBuf::from("run.log")));
    }
}
