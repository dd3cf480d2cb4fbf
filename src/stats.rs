//! Run counters and the end-of-run summary.

use std::io::{self, Write};

use noodles::sam::alignment::record::Flags;

#[derive(Debug, Default)]
pub struct DedupCounters {
    pub total: u64,
    pub paired: u64,
    pub proper_pair: u64,
    pub unmapped: u64,
    pub reverse: u64,
    pub qc_fail: u64,
    pub excluded: u64,
    pub missing_mate_same_ref: u64,
    pub missing_mate_cross_ref: u64,
    pub single_duplicates: u64,
    pub paired_duplicates: u64,
    pub fragments_at_exit: usize,
    pub pending_mates_at_exit: usize,
    pub pairs_at_exit: usize,
}

impl DedupCounters {
    pub fn observe_flags(&mut self, flags: Flags) {
        self.total += 1;
        if flags.is_segmented() {
            self.paired += 1;
        }
        if flags.is_properly_segmented() {
            self.proper_pair += 1;
        }
        if flags.is_reverse_complemented() {
            self.reverse += 1;
        }
        if flags.is_qc_fail() {
            self.qc_fail += 1;
        }
    }

    pub fn missing_mates(&self) -> u64 {
        self.missing_mate_same_ref + self.missing_mate_cross_ref
    }

    /// Writes the human-readable run summary to the `--log` destination.
    pub fn write_summary<W: Write>(&self, w: &mut W, duplicate_count: u64) -> io::Result<()> {
        writeln!(w, "deduprs summary")?;
        writeln!(w, "  total records:             {}", self.total)?;
        writeln!(w, "  paired:                    {}", self.paired)?;
        writeln!(w, "  properly paired:           {}", self.proper_pair)?;
        writeln!(w, "  unmapped:                  {}", self.unmapped)?;
        writeln!(w, "  reverse strand:            {}", self.reverse)?;
        writeln!(w, "  QC failed:                 {}", self.qc_fail)?;
        writeln!(w, "  excluded by flags:         {}", self.excluded)?;
        writeln!(
            w,
            "  missing mates (same ref):  {}",
            self.missing_mate_same_ref
        )?;
        writeln!(
            w,
            "  missing mates (cross ref): {}",
            self.missing_mate_cross_ref
        )?;
        writeln!(w, "  single-end duplicates:     {}", self.single_duplicates)?;
        writeln!(w, "  paired-end duplicates:     {}", self.paired_duplicates)?;
        writeln!(w, "  duplicate ordinals:        {duplicate_count}")?;
        writeln!(w, "  fragment table at exit:    {}", self.fragments_at_exit)?;
        writeln!(
            w,
            "  pending mates at exit:     {}",
            self.pending_mates_at_exit
        )?;
        writeln!(w, "  paired table at exit:      {}", self.pairs_at_exit)?;
        Ok(())
    }
}
