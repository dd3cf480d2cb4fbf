//! Fingerprint keys for duplicate detection.
//!
//! Two reads are duplicate candidates when they share a library, a
//! reference sequence, an orientation, and the 5' coordinate their
//! fragment would have had before any soft-clipping. For forward reads
//! that is the alignment start minus the leading soft-clip run; for
//! reverse reads it is the alignment end plus the trailing soft-clip run.

use std::cmp::Ordering;
use std::io;

use noodles::bam;
use noodles::sam::alignment::record::cigar::op::Kind;

/// Strand the fragment end was sequenced from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Orientation {
    Forward,
    Reverse,
}

/// Identity of a read's 5' fragment end.
///
/// Equality means "same physical fragment end". The total order puts
/// `(reference_id, anchor_pos)` first so the in-flight tables can be
/// split at a sweep bound; the unmapped sentinel `reference_id = -1`
/// compares as unsigned and therefore sorts after every real reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FingerprintKey {
    pub library_id: u8,
    pub reference_id: i32,
    pub orientation: Orientation,
    pub anchor_pos: i32,
}

impl Ord for FingerprintKey {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.reference_id as u32)
            .cmp(&(other.reference_id as u32))
            .then_with(|| self.anchor_pos.cmp(&other.anchor_pos))
            .then_with(|| self.orientation.cmp(&other.orientation))
            .then_with(|| self.library_id.cmp(&other.library_id))
    }
}

impl PartialOrd for FingerprintKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FingerprintKey {
    /// Builds the key for a mapped record. `position` is the 0-based
    /// leftmost alignment coordinate.
    pub fn from_alignment(
        record: &bam::Record,
        library_id: u8,
        reference_id: i32,
        position: i32,
    ) -> io::Result<Self> {
        let (orientation, anchor_pos) = if record.flags().is_reverse_complemented() {
            (Orientation::Reverse, unclipped_end(record, position)?)
        } else {
            (Orientation::Forward, unclipped_start(record, position)?)
        };

        Ok(Self {
            library_id,
            reference_id,
            orientation,
            anchor_pos,
        })
    }

    /// Sweep bound for the current scan coordinate: every key strictly
    /// below it can no longer collide with future input.
    pub fn horizon(reference_id: i32, position: i32) -> Self {
        Self {
            library_id: 0,
            reference_id,
            orientation: Orientation::Forward,
            anchor_pos: position,
        }
    }

    /// Sorts after every key of a mapped read; used to flush at EOF.
    pub fn empty() -> Self {
        Self {
            library_id: 0,
            reference_id: -1,
            orientation: Orientation::Forward,
            anchor_pos: i32::MIN,
        }
    }

    /// Sorts before every key; the neutral low side of a pair bound.
    fn min() -> Self {
        Self {
            library_id: 0,
            reference_id: 0,
            orientation: Orientation::Forward,
            anchor_pos: i32::MIN,
        }
    }
}

/// Identity of a fragment sequenced from both ends.
///
/// `first` is the key of the mate seen earlier in the stream, `second`
/// the later one. The order compares `second` first: a pair may only be
/// retired once the scan has passed its later anchor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PairedKey {
    pub first: FingerprintKey,
    pub second: FingerprintKey,
}

impl PairedKey {
    pub fn new(first: FingerprintKey, second: FingerprintKey) -> Self {
        Self { first, second }
    }

    /// Sweep bound: pairs whose later anchor is below `bound` are stale.
    pub fn horizon(bound: FingerprintKey) -> Self {
        Self {
            first: FingerprintKey::min(),
            second: bound,
        }
    }
}

impl Ord for PairedKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.second
            .cmp(&other.second)
            .then_with(|| self.first.cmp(&other.first))
    }
}

impl PartialOrd for PairedKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Packs `(reference_id, position)` into one orderable word. The
/// pending-mate table is keyed by this.
pub fn pack_coordinate(reference_id: i32, position: i32) -> u64 {
    ((reference_id as u32 as u64) << 32) | (position.max(0) as u32 as u64)
}

fn unclipped_start(record: &bam::Record, position: i32) -> io::Result<i32> {
    let mut clipped = 0;
    for op in record.cigar().iter() {
        let op = op?;
        match op.kind() {
            Kind::SoftClip => clipped += op.len() as i32,
            Kind::HardClip => {}
            _ => break,
        }
    }
    Ok(position - clipped)
}

fn unclipped_end(record: &bam::Record, position: i32) -> io::Result<i32> {
    let mut ref_span = 0;
    let mut trailing_clip = 0;
    for op in record.cigar().iter() {
        let op = op?;
        match op.kind() {
            Kind::SoftClip => trailing_clip += op.len() as i32,
            Kind::HardClip => {}
            kind => {
                trailing_clip = 0;
                if kind.consumes_reference() {
                    ref_span += op.len() as i32;
                }
            }
        }
    }
    Ok(position + ref_span - 1 + trailing_clip)
}
