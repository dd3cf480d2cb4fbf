//! Streaming duplicate detection.
//!
//! Pass 1 feeds coordinate-sorted records through three in-flight
//! tables: best-so-far single-end candidates per fingerprint, records
//! parked until their mate arrives, and best-so-far pairs per paired
//! fingerprint. Whenever the scan position advances, entries the input
//! can no longer collide with are drained, so memory stays bounded by
//! the insert-size window. Losers accumulate as input ordinals in a
//! bitmap that pass 2 consults while rewriting the file.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::io;

use anyhow::{Result, bail};
use log::warn;
use noodles::bam;
use roaring::RoaringBitmap;

use crate::fingerprint::{FingerprintKey, PairedKey, pack_coordinate};
use crate::library::LibraryResolver;
use crate::pool::RecordPool;
use crate::recab::Recalibrator;
use crate::score::{DEFAULT_MIN_QUAL, sum_base_qualities};
use crate::stats::DedupCounters;

/// Flags whose records are never duplicate candidates:
/// secondary, QC-fail, supplementary.
pub const DEFAULT_EXCLUDE_FLAGS: u16 = 0xB00;

/// Leading soft clips pull anchors backwards from the alignment start,
/// so the drain bound lags the scan position by this many bases.
const CLIP_LOOKBACK: i32 = 1000;

pub struct EngineOptions {
    pub min_qual: u8,
    pub one_chrom: bool,
    pub exclude_flags: u16,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            min_qual: DEFAULT_MIN_QUAL,
            one_chrom: false,
            exclude_flags: DEFAULT_EXCLUDE_FLAGS,
        }
    }
}

/// Best single-end candidate seen so far for one fingerprint.
///
/// `record` is held only while the entry is an unpaired candidate; once
/// paired evidence takes the slot the record rides the mate path instead.
struct FragmentEntry {
    score: u32,
    ordinal: u32,
    paired: bool,
    record: Option<bam::Record>,
}

/// A record waiting under the coordinate its mate is expected at.
struct PendingMate {
    key: FingerprintKey,
    score: u32,
    ordinal: u32,
    cross_reference: bool,
    record: bam::Record,
}

/// Best pair seen so far for one paired fingerprint.
struct PairedEntry {
    score: u32,
    first_ordinal: u32,
    second_ordinal: u32,
    first_record: bam::Record,
    second_record: bam::Record,
}

/// Input ordinals of the records that lost a duplicate tie-break.
#[derive(Default)]
pub struct DuplicateIndex {
    ordinals: RoaringBitmap,
}

impl DuplicateIndex {
    fn mark(&mut self, ordinal: u32) {
        self.ordinals.insert(ordinal);
    }

    pub fn contains(&self, ordinal: u32) -> bool {
        self.ordinals.contains(ordinal)
    }

    pub fn len(&self) -> u64 {
        self.ordinals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordinals.is_empty()
    }

    /// Ordinals in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.ordinals.iter()
    }
}

pub struct DedupEngine {
    options: EngineOptions,
    resolver: LibraryResolver,
    fragments: BTreeMap<FingerprintKey, FragmentEntry>,
    pending_mates: BTreeMap<u64, Vec<PendingMate>>,
    pairs: BTreeMap<PairedKey, PairedEntry>,
    duplicates: DuplicateIndex,
    pool: RecordPool,
    pub counters: DedupCounters,
    last_reference: i32,
    last_position: i32,
    sort_cursor: (u32, i32),
    warned_same_mate: bool,
    warned_cross_mate: bool,
}

impl DedupEngine {
    pub fn new(resolver: LibraryResolver, options: EngineOptions) -> Self {
        Self {
            options,
            resolver,
            fragments: BTreeMap::new(),
            pending_mates: BTreeMap::new(),
            pairs: BTreeMap::new(),
            duplicates: DuplicateIndex::default(),
            pool: RecordPool::default(),
            counters: DedupCounters::default(),
            last_reference: -1,
            last_position: -1,
            sort_cursor: (0, i32::MIN),
            warned_same_mate: false,
            warned_cross_mate: false,
        }
    }

    pub fn acquire_record(&mut self) -> bam::Record {
        self.pool.acquire()
    }

    pub fn release_record(&mut self, record: bam::Record) {
        self.pool.release(record);
    }

    pub fn pool(&self) -> &RecordPool {
        &self.pool
    }

    pub fn duplicates(&self) -> &DuplicateIndex {
        &self.duplicates
    }

    /// Sizes of the fragment, pending-mate, and paired tables.
    pub fn table_sizes(&self) -> (usize, usize, usize) {
        (
            self.fragments.len(),
            self.pending_mates.values().map(Vec::len).sum(),
            self.pairs.len(),
        )
    }

    /// Feeds one record, in input order, through pass 1.
    pub fn process(
        &mut self,
        record: bam::Record,
        ordinal: u32,
        recab: &mut dyn Recalibrator,
    ) -> Result<()> {
        let flags = record.flags();
        self.counters.observe_flags(flags);

        let reference_id = reference_id(&record)?;
        let position = position_0based(&record)?;
        self.check_sorted(reference_id, position, ordinal)?;

        if flags.is_unmapped() || reference_id < 0 || position < 0 {
            self.counters.unmapped += 1;
            self.pool.release(record);
            return Ok(());
        }

        if u16::from(flags) & self.options.exclude_flags != 0 {
            self.counters.excluded += 1;
            self.pool.release(record);
            return Ok(());
        }

        if reference_id != self.last_reference || position > self.last_position {
            self.sweep(reference_id, position, recab);
            self.last_reference = reference_id;
            self.last_position = position;
        }

        self.classify(record, ordinal, reference_id, position, recab)
    }

    /// Flushes the tables at EOF and records their final sizes.
    pub fn finish(&mut self, recab: &mut dyn Recalibrator) {
        self.drain_below(FingerprintKey::empty(), pack_coordinate(-1, 0), recab);
        let (fragments, pending_mates, pairs) = self.table_sizes();
        self.counters.fragments_at_exit = fragments;
        self.counters.pending_mates_at_exit = pending_mates;
        self.counters.pairs_at_exit = pairs;
    }

    fn check_sorted(&mut self, reference_id: i32, position: i32, ordinal: u32) -> Result<()> {
        let cursor = (reference_id as u32, position);
        if cursor < self.sort_cursor {
            bail!("input is not coordinate-sorted at record {ordinal}");
        }
        self.sort_cursor = cursor;
        Ok(())
    }

    fn classify(
        &mut self,
        record: bam::Record,
        ordinal: u32,
        reference_id: i32,
        position: i32,
        recab: &mut dyn Recalibrator,
    ) -> Result<()> {
        let flags = record.flags();
        let library_id = self.resolver.resolve(&record)?;
        let score = sum_base_qualities(&record, self.options.min_qual);
        let key = FingerprintKey::from_alignment(&record, library_id, reference_id, position)?;

        let mate_reference_id = mate_reference_id(&record)?;
        let mate_position = mate_position_0based(&record)?;
        let mut paired = flags.is_segmented()
            && !flags.is_mate_unmapped()
            && mate_reference_id >= 0
            && mate_position >= 0;
        if self.options.one_chrom && mate_reference_id != reference_id {
            paired = false;
        }

        // Single-end stage: every mapped record passes through the
        // fragment table. Paired evidence displaces an unpaired entry
        // outright; between unpaired candidates the score decides, with
        // the earlier ordinal keeping ties.
        let mut displaced: Option<(u32, Option<bam::Record>)> = None;
        let carried = match self.fragments.entry(key) {
            Entry::Vacant(slot) => {
                if paired {
                    slot.insert(FragmentEntry {
                        score,
                        ordinal,
                        paired: true,
                        record: None,
                    });
                    Some(record)
                } else {
                    slot.insert(FragmentEntry {
                        score,
                        ordinal,
                        paired: false,
                        record: Some(record),
                    });
                    None
                }
            }
            Entry::Occupied(mut slot) => {
                let stored = slot.get_mut();
                match (paired, stored.paired) {
                    (false, false) => {
                        if score > stored.score {
                            displaced = Some((stored.ordinal, stored.record.take()));
                            stored.score = score;
                            stored.ordinal = ordinal;
                            stored.record = Some(record);
                        } else {
                            displaced = Some((ordinal, Some(record)));
                        }
                        None
                    }
                    (true, false) => {
                        displaced = Some((stored.ordinal, stored.record.take()));
                        stored.score = score;
                        stored.ordinal = ordinal;
                        stored.paired = true;
                        Some(record)
                    }
                    (false, true) => {
                        displaced = Some((ordinal, Some(record)));
                        None
                    }
                    (true, true) => Some(record),
                }
            }
        };

        if let Some((loser_ordinal, loser_record)) = displaced {
            self.mark_single_duplicate(loser_ordinal, loser_record);
        }

        match carried {
            Some(record) => self.resolve_mate(
                record,
                key,
                score,
                ordinal,
                reference_id,
                position,
                mate_reference_id,
                mate_position,
                recab,
            ),
            None => Ok(()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn resolve_mate(
        &mut self,
        record: bam::Record,
        key: FingerprintKey,
        score: u32,
        ordinal: u32,
        reference_id: i32,
        position: i32,
        mate_reference_id: i32,
        mate_position: i32,
        recab: &mut dyn Recalibrator,
    ) -> Result<()> {
        let self_pos = pack_coordinate(reference_id, position);
        let mate_pos = pack_coordinate(mate_reference_id, mate_position);
        let cross_reference = mate_reference_id != reference_id;

        if mate_pos > self_pos {
            self.pending_mates.entry(mate_pos).or_default().push(PendingMate {
                key,
                score,
                ordinal,
                cross_reference,
                record,
            });
            return Ok(());
        }

        let Some(parked) = self.take_pending_mate(self_pos, &record) else {
            if mate_pos == self_pos {
                // both mates map to this coordinate; ours is first
                self.pending_mates.entry(self_pos).or_default().push(PendingMate {
                    key,
                    score,
                    ordinal,
                    cross_reference,
                    record,
                });
                return Ok(());
            }
            self.missing_mate(cross_reference, record, recab);
            return Ok(());
        };

        let paired_key = PairedKey::new(parked.key, key);
        let pair = PairedEntry {
            score: parked.score + score,
            first_ordinal: parked.ordinal,
            second_ordinal: ordinal,
            first_record: parked.record,
            second_record: record,
        };

        let mut loser = None;
        match self.pairs.entry(paired_key) {
            Entry::Vacant(slot) => {
                slot.insert(pair);
            }
            Entry::Occupied(mut slot) => {
                let stored = slot.get_mut();
                let challenger_wins = pair.score > stored.score
                    || (pair.score == stored.score && pair.first_ordinal < stored.first_ordinal);
                loser = Some(if challenger_wins {
                    std::mem::replace(stored, pair)
                } else {
                    pair
                });
            }
        }
        if let Some(loser) = loser {
            self.mark_paired_duplicates(loser);
        }

        Ok(())
    }

    fn take_pending_mate(&mut self, position: u64, record: &bam::Record) -> Option<PendingMate> {
        let bucket = self.pending_mates.get_mut(&position)?;
        let index = bucket
            .iter()
            .position(|parked| parked.record.name() == record.name())?;
        let parked = bucket.swap_remove(index);
        if bucket.is_empty() {
            self.pending_mates.remove(&position);
        }
        Some(parked)
    }

    /// Drains every entry the scan has moved past.
    fn sweep(&mut self, reference_id: i32, position: i32, recab: &mut dyn Recalibrator) {
        let bound = position.saturating_sub(CLIP_LOOKBACK);
        self.drain_below(
            FingerprintKey::horizon(reference_id, bound),
            pack_coordinate(reference_id, bound),
            recab,
        );
    }

    fn drain_below(
        &mut self,
        bound: FingerprintKey,
        packed_bound: u64,
        recab: &mut dyn Recalibrator,
    ) {
        let keep = self.fragments.split_off(&bound);
        for (_, entry) in std::mem::replace(&mut self.fragments, keep) {
            if let Some(record) = entry.record {
                self.non_duplicate(record, recab);
            }
        }

        let keep = self.pairs.split_off(&PairedKey::horizon(bound));
        for (_, entry) in std::mem::replace(&mut self.pairs, keep) {
            self.non_duplicate(entry.first_record, recab);
            self.non_duplicate(entry.second_record, recab);
        }

        let keep = self.pending_mates.split_off(&packed_bound);
        for (_, bucket) in std::mem::replace(&mut self.pending_mates, keep) {
            for parked in bucket {
                self.missing_mate(parked.cross_reference, parked.record, recab);
            }
        }
    }

    fn mark_single_duplicate(&mut self, ordinal: u32, record: Option<bam::Record>) {
        self.duplicates.mark(ordinal);
        self.counters.single_duplicates += 1;
        if let Some(record) = record {
            self.pool.release(record);
        }
    }

    fn mark_paired_duplicates(&mut self, pair: PairedEntry) {
        self.duplicates.mark(pair.first_ordinal);
        self.duplicates.mark(pair.second_ordinal);
        self.counters.paired_duplicates += 2;
        self.pool.release(pair.first_record);
        self.pool.release(pair.second_record);
    }

    fn missing_mate(
        &mut self,
        cross_reference: bool,
        record: bam::Record,
        recab: &mut dyn Recalibrator,
    ) {
        if cross_reference {
            self.counters.missing_mate_cross_ref += 1;
            if !self.warned_cross_mate {
                warn!(
                    "paired record whose mate maps to another reference never found it; \
                     treating as non-duplicate"
                );
                self.warned_cross_mate = true;
            }
        } else {
            self.counters.missing_mate_same_ref += 1;
            if !self.warned_same_mate {
                warn!("paired record never found its mate; treating as non-duplicate");
                self.warned_same_mate = true;
            }
        }
        self.non_duplicate(record, recab);
    }

    fn non_duplicate(&mut self, record: bam::Record, recab: &mut dyn Recalibrator) {
        recab.observe(&record);
        self.pool.release(record);
    }
}

fn reference_id(record: &bam::Record) -> io::Result<i32> {
    record
        .reference_sequence_id()
        .transpose()
        .map(|id| id.map(|id| id as i32).unwrap_or(-1))
}

fn position_0based(record: &bam::Record) -> io::Result<i32> {
    record
        .alignment_start()
        .transpose()
        .map(|pos| pos.map(|pos| pos.get() as i32 - 1).unwrap_or(-1))
}

fn mate_reference_id(record: &bam::Record) -> io::Result<i32> {
    record
        .mate_reference_sequence_id()
        .transpose()
        .map(|id| id.map(|id| id as i32).unwrap_or(-1))
}

fn mate_position_0based(record: &bam::Record) -> io::Result<i32> {
    record
        .mate_alignment_start()
        .transpose()
        .map(|pos| pos.map(|pos| pos.get() as i32 - 1).unwrap_or(-1))
}
