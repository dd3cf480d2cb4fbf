//! Seam for the companion base-quality recalibration pass.
//!
//! Duplicate marking only decides *which* records feed the recalibration
//! model and *when* qualities may be rewritten; the model itself lives in
//! an external component. That component plugs in here: `observe` is
//! called once per non-duplicate record during pass 1, `write_model`
//! once between the passes, and `apply` once per record emitted in
//! pass 2 with the serialized record bytes.

use anyhow::Result;
use log::info;
use noodles::bam;

pub trait Recalibrator {
    /// Feeds a pass-1 non-duplicate record into the model.
    fn observe(&mut self, record: &bam::Record);

    /// Finalizes and emits the model before pass 2 starts writing.
    fn write_model(&mut self) -> Result<()>;

    /// Rewrites base qualities in a serialized record about to be emitted.
    fn apply(&mut self, data: &mut Vec<u8>) -> Result<()>;
}

/// Stand-in used when no recalibration component is linked: qualities
/// pass through unchanged.
#[derive(Default)]
pub struct NullRecalibrator {
    observed: u64,
}

impl Recalibrator for NullRecalibrator {
    fn observe(&mut self, _record: &bam::Record) {
        self.observed += 1;
    }

    fn write_model(&mut self) -> Result<()> {
        info!(
            "recalibration hook: {} non-duplicate records observed, no model to emit",
            self.observed
        );
        Ok(())
    }

    fn apply(&mut self, _data: &mut Vec<u8>) -> Result<()> {
        Ok(())
    }
}
