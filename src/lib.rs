//! deduprs - streaming duplicate marking for coordinate-sorted BAM files.
//!
//! Pass 1 scans the input once, fingerprinting every mapped record by
//! library, reference, orientation, and 5' unclipped anchor, pairing
//! mates as they arrive, and recording the losing input ordinals; memory
//! stays bounded by the insert-size window because tables drain as the
//! scan advances. Pass 2 re-reads the input and rewrites it with the
//! duplicate flag settled (or the duplicates dropped).
//!
//! # Example
//!
//! ```ignore
//! use clap::Parser;
//! use deduprs::{Args, run};
//!
//! let args = Args::parse_from([
//!     "deduprs", "--in", "input.bam", "--out", "marked.bam",
//! ]);
//! run(&args, None)?;
//! ```

pub mod args;
pub mod driver;
pub mod engine;
pub mod fingerprint;
pub mod io;
pub mod library;
pub mod pool;
pub mod recab;
pub mod score;
pub mod stats;
pub mod utils;

#[cfg(test)]
mod test_util;

// Re-export commonly used items
pub use args::Args;
pub use driver::run;
pub use engine::{DEFAULT_EXCLUDE_FLAGS, DedupEngine, DuplicateIndex, EngineOptions};
pub use fingerprint::{FingerprintKey, Orientation, PairedKey};
pub use io::{DUPLICATE_FLAG, FLAG_OFFSET, set_duplicate_flag};
pub use library::LibraryResolver;
pub use recab::{NullRecalibrator, Recalibrator};
pub use score::{DEFAULT_MIN_QUAL, sum_base_qualities};
