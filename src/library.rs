//! Read-group to library resolution.
//!
//! Read groups that share an `LB` value are the same sequencing library
//! and must deduplicate against each other, so the header is folded into
//! a `read group id -> library id` table once, up front. A record's `RG`
//! tag is then a single map probe per record.

use std::collections::HashMap;

use anyhow::{Result, bail};
use bstr::{BStr, BString};
use log::warn;
use noodles::bam;
use noodles::sam::{self, alignment::record::data::field::Tag, alignment::record::data::field::Value};

/// Library ids are stored in an 8-bit field.
pub const MAX_LIBRARIES: usize = 255;

/// Library a record falls back to when its read group cannot be resolved.
pub const FALLBACK_LIBRARY: u8 = 0;

pub struct LibraryResolver {
    by_read_group: HashMap<BString, u8>,
    library_count: usize,
    warned_missing: bool,
    warned_unknown: bool,
}

impl LibraryResolver {
    /// Folds the header's read groups into library ids.
    ///
    /// Read groups without an `LB` value share one unnamed library.
    /// Duplicated read-group IDs are rejected by the codec while the
    /// header is parsed, before this runs.
    pub fn from_header(header: &sam::Header) -> Result<Self> {
        let mut by_library: HashMap<String, u8> = HashMap::new();
        let mut by_read_group = HashMap::new();

        for (id, read_group) in header.read_groups() {
            let library = read_group
                .other_fields()
                .get(Tag::LIBRARY.as_ref())
                .map(|v| v.to_string())
                .unwrap_or_default();

            let next_id = by_library.len();
            let library_id = *by_library.entry(library).or_insert_with(|| next_id as u8);
            if by_library.len() > MAX_LIBRARIES {
                bail!(
                    "header defines more than {MAX_LIBRARIES} distinct libraries; \
                     library ids are 8-bit"
                );
            }

            by_read_group.insert(id.clone(), library_id);
        }

        Ok(Self {
            library_count: by_library.len(),
            by_read_group,
            warned_missing: false,
            warned_unknown: false,
        })
    }

    /// Number of distinct libraries in the header.
    pub fn library_count(&self) -> usize {
        self.library_count
    }

    /// Resolves a record to its library id.
    ///
    /// A record with no `RG` tag, an unknown read group, or a non-string
    /// `RG` value falls back to library 0 with a one-time warning. More
    /// than one `RG` tag is an error.
    pub fn resolve(&mut self, record: &bam::Record) -> Result<u8> {
        let data = record.data();
        let mut read_group: Option<Value<'_>> = None;
        for field in data.iter() {
            let (tag, value) = field?;
            if tag == Tag::READ_GROUP {
                if read_group.is_some() {
                    bail!(
                        "record {:?} carries more than one RG tag",
                        record.name().unwrap_or_default()
                    );
                }
                read_group = Some(value);
            }
        }

        match read_group {
            Some(Value::String(id)) => {
                let id: &BStr = id.as_ref();
                match self.by_read_group.get(id) {
                    Some(&library_id) => Ok(library_id),
                    None => {
                        if !self.warned_unknown {
                            warn!(
                                "read group {id:?} is not in the header; \
                                 falling back to library {FALLBACK_LIBRARY}"
                            );
                            self.warned_unknown = true;
                        }
                        Ok(FALLBACK_LIBRARY)
                    }
                }
            }
            Some(_) => {
                if !self.warned_unknown {
                    warn!(
                        "record {:?} has a non-string RG tag; \
                         falling back to library {FALLBACK_LIBRARY}",
                        record.name().unwrap_or_default()
                    );
                    self.warned_unknown = true;
                }
                Ok(FALLBACK_LIBRARY)
            }
            None => {
                if !self.warned_missing {
                    warn!("records without an RG tag use library {FALLBACK_LIBRARY}");
                    self.warned_missing = true;
                }
                Ok(FALLBACK_LIBRARY)
            }
        }
    }
}
