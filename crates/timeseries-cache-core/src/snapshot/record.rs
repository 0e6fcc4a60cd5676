//! On-disk snapshot record and entry key conventions.
//!
//! A snapshot file holds exactly one [`SnapshotRecord`]: a map from entry name to entry.
//! Entry names follow three shapes:
//!
//! - `key`: a whole, unsegmented instance
//! - `key_segment_N`: segment `N` (1-based) of `key`
//! - `key_segments_meta`: a [`SegmentsMeta`] describing the segments of `key`

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{instance::DataInstance, time_range::TimeRange};

/// Current record layout version.
pub const FORMAT_VERSION: u32 = 1;

const SEGMENT_INFIX: &str = "_segment_";
const SEGMENTS_META_SUFFIX: &str = "_segments_meta";

/// Description of how one key was split into segments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentsMeta {
    /// Key the segments belong to.
    pub original_key: String,
    /// Number of `_segment_N` entries written.
    pub segment_count: usize,
    /// Observed span of each segment, in segment order.
    pub ranges: Vec<TimeRange>,
}

/// Payload stored under one entry name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SnapshotEntry {
    /// A whole instance or one segment of it.
    Instance(DataInstance),
    /// Segment bookkeeping for a key.
    SegmentsMeta(SegmentsMeta),
}

/// Everything persisted in one snapshot file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    /// Layout version the record was written with.
    pub format_version: u32,
    /// Wall-clock time of the save.
    pub created_at: DateTime<Utc>,
    /// Named entries.
    pub entries: BTreeMap<String, SnapshotEntry>,
}

impl SnapshotRecord {
    /// An empty record stamped with the current time.
    pub fn new() -> Self {
        Self {
            format_version: FORMAT_VERSION,
            created_at: Utc::now(),
            entries: BTreeMap::new(),
        }
    }
}

impl Default for SnapshotRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// Parsed form of an entry name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKey<'a> {
    /// `key`
    Plain(&'a str),
    /// `key_segment_N`
    Segment {
        /// The owning key.
        base: &'a str,
        /// 1-based segment index.
        index: usize,
    },
    /// `key_segments_meta`
    SegmentsMeta {
        /// The owning key.
        base: &'a str,
    },
}

impl<'a> EntryKey<'a> {
    /// Classify an entry name.
    ///
    /// A `_segment_` suffix only counts when followed by a positive integer;
    /// anything else is a plain key.
    pub fn parse(name: &'a str) -> Self {
        if let Some(base) = name.strip_suffix(SEGMENTS_META_SUFFIX) {
            if !base.is_empty() {
                return EntryKey::SegmentsMeta { base };
            }
        }
        if let Some((base, index)) = name.rsplit_once(SEGMENT_INFIX) {
            if let Ok(index) = index.parse::<usize>() {
                if index > 0 && !base.is_empty() {
                    return EntryKey::Segment { base, index };
                }
            }
        }
        EntryKey::Plain(name)
    }

    /// The key this entry belongs to.
    pub fn base(&self) -> &'a str {
        match *self {
            EntryKey::Plain(base) => base,
            EntryKey::Segment { base, .. } | EntryKey::SegmentsMeta { base } => base,
        }
    }
}

/// Entry name for segment `index` (1-based) of `key`.
pub fn segment_entry_name(key: &str, index: usize) -> String {
    format!("{key}{SEGMENT_INFIX}{index}")
}

/// Entry name for the segment metadata of `key`.
pub fn segments_meta_entry_name(key: &str) -> String {
    format!("{key}{SEGMENTS_META_SUFFIX}")
}

/// Whether a store key would be read back as a segment or segment metadata
/// entry, and so cannot be saved under its own name.
pub fn is_reserved_key(key: &str) -> bool {
    EntryKey::parse(key) != EntryKey::Plain(key)
}

/// Whether the entry `name` belongs to the requested key: the bare key, one
/// of its segments, or its segment metadata.
pub fn entry_matches_key(name: &str, requested: &str) -> bool {
    name == requested
        || name
            .strip_prefix(requested)
            .and_then(|rest| rest.strip_prefix(SEGMENT_INFIX))
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
        || name
            .strip_prefix(requested)
            .is_some_and(|rest| rest == SEGMENTS_META_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_entry_shapes() {
        assert_eq!(EntryKey::parse("mag_rtn"), EntryKey::Plain("mag_rtn"));
        assert_eq!(
            EntryKey::parse("mag_rtn_segment_12"),
            EntryKey::Segment {
                base: "mag_rtn",
                index: 12
            }
        );
        assert_eq!(
            EntryKey::parse("mag_rtn_segments_meta"),
            EntryKey::SegmentsMeta { base: "mag_rtn" }
        );
    }

    #[test]
    fn malformed_segment_suffix_is_plain() {
        assert_eq!(EntryKey::parse("x_segment_"), EntryKey::Plain("x_segment_"));
        assert_eq!(EntryKey::parse("x_segment_0"), EntryKey::Plain("x_segment_0"));
        assert_eq!(EntryKey::parse("x_segment_a"), EntryKey::Plain("x_segment_a"));
        assert_eq!(EntryKey::parse("_segment_3"), EntryKey::Plain("_segment_3"));
    }

    #[test]
    fn names_round_trip_through_parse() {
        assert_eq!(
            EntryKey::parse(&segment_entry_name("spi_sf00", 2)).base(),
            "spi_sf00"
        );
        assert_eq!(
            EntryKey::parse(&segments_meta_entry_name("spi_sf00")),
            EntryKey::SegmentsMeta { base: "spi_sf00" }
        );
    }

    #[test]
    fn reserved_keys_are_those_that_parse_as_entries() {
        assert!(is_reserved_key("run_segment_1"));
        assert!(is_reserved_key("x_segments_meta"));
        assert!(!is_reserved_key("run_segment_"));
        assert!(!is_reserved_key("run_segment_0"));
        assert!(!is_reserved_key("mag_rtn"));
    }

    #[test]
    fn request_matching() {
        assert!(entry_matches_key("mag", "mag"));
        assert!(entry_matches_key("mag_segment_3", "mag"));
        assert!(entry_matches_key("mag_segments_meta", "mag"));
        assert!(!entry_matches_key("mag_rtn", "mag"));
        assert!(!entry_matches_key("mag_rtn_segment_1", "mag"));
        assert!(!entry_matches_key("mag_segment_x", "mag"));
    }
}
