//! Runtime settings shared by the tracker, segment engine and snapshot
//! manager.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::{
    segment::SegmentPolicy, snapshot::codec::CompressionLevel, time_range::{DEFAULT_TOLERANCE_SECS, default_tolerance},
    tracker::RangeTracker,
};

/// Tunables for one cache instance.
///
/// Every field has a default, so a partial serialized document (for example
/// only `{"tolerance_secs": 2}`) deserializes cleanly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Boundary tolerance for range comparisons, in seconds.
    pub tolerance_secs: i64,
    /// Directory, relative to the storage root, holding snapshot files.
    pub snapshot_subdir: String,
    /// Compression used when a save does not ask for one.
    pub default_compression: CompressionLevel,
    /// Multiple of the median cadence above which a spacing is a gap.
    pub gap_multiplier: i64,
    /// Upper bound on the gap threshold, in seconds.
    pub max_gap_secs: i64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
            snapshot_subdir: "snapshots".to_string(),
            default_compression: CompressionLevel::default(),
            gap_multiplier: 10,
            max_gap_secs: 3600,
        }
    }
}

impl CacheSettings {
    /// Tolerance as a duration. Values outside chrono's range fall back to
    /// the default tolerance.
    pub fn tolerance(&self) -> Duration {
        Duration::try_seconds(self.tolerance_secs).unwrap_or_else(default_tolerance)
    }

    /// Segment policy built from the gap settings. An out-of-range
    /// `max_gap_secs` keeps the default cap.
    pub fn segment_policy(&self) -> SegmentPolicy {
        let max_gap = Duration::try_seconds(self.max_gap_secs)
            .unwrap_or_else(|| SegmentPolicy::default().max_gap);
        SegmentPolicy {
            gap_multiplier: self.gap_multiplier,
            max_gap,
        }
    }

    /// An empty range tracker using these settings' tolerance.
    pub fn range_tracker(&self) -> RangeTracker {
        RangeTracker::with_tolerance(self.tolerance())
    }
}
