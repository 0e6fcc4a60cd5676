//! Range tracker: which time spans are already available per key.
//!
//! For each key the tracker keeps a sorted list of pairwise-disjoint
//! [`TimeRange`]s. [`RangeTracker::update_range`] folds a new range in with a
//! tolerance-aware union, so ranges that overlap or sit within the tolerance
//! of each other are coalesced into one.
//!
//! Two kinds of query are offered:
//!
//! - [`RangeTracker::get_calculated_range`] returns a single min/max
//!   envelope. It is cheap but overstates coverage whenever the stored
//!   ranges have gaps between them.
//! - [`RangeTracker::ranges`], [`RangeTracker::is_covered`] and
//!   [`RangeTracker::missing_ranges`] work on the exact disjoint list and
//!   are what fetch logic should use to request only what is missing.

use std::collections::HashMap;

use chrono::Duration;

use crate::time_range::{TimeRange, default_tolerance};

/// Per-key bookkeeping of computed/fetched time ranges.
#[derive(Debug, Clone)]
pub struct RangeTracker {
    ranges: HashMap<String, Vec<TimeRange>>,
    tolerance: Duration,
}

impl Default for RangeTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RangeTracker {
    /// A tracker using the default tolerance.
    pub fn new() -> Self {
        Self::with_tolerance(default_tolerance())
    }

    /// A tracker using `tolerance` for overlap and abutment checks.
    pub fn with_tolerance(tolerance: Duration) -> Self {
        Self {
            ranges: HashMap::new(),
            tolerance,
        }
    }

    /// Tolerance used for boundary comparisons.
    pub fn tolerance(&self) -> Duration {
        self.tolerance
    }

    /// Record `range` as available for `key`.
    pub fn update_range(&mut self, key: &str, range: TimeRange) {
        let tolerance = self.tolerance;
        let list = self.ranges.entry(key.to_string()).or_default();
        list.push(range);
        list.sort_by_key(|r| (r.start(), r.end()));

        let mut coalesced: Vec<TimeRange> = Vec::with_capacity(list.len());
        for r in list.drain(..) {
            match coalesced.last_mut() {
                Some(last) if last.touches(&r, tolerance) => *last = last.hull(&r),
                _ => coalesced.push(r),
            }
        }
        *list = coalesced;
    }

    /// Exact stored ranges for `key`, sorted and disjoint.
    pub fn ranges(&self, key: &str) -> &[TimeRange] {
        self.ranges.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Envelope `[min start, max end]` over every stored range for `key`.
    ///
    /// Gaps between stored ranges are not reflected.
    pub fn get_calculated_range(&self, key: &str) -> Option<TimeRange> {
        let list = self.ranges.get(key)?;
        let first = list.first()?;
        Some(list.iter().skip(1).fold(*first, |acc, r| acc.hull(r)))
    }

    /// Whether a single stored range covers `window` within tolerance.
    pub fn is_covered(&self, key: &str, window: &TimeRange) -> bool {
        self.ranges(key)
            .iter()
            .any(|r| r.contains_within(window, self.tolerance))
    }

    /// Parts of `window` that no stored range covers.
    ///
    /// Gaps no wider than the tolerance are treated as covered.
    pub fn missing_ranges(&self, key: &str, window: &TimeRange) -> Vec<TimeRange> {
        let tolerance = self.tolerance;
        let mut missing = Vec::new();
        let mut cursor = window.start();

        for r in self.ranges(key) {
            if r.end() < cursor {
                continue;
            }
            if r.start() > window.end() {
                break;
            }
            if r.start() > cursor + tolerance {
                if let Ok(gap) = TimeRange::new(cursor, r.start()) {
                    missing.push(gap);
                }
            }
            cursor = cursor.max(r.end());
        }

        if window.end() > cursor + tolerance {
            if let Ok(gap) = TimeRange::new(cursor, window.end()) {
                missing.push(gap);
            }
        }
        missing
    }

    /// Keys that have at least one tracked range, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self
            .ranges
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, _)| k.as_str())
            .collect();
        keys.sort_unstable();
        keys
    }

    /// Forget every range for `key`.
    pub fn clear(&mut self, key: &str) {
        self.ranges.remove(key);
    }

    /// Forget every range for every key.
    pub fn clear_all(&mut self) {
        self.ranges.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn t(m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, m, s).unwrap()
    }

    fn r(a: (u32, u32), b: (u32, u32)) -> TimeRange {
        TimeRange::new(t(a.0, a.1), t(b.0, b.1)).unwrap()
    }

    #[test]
    fn disjoint_ranges_are_kept_sorted() {
        let mut tracker = RangeTracker::new();
        tracker.update_range("mag", r((20, 0), (30, 0)));
        tracker.update_range("mag", r((0, 0), (10, 0)));

        assert_eq!(tracker.ranges("mag"), &[r((0, 0), (10, 0)), r((20, 0), (30, 0))]);
    }

    #[test]
    fn overlapping_and_abutting_ranges_coalesce() {
        let mut tracker = RangeTracker::new();
        tracker.update_range("mag", r((0, 0), (10, 0)));
        tracker.update_range("mag", r((20, 0), (30, 0)));
        // Within the 5s tolerance of the first range's end.
        tracker.update_range("mag", r((10, 4), (15, 0)));
        assert_eq!(tracker.ranges("mag").len(), 2);

        // Bridges everything transitively.
        tracker.update_range("mag", r((14, 0), (20, 3)));
        assert_eq!(tracker.ranges("mag"), &[r((0, 0), (30, 0))]);
    }

    #[test]
    fn envelope_overstates_gapped_coverage() {
        let mut tracker = RangeTracker::new();
        tracker.update_range("mag", r((0, 0), (10, 0)));
        tracker.update_range("mag", r((20, 0), (30, 0)));

        assert_eq!(tracker.get_calculated_range("mag"), Some(r((0, 0), (30, 0))));
        assert!(!tracker.is_covered("mag", &r((5, 0), (25, 0))));
        assert!(tracker.is_covered("mag", &r((20, 0), (30, 3))));
        assert_eq!(tracker.get_calculated_range("other"), None);
    }

    #[test]
    fn missing_ranges_reports_gaps_and_tails() {
        let mut tracker = RangeTracker::new();
        tracker.update_range("mag", r((10, 0), (20, 0)));
        tracker.update_range("mag", r((30, 0), (40, 0)));

        let missing = tracker.missing_ranges("mag", &r((0, 0), (50, 0)));
        assert_eq!(
            missing,
            vec![
                r((0, 0), (10, 0)),
                r((20, 0), (30, 0)),
                r((40, 0), (50, 0)),
            ]
        );

        assert!(tracker.missing_ranges("mag", &r((12, 0), (18, 0))).is_empty());
        assert_eq!(
            tracker.missing_ranges("unknown", &r((0, 0), (1, 0))),
            vec![r((0, 0), (1, 0))]
        );
    }

    #[test]
    fn clear_per_key_and_globally() {
        let mut tracker = RangeTracker::new();
        tracker.update_range("a", r((0, 0), (1, 0)));
        tracker.update_range("b", r((0, 0), (1, 0)));

        tracker.clear("a");
        assert!(tracker.ranges("a").is_empty());
        assert_eq!(tracker.keys(), vec!["b"]);

        tracker.clear_all();
        assert!(tracker.keys().is_empty());
    }
}
