//! Closed time intervals and tolerance-aware comparisons.
//!
//! A [`TimeRange`] is a closed interval `[start, end]` over UTC instants.
//! Every comparison that decides whether two ranges "touch" or "match" takes
//! an explicit tolerance, because fetch windows requested by callers and the
//! spans actually observed in returned data rarely line up to the nanosecond.
//!
//! Time indexes inside [`crate::instance::DataInstance`] are stored as `i64`
//! nanoseconds since the Unix epoch; [`to_nanos`] and [`from_nanos`] are the
//! single place where the two representations are converted.

use std::fmt;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

/// Default slack used for boundary equality and overlap checks.
pub const DEFAULT_TOLERANCE_SECS: i64 = 5;

/// Return the default tolerance as a `chrono::Duration`.
pub fn default_tolerance() -> Duration {
    Duration::seconds(DEFAULT_TOLERANCE_SECS)
}

/// Convert an instant into nanoseconds since the Unix epoch.
///
/// Instants outside the representable `i64` nanosecond span (roughly years
/// 1677..2262) saturate to `i64::MIN` / `i64::MAX`.
pub fn to_nanos(ts: DateTime<Utc>) -> i64 {
    match ts.timestamp_nanos_opt() {
        Some(ns) => ns,
        None if ts.timestamp() < 0 => i64::MIN,
        None => i64::MAX,
    }
}

/// Convert nanoseconds since the Unix epoch into an instant.
pub fn from_nanos(ns: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(ns)
}

/// Errors raised when constructing a [`TimeRange`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TimeRangeError {
    /// The start of the range lies after its end.
    #[snafu(display("Invalid time range: start={start} is after end={end}"))]
    Inverted {
        /// Requested lower bound.
        start: DateTime<Utc>,
        /// Requested upper bound.
        end: DateTime<Utc>,
    },
}

/// Closed interval `[start, end]` of UTC instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeRange {
    /// Build a range, rejecting `start > end`.
    ///
    /// A zero-length range (`start == end`) is valid and denotes a single instant.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, TimeRangeError> {
        ensure!(start <= end, InvertedSnafu { start, end });
        Ok(Self { start, end })
    }

    /// Build a range from epoch nanoseconds.
    pub fn from_nanos(start_ns: i64, end_ns: i64) -> Result<Self, TimeRangeError> {
        Self::new(from_nanos(start_ns), from_nanos(end_ns))
    }

    /// Lower bound (inclusive).
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Upper bound (inclusive).
    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Lower bound in epoch nanoseconds.
    pub fn start_nanos(&self) -> i64 {
        to_nanos(self.start)
    }

    /// Upper bound in epoch nanoseconds.
    pub fn end_nanos(&self) -> i64 {
        to_nanos(self.end)
    }

    /// Length of the interval.
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Whether the epoch-nanosecond timestamp `ns` lies inside the range.
    pub fn contains_nanos(&self, ns: i64) -> bool {
        self.start_nanos() <= ns && ns <= self.end_nanos()
    }

    /// Whether the two ranges overlap or are separated by at most `tolerance`.
    pub fn touches(&self, other: &TimeRange, tolerance: Duration) -> bool {
        other.start <= self.end + tolerance && self.start <= other.end + tolerance
    }

    /// Whether both bounds agree with `other` within `tolerance`.
    pub fn approx_eq(&self, other: &TimeRange, tolerance: Duration) -> bool {
        (self.start - other.start).abs() <= tolerance && (self.end - other.end).abs() <= tolerance
    }

    /// Whether `other` lies inside this range once both edges are widened by
    /// `tolerance`.
    pub fn contains_within(&self, other: &TimeRange, tolerance: Duration) -> bool {
        self.start - tolerance <= other.start && other.end <= self.end + tolerance
    }

    /// Smallest range covering both `self` and `other`.
    pub fn hull(&self, other: &TimeRange) -> TimeRange {
        TimeRange {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// Overlapping part of the two ranges, if any.
    pub fn intersect(&self, other: &TimeRange) -> Option<TimeRange> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start <= end).then_some(TimeRange { start, end })
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}]",
            self.start.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            self.end.to_rfc3339_opts(SecondsFormat::AutoSi, true)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
    }

    #[test]
    fn rejects_inverted_bounds() {
        let err = TimeRange::new(t(10, 0, 1), t(10, 0, 0)).unwrap_err();
        assert!(matches!(err, TimeRangeError::Inverted { .. }));
        assert!(TimeRange::new(t(10, 0, 0), t(10, 0, 0)).is_ok());
    }

    #[test]
    fn nanos_conversion_is_lossless_in_range() {
        let ts = t(12, 34, 56) + Duration::nanoseconds(789);
        assert_eq!(from_nanos(to_nanos(ts)), ts);
    }

    #[test]
    fn touches_respects_tolerance() {
        let tol = default_tolerance();
        let a = TimeRange::new(t(10, 0, 0), t(10, 10, 0)).unwrap();
        let abut = TimeRange::new(t(10, 10, 4), t(10, 20, 0)).unwrap();
        let apart = TimeRange::new(t(10, 10, 6), t(10, 20, 0)).unwrap();

        assert!(a.touches(&abut, tol));
        assert!(abut.touches(&a, tol));
        assert!(!a.touches(&apart, tol));
        assert!(!apart.touches(&a, tol));
    }

    #[test]
    fn approx_eq_and_contains_within() {
        let tol = default_tolerance();
        let a = TimeRange::new(t(10, 0, 0), t(11, 0, 0)).unwrap();
        let b = TimeRange::new(t(10, 0, 3), t(10, 59, 58)).unwrap();
        let c = TimeRange::new(t(9, 59, 57), t(11, 0, 4)).unwrap();

        assert!(a.approx_eq(&b, tol));
        assert!(a.contains_within(&c, tol));
        assert!(!a.contains_within(&c, Duration::seconds(1)));
    }

    #[test]
    fn hull_and_intersect() {
        let a = TimeRange::new(t(10, 0, 0), t(10, 30, 0)).unwrap();
        let b = TimeRange::new(t(10, 20, 0), t(11, 0, 0)).unwrap();
        let far = TimeRange::new(t(12, 0, 0), t(13, 0, 0)).unwrap();

        assert_eq!(a.hull(&b), TimeRange::new(t(10, 0, 0), t(11, 0, 0)).unwrap());
        assert_eq!(
            a.intersect(&b),
            Some(TimeRange::new(t(10, 20, 0), t(10, 30, 0)).unwrap())
        );
        assert_eq!(a.intersect(&far), None);
    }
}
