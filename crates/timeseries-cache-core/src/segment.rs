//! Gap-based segmentation of an instance for compact persistence.
//!
//! The typical cadence of a series is taken as the median spacing between
//! consecutive (sorted) timestamps. Any spacing larger than
//! `min(gap_multiplier × median, max_gap)` is treated as a data gap and
//! becomes a segment boundary.
//!
//! An instance without any such gap yields **no** segments: the caller keeps
//! it whole. Segments are independent copies, each sorted by time.

use chrono::Duration;

use crate::{instance::DataInstance, time_range::TimeRange};

/// Knobs for the gap threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentPolicy {
    /// Multiple of the median cadence above which a spacing counts as a gap.
    pub gap_multiplier: i64,
    /// Upper bound on the threshold.
    pub max_gap: Duration,
}

impl Default for SegmentPolicy {
    fn default() -> Self {
        Self {
            gap_multiplier: 10,
            max_gap: Duration::seconds(3600),
        }
    }
}

impl SegmentPolicy {
    /// Gap threshold in nanoseconds for an already sorted time index.
    ///
    /// Returns `None` when there are fewer than two timestamps.
    pub fn gap_threshold(&self, sorted_time: &[i64]) -> Option<i64> {
        let mut diffs: Vec<i64> = sorted_time
            .windows(2)
            .map(|w| w[1].saturating_sub(w[0]))
            .collect();
        if diffs.is_empty() {
            return None;
        }
        diffs.sort_unstable();

        let mid = diffs.len() / 2;
        let median = if diffs.len() % 2 == 1 {
            diffs[mid]
        } else {
            diffs[mid - 1] + (diffs[mid] - diffs[mid - 1]) / 2
        };

        let cap = self.max_gap.num_nanoseconds().unwrap_or(i64::MAX);
        Some(median.saturating_mul(self.gap_multiplier).min(cap))
    }
}

/// Split `instance` at data gaps.
///
/// When `window` is given, only rows inside it are considered. Returns an
/// empty vector when nothing remains after filtering or when no gap exceeds
/// the threshold.
pub fn split_into_segments(
    instance: &DataInstance,
    window: Option<&TimeRange>,
    policy: &SegmentPolicy,
) -> Vec<DataInstance> {
    let filtered;
    let source = match window {
        Some(w) => {
            filtered = instance.filter_time(w);
            &filtered
        }
        None => instance,
    };
    if source.is_empty() {
        return Vec::new();
    }

    let perm = source.sort_permutation();
    let sorted: Vec<i64> = perm.iter().map(|&i| source.time()[i]).collect();
    let Some(threshold) = policy.gap_threshold(&sorted) else {
        return Vec::new();
    };

    let boundaries: Vec<usize> = sorted
        .windows(2)
        .enumerate()
        .filter(|(_, w)| w[1].saturating_sub(w[0]) > threshold)
        .map(|(i, _)| i + 1)
        .collect();
    if boundaries.is_empty() {
        return Vec::new();
    }

    let mut segments = Vec::with_capacity(boundaries.len() + 1);
    let mut start = 0;
    for end in boundaries.into_iter().chain(std::iter::once(perm.len())) {
        segments.push(source.select(&perm[start..end]));
        start = end;
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::Component;

    const SEC: i64 = 1_000_000_000;

    fn series(time: Vec<i64>) -> DataInstance {
        let values = time.iter().map(|t| (*t / SEC) as f64).collect();
        DataInstance::new(time).with_component("n", Component::Scalar(values))
    }

    #[test]
    fn threshold_is_capped() {
        let policy = SegmentPolicy::default();
        assert_eq!(policy.gap_threshold(&[0, SEC, 2 * SEC]), Some(10 * SEC));
        assert_eq!(
            policy.gap_threshold(&[0, 1000 * SEC, 2000 * SEC]),
            Some(3600 * SEC)
        );
        assert_eq!(policy.gap_threshold(&[0]), None);
    }

    #[test]
    fn even_count_median_averages_middle_pair() {
        let policy = SegmentPolicy::default();
        // diffs: 1, 3 -> median 2
        assert_eq!(policy.gap_threshold(&[0, SEC, 4 * SEC]), Some(20 * SEC));
    }

    #[test]
    fn gap_free_series_has_no_segments() {
        let inst = series((0..100).map(|i| i * SEC).collect());
        assert!(split_into_segments(&inst, None, &SegmentPolicy::default()).is_empty());
    }

    #[test]
    fn single_dominant_gap_yields_two_segments() {
        let mut time: Vec<i64> = (0..60).map(|i| i * SEC).collect();
        time.extend((0..60).map(|i| 1000 * SEC + i * SEC));
        let inst = series(time.clone());

        let segments = split_into_segments(&inst, None, &SegmentPolicy::default());
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].len(), 60);
        assert_eq!(segments[1].len(), 60);

        let rebuilt: Vec<i64> = segments.iter().flat_map(|s| s.time().to_vec()).collect();
        assert_eq!(rebuilt, time);
    }

    #[test]
    fn unsorted_input_is_sliced_through_permutation() {
        let time = vec![1001 * SEC, 0, 1000 * SEC, SEC, 2 * SEC, 1002 * SEC];
        let inst = series(time);

        let segments = split_into_segments(&inst, None, &SegmentPolicy::default());
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].time(), &[0, SEC, 2 * SEC]);
        assert_eq!(
            segments[1].component("n"),
            Some(&Component::Scalar(vec![1000.0, 1001.0, 1002.0]))
        );
    }

    #[test]
    fn window_filter_applies_first() {
        let mut time: Vec<i64> = (0..10).map(|i| i * SEC).collect();
        time.extend((0..10).map(|i| 500 * SEC + i * SEC));
        let inst = series(time);

        let left = TimeRange::from_nanos(0, 9 * SEC).unwrap();
        assert!(split_into_segments(&inst, Some(&left), &SegmentPolicy::default()).is_empty());

        let nothing = TimeRange::from_nanos(100 * SEC, 200 * SEC).unwrap();
        assert!(split_into_segments(&inst, Some(&nothing), &SegmentPolicy::default()).is_empty());
    }
}
