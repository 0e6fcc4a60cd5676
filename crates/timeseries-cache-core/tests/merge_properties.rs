//! Property tests for merging and range tracking.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::BTreeSet;

use chrono::Duration;
use proptest::prelude::*;
use timeseries_cache_core::instance::{Component, DataInstance};
use timeseries_cache_core::merge::merge;
use timeseries_cache_core::store::InstanceStore;
use timeseries_cache_core::time_range::TimeRange;
use timeseries_cache_core::tracker::RangeTracker;

const SEC: i64 = 1_000_000_000;

/// Values are derived from the timestamp so colliding rows agree.
fn instance_at(times: &[i64]) -> DataInstance {
    let axis = |k: f64| times.iter().map(|t| *t as f64 + k).collect();
    DataInstance::new(times.to_vec())
        .with_component("b", Component::Vector(vec![axis(0.0), axis(1.0), axis(2.0)]))
        .with_component("n", Component::Scalar(axis(0.5)))
        .with_stack_source("b")
}

fn assert_well_formed(instance: &DataInstance) {
    assert!(instance.is_strictly_sorted());
    for component in instance.components().values() {
        assert_eq!(component.uniform_len(), Some(instance.len()));
    }
}

fn times() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(0i64..500, 0..60)
}

fn range() -> impl Strategy<Value = (i64, i64)> {
    (0i64..1_000, 0i64..100).prop_map(|(start, len)| (start, start + len))
}

proptest! {
    #[test]
    fn merge_into_is_idempotent(a in times(), b in times()) {
        let mut store = InstanceStore::new();
        store.merge_into("k", instance_at(&a)).unwrap();
        store.merge_into("k", instance_at(&b)).unwrap();
        let once = store.get("k").cloned().unwrap();

        store.merge_into("k", instance_at(&b)).unwrap();
        prop_assert_eq!(store.get("k"), Some(&once));
    }

    #[test]
    fn merge_holds_the_union_in_either_order(a in times(), b in times()) {
        let expected: Vec<i64> = a.iter().chain(&b).copied().collect::<BTreeSet<_>>().into_iter().collect();

        let ab = merge(&instance_at(&a), &instance_at(&b)).unwrap();
        let ba = merge(&instance_at(&b), &instance_at(&a)).unwrap();

        prop_assert_eq!(ab.time(), expected.as_slice());
        prop_assert_eq!(&ab, &ba);
        assert_well_formed(&ab);
    }

    #[test]
    fn disjoint_windows_accumulate_in_either_order(split in 1i64..50, len in 1i64..50) {
        let left: Vec<i64> = (0..split).collect();
        let right: Vec<i64> = (split..split + len).collect();

        let mut forward = InstanceStore::new();
        forward.merge_into("k", instance_at(&left)).unwrap();
        forward.merge_into("k", instance_at(&right)).unwrap();

        let mut backward = InstanceStore::new();
        backward.merge_into("k", instance_at(&right)).unwrap();
        backward.merge_into("k", instance_at(&left)).unwrap();

        prop_assert_eq!(forward.get("k"), backward.get("k"));
        prop_assert_eq!(forward.get("k").map(DataInstance::len), Some((split + len) as usize));
    }

    #[test]
    fn tracker_ranges_stay_sorted_disjoint_and_cover_inputs(
        inputs in prop::collection::vec(range(), 1..25)
    ) {
        let tolerance = Duration::seconds(5);
        let mut tracker = RangeTracker::with_tolerance(tolerance);
        let ranges: Vec<TimeRange> = inputs
            .iter()
            .map(|(s, e)| TimeRange::from_nanos(s * SEC, e * SEC).unwrap())
            .collect();
        for r in &ranges {
            tracker.update_range("k", *r);
        }

        let stored = tracker.ranges("k");
        for pair in stored.windows(2) {
            prop_assert!(pair[0].end() + tolerance < pair[1].start());
        }
        for r in &ranges {
            prop_assert!(stored.iter().any(|s| s.start() <= r.start() && r.end() <= s.end()));
            prop_assert!(tracker.missing_ranges("k", r).is_empty());
        }

        let envelope = tracker.get_calculated_range("k").unwrap();
        prop_assert_eq!(envelope.start(), stored[0].start());
        prop_assert_eq!(envelope.end(), stored[stored.len() - 1].end());
    }
}
