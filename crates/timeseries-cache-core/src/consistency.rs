//! Length-invariant checks and best-effort repair.
//!
//! The invariant every [`DataInstance`] should satisfy is that its time index
//! and all component arrays have the same length. External producers (fetch
//! collaborators, restore hooks, hand-built instances) can violate it; this
//! module detects and repairs that.
//!
//! Repair is deliberately simple and lossy: every array is truncated to the
//! shortest length found anywhere in the instance. Whatever produced the
//! mismatch is not addressed here.

use log::warn;

use crate::instance::DataInstance;

/// One component whose arrays do not match the time index length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentMismatch {
    /// Component name.
    pub component: String,
    /// Shortest array length in the component.
    pub min_len: usize,
    /// Longest array length in the component.
    pub max_len: usize,
}

/// Read-only diagnosis of an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyReport {
    /// Length of the time index.
    pub time_len: usize,
    /// Components that disagree with `time_len`.
    pub mismatches: Vec<ComponentMismatch>,
}

impl ConsistencyReport {
    /// Whether the instance satisfies the length invariant.
    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Record of what a repair changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairReport {
    /// Time index length before repair.
    pub original_time_len: usize,
    /// Common length of every array after repair.
    pub repaired_len: usize,
    /// Components that had at least one array shortened, with their
    /// previous longest length.
    pub truncated_components: Vec<(String, usize)>,
}

impl RepairReport {
    /// Whether the repair modified anything.
    pub fn changed(&self) -> bool {
        self.original_time_len != self.repaired_len || !self.truncated_components.is_empty()
    }

    /// Whether the time index itself had to be shortened.
    pub fn time_truncated(&self) -> bool {
        self.original_time_len != self.repaired_len
    }
}

/// Diagnose `instance` without modifying it.
pub fn check(instance: &DataInstance) -> ConsistencyReport {
    let time_len = instance.len();
    let mismatches = instance
        .components()
        .iter()
        .filter(|(_, c)| c.min_len() != time_len || c.max_len() != time_len)
        .map(|(name, c)| ComponentMismatch {
            component: name.clone(),
            min_len: c.min_len(),
            max_len: c.max_len(),
        })
        .collect();
    ConsistencyReport {
        time_len,
        mismatches,
    }
}

/// Truncate every array of `instance` to the shortest length present.
///
/// A component longer than the time index is cut back to the index length
/// (the index is unchanged). A component shorter than the index shortens the
/// index and every sibling component to its own length. The stacked matrix
/// is rebuilt afterward.
pub fn repair(instance: &mut DataInstance) -> RepairReport {
    let original_time_len = instance.len();
    let target = instance
        .components()
        .values()
        .map(|c| c.min_len())
        .fold(original_time_len, usize::min);

    let mut truncated_components = Vec::new();
    for (name, component) in instance.components_mut().iter_mut() {
        let longest = component.max_len();
        if longest > target {
            component.truncate(target);
            truncated_components.push((name.clone(), longest));
        }
    }

    if original_time_len > target {
        instance.time_mut().truncate(target);
    }
    if original_time_len != target || !truncated_components.is_empty() {
        instance.rebuild_stacked();
    }

    RepairReport {
        original_time_len,
        repaired_len: target,
        truncated_components,
    }
}

/// Repair `instance` and log a warning naming `key` when anything changed.
pub fn ensure_consistent(key: &str, instance: &mut DataInstance) -> RepairReport {
    let report = repair(instance);
    if report.changed() {
        warn!(
            "Repaired length mismatch for {key}: time index {} -> {}, truncated components {:?}",
            report.original_time_len, report.repaired_len, report.truncated_components
        );
    }
    report
}
