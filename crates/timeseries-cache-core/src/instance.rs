//! In-memory data instances: one time index plus named components.
//!
//! A [`DataInstance`] is the unit that every other module in this crate
//! operates on. It holds:
//!
//! - a time index of epoch nanoseconds (`Vec<i64>`),
//! - a map of named [`Component`]s, each either a single `Scalar` array or a
//!   `Vector` of parallel arrays (for example three magnetic-field axes),
//! - an optional *stacked matrix*, a row-major view (one row per timestamp)
//!   derived from one named component and rebuilt after every structural
//!   change.
//!
//! The central invariant is that the time index length equals the length of
//! every Scalar and of every element of every Vector. The merge engine
//! preserves it; the consistency checker repairs it when external code
//! breaks it.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::time_range::{TimeRange, from_nanos};

/// A named payload carried alongside the time index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Component {
    /// One value per timestamp.
    Scalar(Vec<f64>),
    /// An ordered list of parallel arrays, each with one value per timestamp.
    Vector(Vec<Vec<f64>>),
}

/// Shape descriptor of a [`Component`], used for structural comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    /// A single array.
    Scalar,
    /// A list of `width` parallel arrays.
    Vector {
        /// Number of parallel arrays.
        width: usize,
    },
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentKind::Scalar => write!(f, "scalar"),
            ComponentKind::Vector { width } => write!(f, "vector[{width}]"),
        }
    }
}

impl Component {
    /// Shape of this component.
    pub fn kind(&self) -> ComponentKind {
        match self {
            Component::Scalar(_) => ComponentKind::Scalar,
            Component::Vector(elems) => ComponentKind::Vector { width: elems.len() },
        }
    }

    /// Length shared by every array of this component, or `None` when the
    /// elements of a Vector disagree.
    ///
    /// A Vector with zero elements reports `Some(0)`.
    pub fn uniform_len(&self) -> Option<usize> {
        match self {
            Component::Scalar(values) => Some(values.len()),
            Component::Vector(elems) => {
                let first = elems.first().map_or(0, Vec::len);
                elems.iter().all(|e| e.len() == first).then_some(first)
            }
        }
    }

    /// Shortest array length of this component.
    pub fn min_len(&self) -> usize {
        match self {
            Component::Scalar(values) => values.len(),
            Component::Vector(elems) => elems.iter().map(Vec::len).min().unwrap_or(0),
        }
    }

    /// Longest array length of this component.
    pub fn max_len(&self) -> usize {
        match self {
            Component::Scalar(values) => values.len(),
            Component::Vector(elems) => elems.iter().map(Vec::len).max().unwrap_or(0),
        }
    }

    /// Truncate every array to at most `len` values.
    pub fn truncate(&mut self, len: usize) {
        match self {
            Component::Scalar(values) => values.truncate(len),
            Component::Vector(elems) => elems.iter_mut().for_each(|e| e.truncate(len)),
        }
    }

    /// An empty component with the same shape.
    pub fn empty_like(&self) -> Component {
        match self {
            Component::Scalar(_) => Component::Scalar(Vec::new()),
            Component::Vector(elems) => Component::Vector(vec![Vec::new(); elems.len()]),
        }
    }

    /// Gather the values at `indices` from every array.
    ///
    /// Indices past the end of an array are skipped, so a component that was
    /// already inconsistent stays visibly inconsistent instead of panicking.
    pub fn take(&self, indices: &[usize]) -> Component {
        match self {
            Component::Scalar(values) => Component::Scalar(gather(values, indices)),
            Component::Vector(elems) => {
                Component::Vector(elems.iter().map(|e| gather(e, indices)).collect())
            }
        }
    }

    /// Append `other`'s arrays to this component's arrays.
    ///
    /// The caller must have checked that both components share a kind.
    pub(crate) fn extend_from(&mut self, other: &Component) {
        match (self, other) {
            (Component::Scalar(a), Component::Scalar(b)) => a.extend_from_slice(b),
            (Component::Vector(a), Component::Vector(b)) => {
                for (dst, src) in a.iter_mut().zip(b) {
                    dst.extend_from_slice(src);
                }
            }
            _ => debug_assert!(false, "extend_from called on mismatched component kinds"),
        }
    }
}

fn gather<T: Copy>(values: &[T], indices: &[usize]) -> Vec<T> {
    indices.iter().filter_map(|&i| values.get(i).copied()).collect()
}

/// One data type's time series.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataInstance {
    time: Vec<i64>,
    components: BTreeMap<String, Component>,
    stack_source: Option<String>,
    #[serde(skip)]
    stacked: Option<Vec<Vec<f64>>>,
}

impl DataInstance {
    /// An instance with no timestamps and no components.
    pub fn empty() -> Self {
        Self::default()
    }

    /// An instance over `time` with no components yet.
    pub fn new(time: Vec<i64>) -> Self {
        Self {
            time,
            ..Self::default()
        }
    }

    /// Builder-style variant of [`DataInstance::insert_component`].
    pub fn with_component(mut self, name: impl Into<String>, component: Component) -> Self {
        self.insert_component(name, component);
        self
    }

    /// Declare which component the stacked matrix is derived from.
    pub fn with_stack_source(mut self, name: impl Into<String>) -> Self {
        self.stack_source = Some(name.into());
        self.rebuild_stacked();
        self
    }

    /// Insert or replace a component and refresh the stacked matrix.
    pub fn insert_component(&mut self, name: impl Into<String>, component: Component) {
        self.components.insert(name.into(), component);
        self.rebuild_stacked();
    }

    /// Time index (epoch nanoseconds).
    pub fn time(&self) -> &[i64] {
        &self.time
    }

    /// Number of timestamps.
    pub fn len(&self) -> usize {
        self.time.len()
    }

    /// Whether the time index is empty.
    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// All components by name.
    pub fn components(&self) -> &BTreeMap<String, Component> {
        &self.components
    }

    /// Look up one component.
    pub fn component(&self, name: &str) -> Option<&Component> {
        self.components.get(name)
    }

    /// Name of the component backing the stacked matrix.
    pub fn stack_source(&self) -> Option<&str> {
        self.stack_source.as_deref()
    }

    /// Row-major stacked matrix, when a stack source is declared and present.
    pub fn stacked(&self) -> Option<&[Vec<f64>]> {
        self.stacked.as_deref()
    }

    pub(crate) fn time_mut(&mut self) -> &mut Vec<i64> {
        &mut self.time
    }

    pub(crate) fn components_mut(&mut self) -> &mut BTreeMap<String, Component> {
        &mut self.components
    }

    /// Reassemble an instance from raw parts and rebuild the stacked matrix.
    pub(crate) fn from_parts(
        time: Vec<i64>,
        components: BTreeMap<String, Component>,
        stack_source: Option<String>,
    ) -> Self {
        let mut out = Self {
            time,
            components,
            stack_source,
            stacked: None,
        };
        out.rebuild_stacked();
        out
    }

    /// Recompute the stacked matrix from the stack source component.
    ///
    /// Rows stop at the shortest array of the source so the matrix is always
    /// rectangular.
    pub fn rebuild_stacked(&mut self) {
        let Some(source) = self.stack_source.as_deref() else {
            self.stacked = None;
            return;
        };

        self.stacked = match self.components.get(source) {
            Some(Component::Scalar(values)) => Some(values.iter().map(|v| vec![*v]).collect()),
            Some(Component::Vector(elems)) => {
                let rows = elems.iter().map(Vec::len).min().unwrap_or(0);
                Some(
                    (0..rows)
                        .map(|i| elems.iter().map(|e| e[i]).collect())
                        .collect(),
                )
            }
            None => None,
        };
    }

    /// Observed `[min, max]` span of the time index, regardless of order.
    pub fn span(&self) -> Option<TimeRange> {
        let min = *self.time.iter().min()?;
        let max = *self.time.iter().max()?;
        TimeRange::new(from_nanos(min), from_nanos(max)).ok()
    }

    /// Whether the time index is strictly increasing.
    pub fn is_strictly_sorted(&self) -> bool {
        self.time.windows(2).all(|w| w[0] < w[1])
    }

    /// Indices that stably sort the time index.
    pub fn sort_permutation(&self) -> Vec<usize> {
        let mut perm: Vec<usize> = (0..self.time.len()).collect();
        perm.sort_by_key(|&i| self.time[i]);
        perm
    }

    /// New instance holding the rows at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> DataInstance {
        let time = gather(&self.time, indices);
        let components = self
            .components
            .iter()
            .map(|(name, c)| (name.clone(), c.take(indices)))
            .collect();
        DataInstance::from_parts(time, components, self.stack_source.clone())
    }

    /// New instance holding only the rows whose timestamp lies in `window`.
    pub fn filter_time(&self, window: &TimeRange) -> DataInstance {
        let keep: Vec<usize> = self
            .time
            .iter()
            .enumerate()
            .filter(|(_, ts)| window.contains_nanos(**ts))
            .map(|(i, _)| i)
            .collect();
        self.select(&keep)
    }

    /// Sort by time (stable) and drop repeated timestamps, keeping the first
    /// occurrence of each.
    pub fn normalize(&mut self) {
        if self.is_strictly_sorted() {
            return;
        }
        let keep = dedup_sorted(&self.time, self.sort_permutation());
        *self = self.select(&keep);
    }

    /// Overwrite this instance's data with `source`'s, keeping this
    /// instance's stack source unless `source` declares one.
    pub fn replace_fields(&mut self, source: DataInstance) {
        self.time = source.time;
        self.components = source.components;
        if source.stack_source.is_some() {
            self.stack_source = source.stack_source;
        }
        self.rebuild_stacked();
    }
}

/// Walk `perm` (a stable sort permutation of `time`) and keep the first index
/// of every run of equal timestamps.
pub(crate) fn dedup_sorted(time: &[i64], perm: Vec<usize>) -> Vec<usize> {
    let mut keep = Vec::with_capacity(perm.len());
    let mut last: Option<i64> = None;
    for i in perm {
        let ts = time[i];
        if last != Some(ts) {
            keep.push(i);
            last = Some(ts);
        }
    }
    keep
}
