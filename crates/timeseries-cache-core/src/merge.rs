//! Merge engine: combine time-ordered datasets without duplicates.
//!
//! Merging is a concatenate-then-normalize operation:
//!
//! 1. Concatenate the time indexes of all inputs, in input order.
//! 2. Compute a *stable* sort permutation over the concatenated index.
//! 3. Walk the permutation and keep the first index of each run of equal
//!    timestamps.
//! 4. Gather every Scalar and every element of every Vector through the same
//!    selection, then rebuild the stacked matrix.
//!
//! Because the sort is stable and inputs are concatenated in order, an exact
//! timestamp collision is resolved in favour of the earlier input. For
//! [`merge`] that is the data already held (`existing`); for [`concat_all`]
//! it is the lower-numbered part.
//!
//! Inputs must agree structurally: the same component names with the same
//! kinds (and Vector widths), and each input must satisfy the length
//! invariant on its own. An input with an empty time index contributes
//! nothing and is exempt from the structural comparison, which lets the first
//! merge into a freshly created instance succeed.

use std::collections::BTreeMap;
use std::fmt;

use snafu::prelude::*;

use crate::instance::{Component, ComponentKind, DataInstance, dedup_sorted};

/// Identifies which input a merge error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The data already held by the caller.
    Existing,
    /// The newly arrived data.
    Incoming,
    /// The n-th (1-based) part passed to [`concat_all`].
    Part(usize),
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Existing => write!(f, "existing"),
            Side::Incoming => write!(f, "incoming"),
            Side::Part(n) => write!(f, "part {n}"),
        }
    }
}

/// Structural mismatches that prevent a merge.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum MergeError {
    /// A component is declared by one input but not by the other.
    #[snafu(display("Component {component:?} is present only in the {side} input"))]
    MissingComponent {
        /// Component name.
        component: String,
        /// The input that has the component.
        side: Side,
    },

    /// Both inputs declare the component but with different shapes.
    #[snafu(display(
        "Component {component:?} is {expected} in the {reference} input but {actual} in the {side} input"
    ))]
    KindMismatch {
        /// Component name.
        component: String,
        /// Input the expected shape was taken from.
        reference: Side,
        /// Shape in the reference input.
        expected: ComponentKind,
        /// Input with the conflicting shape.
        side: Side,
        /// Conflicting shape.
        actual: ComponentKind,
    },

    /// A Vector component's elements have differing lengths.
    #[snafu(display("Vector component {component:?} in the {side} input has elements of differing lengths"))]
    RaggedVector {
        /// Component name.
        component: String,
        /// Offending input.
        side: Side,
    },

    /// A component's length differs from its own input's time index length.
    #[snafu(display(
        "Component {component:?} in the {side} input has {len} values but the time index has {time_len}"
    ))]
    LengthMismatch {
        /// Component name.
        component: String,
        /// Offending input.
        side: Side,
        /// Component length.
        len: usize,
        /// Time index length of the same input.
        time_len: usize,
    },
}

/// Merge `incoming` into a copy of `existing`.
///
/// On exact timestamp collisions the row from `existing` is kept.
///
/// # Errors
///
/// Returns a [`MergeError`] when the inputs disagree structurally or an
/// input violates the length invariant.
pub fn merge(existing: &DataInstance, incoming: &DataInstance) -> Result<DataInstance, MergeError> {
    concat_checked(&[(existing, Side::Existing), (incoming, Side::Incoming)])
}

/// Concatenate any number of parts into one sorted, duplicate-free instance.
///
/// Earlier parts win on exact timestamp collisions. Used to reassemble
/// persisted segments in index order.
///
/// # Errors
///
/// Same conditions as [`merge`], with sides reported as [`Side::Part`].
pub fn concat_all(parts: &[DataInstance]) -> Result<DataInstance, MergeError> {
    let tagged: Vec<(&DataInstance, Side)> = parts
        .iter()
        .enumerate()
        .map(|(i, p)| (p, Side::Part(i + 1)))
        .collect();
    concat_checked(&tagged)
}

fn concat_checked(parts: &[(&DataInstance, Side)]) -> Result<DataInstance, MergeError> {
    let stack_source = parts
        .iter()
        .find_map(|(p, _)| p.stack_source().map(str::to_owned));

    let contributing: Vec<(&DataInstance, Side)> = parts
        .iter()
        .filter(|(p, _)| !p.is_empty())
        .copied()
        .collect();

    let Some(&(reference, reference_side)) = contributing.first() else {
        // Nothing to merge; keep the declared shape of the first input.
        let shape = parts
            .first()
            .map(|(p, _)| {
                p.components()
                    .iter()
                    .map(|(n, c)| (n.clone(), c.empty_like()))
                    .collect()
            })
            .unwrap_or_default();
        return Ok(DataInstance::from_parts(Vec::new(), shape, stack_source));
    };

    for &(part, side) in &contributing {
        validate_lengths(part, side)?;
    }
    for &(part, side) in contributing.iter().skip(1) {
        ensure_same_shape(reference, reference_side, part, side)?;
    }

    let total: usize = contributing.iter().map(|(p, _)| p.len()).sum();
    let mut time = Vec::with_capacity(total);
    let mut components: BTreeMap<String, Component> = reference
        .components()
        .iter()
        .map(|(n, c)| (n.clone(), c.empty_like()))
        .collect();

    for (part, _) in &contributing {
        time.extend_from_slice(part.time());
        for (name, dst) in components.iter_mut() {
            if let Some(src) = part.component(name) {
                dst.extend_from(src);
            }
        }
    }

    let combined = DataInstance::from_parts(time, components, stack_source);
    let keep = dedup_sorted(combined.time(), combined.sort_permutation());
    Ok(combined.select(&keep))
}

fn validate_lengths(part: &DataInstance, side: Side) -> Result<(), MergeError> {
    let time_len = part.len();
    for (name, component) in part.components() {
        let len = component
            .uniform_len()
            .context(RaggedVectorSnafu { component: name, side })?;
        ensure!(
            len == time_len,
            LengthMismatchSnafu {
                component: name,
                side,
                len,
                time_len,
            }
        );
    }
    Ok(())
}

fn ensure_same_shape(
    reference: &DataInstance,
    reference_side: Side,
    other: &DataInstance,
    side: Side,
) -> Result<(), MergeError> {
    for (name, expected) in reference.components() {
        let actual = other.component(name).context(MissingComponentSnafu {
            component: name,
            side: reference_side,
        })?;
        ensure!(
            expected.kind() == actual.kind(),
            KindMismatchSnafu {
                component: name,
                reference: reference_side,
                expected: expected.kind(),
                side,
                actual: actual.kind(),
            }
        );
    }

    if let Some(extra) = other
        .components()
        .keys()
        .find(|name| reference.component(name).is_none())
    {
        return MissingComponentSnafu {
            component: extra,
            side,
        }
        .fail();
    }
    Ok(())
}
