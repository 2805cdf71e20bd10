use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::cmp::Ordering;

use tracing::{debug, trace, warn};

use crate::{Actor, CrdtError, CrdtModel, MergeChanges, VersionMap};

/// Replicated state of a [`Count`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CountData {
    /// Partial sum contributed by each actor.
    pub values: BTreeMap<Actor, u64>,
    /// Number of operations applied from each actor.
    pub version: VersionMap,
}

/// Operations accepted by a [`Count`].
///
/// Every operation names the version range it moves its actor across, so a
/// replica can tell whether it is the next one in that actor's history.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CountOperation {
    /// Add one. `to` must be `from + 1`.
    Increment {
        /// The incrementing actor.
        actor: Actor,
        /// Version of `actor` this operation follows.
        from: u64,
        /// Version of `actor` after this operation.
        to: u64,
    },
    /// Add `delta`, possibly covering several of the actor's operations.
    MultiIncrement {
        /// The incrementing actor.
        actor: Actor,
        /// Version of `actor` this operation follows.
        from: u64,
        /// Version of `actor` after this operation.
        to: u64,
        /// Amount added. Must be positive.
        delta: u64,
    },
}

impl CountOperation {
    /// An [`Increment`](Self::Increment) moving `actor` from `from` to `from + 1`.
    pub fn increment(actor: impl Into<Actor>, from: u64) -> Self {
        Self::Increment {
            actor: actor.into(),
            from,
            to: from.saturating_add(1),
        }
    }

    /// A [`MultiIncrement`](Self::MultiIncrement) adding `delta` over the
    /// version range `from..to`.
    pub fn multi_increment(actor: impl Into<Actor>, from: u64, to: u64, delta: u64) -> Self {
        Self::MultiIncrement {
            actor: actor.into(),
            from,
            to,
            delta,
        }
    }

    /// The actor issuing this operation.
    #[must_use]
    pub fn actor(&self) -> &str {
        match self {
            Self::Increment { actor, .. } | Self::MultiIncrement { actor, .. } => actor,
        }
    }

    /// The amount this operation adds.
    #[must_use]
    pub fn delta(&self) -> u64 {
        match self {
            Self::Increment { .. } => 1,
            Self::MultiIncrement { delta, .. } => *delta,
        }
    }

    /// The `(from, to)` version range of this operation.
    #[must_use]
    pub fn versions(&self) -> (u64, u64) {
        match self {
            Self::Increment { from, to, .. } | Self::MultiIncrement { from, to, .. } => {
                (*from, *to)
            }
        }
    }
}

/// A distributed, increment-only counter.
///
/// Each actor owns one partial sum; the value is their total. Operations from
/// an actor must be applied in order, without gaps or repeats.
///
/// # Example
///
/// ```
/// use causal_crdt::prelude::*;
///
/// let mut a = Count::new();
/// assert!(a.add("a", 5));
///
/// let mut b = Count::new();
/// assert!(b.add("b", 3));
///
/// let changes = a.merge(&b.data()).unwrap();
/// for op in &changes.other_changes {
///     assert!(b.apply_operation(op));
/// }
/// assert_eq!(a.consumer_view(), 8);
/// assert_eq!(b.consumer_view(), 8);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Count {
    data: CountData,
}

impl Count {
    /// Create an empty counter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a counter holding existing data.
    #[must_use]
    pub fn from_data(data: CountData) -> Self {
        Self { data }
    }

    /// Build the operation that would add `delta` on behalf of `actor` next.
    ///
    /// This does not modify the counter. A `delta` of one yields an
    /// [`Increment`](CountOperation::Increment).
    #[must_use]
    pub fn increment_op(&self, actor: &str, delta: u64) -> CountOperation {
        let from = self.data.version.get(actor);
        if delta == 1 {
            CountOperation::increment(actor, from)
        } else {
            CountOperation::multi_increment(actor, from, from.saturating_add(1), delta)
        }
    }

    /// Add `delta` on behalf of `actor`.
    ///
    /// Returns `false` if `delta` is zero.
    pub fn add(&mut self, actor: &str, delta: u64) -> bool {
        let op = self.increment_op(actor, delta);
        self.apply_operation(&op)
    }

    /// The partial sum contributed by `actor`.
    #[must_use]
    pub fn value_for(&self, actor: &str) -> u64 {
        self.data.values.get(actor).copied().unwrap_or(0)
    }
}

impl CrdtModel for Count {
    type Data = CountData;
    type Operation = CountOperation;
    type ConsumerView = u64;

    fn version_map(&self) -> VersionMap {
        self.data.version.clone()
    }

    fn data(&self) -> CountData {
        self.data.clone()
    }

    fn consumer_view(&self) -> u64 {
        self.data
            .values
            .values()
            .fold(0u64, |sum, v| sum.saturating_add(*v))
    }

    fn merge(&mut self, other: &CountData) -> Result<MergeChanges<CountOperation>, CrdtError> {
        let mut merged = self.data.clone();
        let mut model_changes = Vec::new();
        let mut other_changes = Vec::new();

        for (actor, &other_value) in &other.values {
            let local_value = self.value_for(actor);
            let local_version = self.data.version.get(actor);
            let other_version = other.version.get(actor);
            let diverged = || {
                warn!(
                    %actor,
                    local_value, other_value, local_version, other_version,
                    "counter replicas diverged"
                );
                CrdtError::DivergentVersions {
                    actor: actor.clone(),
                    local_value,
                    other_value,
                    local_version,
                    other_version,
                }
            };

            match local_value.cmp(&other_value) {
                Ordering::Greater => {
                    if other_version >= local_version {
                        return Err(diverged());
                    }
                    other_changes.push(CountOperation::multi_increment(
                        actor.clone(),
                        other_version,
                        local_version,
                        local_value - other_value,
                    ));
                }
                Ordering::Less => {
                    if local_version >= other_version {
                        return Err(diverged());
                    }
                    model_changes.push(CountOperation::multi_increment(
                        actor.clone(),
                        local_version,
                        other_version,
                        other_value - local_value,
                    ));
                    merged.values.insert(actor.clone(), other_value);
                    merged.version.set(actor.clone(), other_version);
                }
                Ordering::Equal => {
                    if local_version != other_version {
                        return Err(diverged());
                    }
                }
            }
        }

        for (actor, &local_value) in &self.data.values {
            if other.values.contains_key(actor) {
                continue;
            }
            let local_version = self.data.version.get(actor);
            let other_version = other.version.get(actor);
            if other_version != 0 {
                warn!(
                    %actor,
                    local_value, local_version, other_version,
                    "counter replica has a version without a value"
                );
                return Err(CrdtError::DivergentVersions {
                    actor: actor.clone(),
                    local_value,
                    other_value: 0,
                    local_version,
                    other_version,
                });
            }
            other_changes.push(CountOperation::multi_increment(
                actor.clone(),
                0,
                local_version,
                local_value,
            ));
        }

        trace!(
            local = model_changes.len(),
            other = other_changes.len(),
            "merged counter"
        );
        self.data = merged;
        Ok(MergeChanges {
            model_changes,
            other_changes,
        })
    }

    fn apply_operation(&mut self, op: &CountOperation) -> bool {
        let actor = op.actor();
        let (from, to) = op.versions();
        let delta = op.delta();

        let well_formed = match op {
            CountOperation::Increment { .. } => from.checked_add(1) == Some(to),
            CountOperation::MultiIncrement { .. } => delta > 0 && to > from,
        };
        if !well_formed {
            debug!(actor, from, to, delta, "rejecting malformed increment");
            return false;
        }

        let current = self.data.version.get(actor);
        if from != current {
            debug!(actor, from, current, "rejecting out-of-order increment");
            return false;
        }

        let Some(sum) = self.value_for(actor).checked_add(delta) else {
            debug!(actor, delta, "rejecting increment that overflows");
            return false;
        };
        self.data.values.insert(actor.into(), sum);
        self.data.version.set(actor, to);
        true
    }

    fn update_data(&mut self, new_data: CountData) {
        self.data = new_data;
    }
}
