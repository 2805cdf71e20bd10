use alloc::vec;
use alloc::vec::Vec;

use tracing::debug;

use crate::set::{SetData, SetMerge};
use crate::{Actor, CrdtError, CrdtModel, FastForward, MergeChanges, Referenceable, VersionMap};

/// Replicated state of a [`Singleton`]: set data holding every write not yet
/// superseded by a causally later one.
pub type SingletonData<T> = SetData<T>;

/// Operations accepted by a [`Singleton`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SingletonOperation<T> {
    /// Replace every value `clock` has observed with `value`.
    Update {
        /// The writing actor.
        actor: Actor,
        /// Must carry the actor's next version.
        clock: VersionMap,
        /// The new value.
        value: T,
    },
    /// Drop every value `clock` has observed.
    Clear {
        /// The clearing actor.
        actor: Actor,
        /// Must carry the actor's current version.
        clock: VersionMap,
    },
    /// Batch catch-up produced by a merge.
    FastForward(FastForward<T>),
}

/// A distributed register holding at most one visible value.
///
/// Each update clears whatever the writer has observed and adds the new
/// value. Concurrent updates both survive in the data; the visible value is
/// the one whose version is greatest under [`VersionMap::cmp_last_writer`],
/// with the item id breaking exact ties. A later update from any actor that
/// has observed both replaces them.
///
/// # Example
///
/// ```
/// use causal_crdt::prelude::*;
///
/// let mut alice = Singleton::new();
/// let mut bob = Singleton::new();
/// assert!(alice.update("alice", String::from("tea")));
/// assert!(bob.update("bob", String::from("coffee")));
///
/// let changes = alice.merge(&bob.data()).unwrap();
/// for op in &changes.other_changes {
///     assert!(bob.apply_operation(op));
/// }
///
/// // Concurrent writes: the greater actor id wins everywhere.
/// assert_eq!(alice.consumer_view().as_deref(), Some("coffee"));
/// assert_eq!(bob.consumer_view().as_deref(), Some("coffee"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Singleton<T> {
    data: SetData<T>,
}

impl<T> Default for Singleton<T> {
    fn default() -> Self {
        Self {
            data: SetData::default(),
        }
    }
}

impl<T: Referenceable + Clone + Ord> Singleton<T> {
    /// Create an empty singleton.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a singleton holding existing data.
    #[must_use]
    pub fn from_data(data: SingletonData<T>) -> Self {
        Self { data }
    }

    /// Build the operation writing `value` as `actor`'s next write.
    #[must_use]
    pub fn update_op(&self, actor: &str, value: T) -> SingletonOperation<T> {
        let mut clock = self.data.version.clone();
        // Left unchanged on overflow, which the add then rejects.
        clock.increment(actor);
        SingletonOperation::Update {
            actor: actor.into(),
            clock,
            value,
        }
    }

    /// Build the operation clearing everything this replica has observed.
    #[must_use]
    pub fn clear_op(&self, actor: &str) -> SingletonOperation<T> {
        SingletonOperation::Clear {
            actor: actor.into(),
            clock: self.data.version.clone(),
        }
    }

    /// Write `value` on behalf of `actor`.
    pub fn update(&mut self, actor: &str, value: T) -> bool {
        let op = self.update_op(actor, value);
        self.apply_operation(&op)
    }

    /// Clear the singleton on behalf of `actor`.
    pub fn clear(&mut self, actor: &str) -> bool {
        let op = self.clear_op(actor);
        self.apply_operation(&op)
    }

    /// Number of concurrent writes currently held.
    #[must_use]
    pub fn candidates(&self) -> usize {
        self.data.values.len()
    }
}

impl<T: Referenceable + Clone + Ord> SetData<T> {
    pub(crate) fn update_singleton(&mut self, actor: &str, clock: &VersionMap, value: &T) -> bool {
        let mut next = self.clone();
        next.remove_dominated(clock);
        if !next.add(actor, clock, value) {
            return false;
        }
        *self = next;
        true
    }

    pub(crate) fn clear_observed(&mut self, actor: &str, clock: &VersionMap) -> bool {
        if clock.get(actor) != self.version.get(actor) {
            debug!(
                actor,
                expected = self.version.get(actor),
                got = clock.get(actor),
                "rejecting clear at wrong version"
            );
            return false;
        }
        self.remove_dominated(clock);
        true
    }

    pub(crate) fn last_written(&self) -> Option<&T> {
        self.values
            .values()
            .max_by(|a, b| {
                a.version
                    .cmp_last_writer(&b.version)
                    .then_with(|| a.value.id().cmp(b.value.id()))
            })
            .map(|entry| &entry.value)
    }
}

fn into_changes<T>(ff: FastForward<T>) -> Vec<SingletonOperation<T>> {
    if ff.is_effectful() {
        vec![SingletonOperation::FastForward(ff)]
    } else {
        Vec::new()
    }
}

impl<T: Referenceable + Clone + Ord> CrdtModel for Singleton<T> {
    type Data = SingletonData<T>;
    type Operation = SingletonOperation<T>;
    type ConsumerView = Option<T>;

    fn version_map(&self) -> VersionMap {
        self.data.version.clone()
    }

    fn data(&self) -> SingletonData<T> {
        self.data.clone()
    }

    fn consumer_view(&self) -> Option<T> {
        self.data.last_written().cloned()
    }

    fn merge(
        &mut self,
        other: &SingletonData<T>,
    ) -> Result<MergeChanges<SingletonOperation<T>>, CrdtError> {
        let SetMerge {
            merged,
            local,
            other,
        } = self.data.merge_with(other);
        self.data = merged;
        Ok(MergeChanges {
            model_changes: into_changes(local),
            other_changes: into_changes(other),
        })
    }

    fn apply_operation(&mut self, op: &SingletonOperation<T>) -> bool {
        match op {
            SingletonOperation::Update {
                actor,
                clock,
                value,
            } => self.data.update_singleton(actor, clock, value),
            SingletonOperation::Clear { actor, clock } => self.data.clear_observed(actor, clock),
            SingletonOperation::FastForward(ff) => self.data.fast_forward(ff),
        }
    }

    fn update_data(&mut self, new_data: SingletonData<T>) {
        self.data = new_data;
    }
}
