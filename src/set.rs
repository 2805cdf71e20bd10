use alloc::collections::{BTreeMap, BTreeSet};
use alloc::vec;
use alloc::vec::Vec;
use core::cmp::Ordering;

use tracing::{debug, trace};

use crate::{Actor, CrdtError, CrdtModel, MergeChanges, ReferenceId, Referenceable, VersionMap};

/// An item stored in a [`SetData`], with the version at which it was added.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DataValue<T> {
    /// Merge of the clocks of every add that contributed to this item.
    pub version: VersionMap,
    /// The item itself.
    pub value: T,
}

/// Replicated state of a [`Set`].
///
/// Every entry's version is dominated by the overall `version`. Removed items
/// leave no tombstone: the overall clock remembers that their adds were seen.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SetData<T> {
    /// Live items keyed by their id.
    pub values: BTreeMap<ReferenceId, DataValue<T>>,
    /// Number of adds applied from each actor.
    pub version: VersionMap,
}

impl<T> Default for SetData<T> {
    fn default() -> Self {
        Self {
            values: BTreeMap::new(),
            version: VersionMap::new(),
        }
    }
}

/// A batch that catches a lagging replica up with a newer one.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FastForward<T> {
    /// Clock the receiver must already dominate.
    pub old_clock: VersionMap,
    /// Clock the receiver reaches after applying the batch.
    pub new_clock: VersionMap,
    /// Items to add, or whose versions to widen.
    pub added: Vec<DataValue<T>>,
    /// Items to drop, if `new_clock` covers every add they carry.
    pub removed: Vec<T>,
}

impl<T> FastForward<T> {
    /// An empty batch moving from `old_clock` to `new_clock`.
    #[must_use]
    pub fn new(old_clock: VersionMap, new_clock: VersionMap) -> Self {
        Self {
            old_clock,
            new_clock,
            added: Vec::new(),
            removed: Vec::new(),
        }
    }

    /// Returns `true` if applying this batch could change anything.
    #[must_use]
    pub fn is_effectful(&self) -> bool {
        self.carries_items() || self.old_clock != self.new_clock
    }

    pub(crate) fn carries_items(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }
}

impl<T: Clone> FastForward<T> {
    /// Rewrite this batch as plain [`SetOperation::Add`]s where that is lossless.
    ///
    /// Only batches without removals whose additions all come from one actor,
    /// numbered contiguously from `old_clock` up to `new_clock`, can be
    /// rewritten. Anything else is returned unchanged as a single operation.
    #[must_use]
    pub fn simplify(self) -> Vec<SetOperation<T>> {
        if !self.removed.is_empty() || self.added.is_empty() {
            return vec![SetOperation::FastForward(self)];
        }

        let increments = self.new_clock.difference(&self.old_clock);
        let actor: Actor = match increments.actors().next() {
            Some(actor) if increments.len() == 1 => actor.into(),
            _ => return vec![SetOperation::FastForward(self)],
        };

        let mut adds = self.added.clone();
        adds.sort_by_key(|entry| entry.version.get(&actor));

        let mut expected = self.old_clock.get(&actor);
        for entry in &adds {
            expected = match expected.checked_add(1) {
                Some(next) if entry.version.get(&actor) == next => next,
                _ => return vec![SetOperation::FastForward(self)],
            };
        }

        let mut expected_clock = self.old_clock.clone();
        expected_clock.set(actor.as_str(), expected);
        if expected_clock != self.new_clock {
            return vec![SetOperation::FastForward(self)];
        }

        adds.into_iter()
            .map(|entry| SetOperation::Add {
                actor: actor.clone(),
                clock: entry.version,
                added: entry.value,
            })
            .collect()
    }

    pub(crate) fn into_changes(self) -> Vec<SetOperation<T>> {
        if self.is_effectful() {
            self.simplify()
        } else {
            Vec::new()
        }
    }
}

/// Operations accepted by a [`Set`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SetOperation<T> {
    /// Add `added`. `clock[actor]` must be the actor's next version.
    Add {
        /// The adding actor.
        actor: Actor,
        /// The actor's view of the world when adding.
        clock: VersionMap,
        /// The item.
        added: T,
    },
    /// Remove `removed`. `clock[actor]` must equal the actor's current version
    /// and `clock` must dominate every add of the item.
    Remove {
        /// The removing actor.
        actor: Actor,
        /// The actor's view of the world when removing.
        clock: VersionMap,
        /// The item.
        removed: T,
    },
    /// Batch catch-up produced by a merge.
    FastForward(FastForward<T>),
}

/// Result of reconciling two [`SetData`] values.
pub(crate) struct SetMerge<T> {
    pub(crate) merged: SetData<T>,
    /// Turns the local pre-merge data into `merged`.
    pub(crate) local: FastForward<T>,
    /// Turns the other pre-merge data into `merged`.
    pub(crate) other: FastForward<T>,
}

fn has_id<T: Referenceable>(value: &T) -> bool {
    !value.id().is_empty()
}

/// Whether `incoming`'s payload replaces `existing`'s for the same id.
///
/// The later write under [`VersionMap::cmp_last_writer`] wins, so an add that
/// causally follows the stored one always replaces it. Equal versions fall back
/// to the greater payload.
fn overrides<T: Ord>(incoming: &DataValue<T>, existing: &DataValue<T>) -> bool {
    match incoming.version.cmp_last_writer(&existing.version) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => incoming.value > existing.value,
    }
}

impl<T: Referenceable + Clone + Ord> SetData<T> {
    pub(crate) fn add(&mut self, actor: &str, clock: &VersionMap, value: &T) -> bool {
        if !has_id(value) {
            debug!(actor, "rejecting add of item without id");
            return false;
        }
        let Some(expected) = self.version.get(actor).checked_add(1) else {
            debug!(actor, "rejecting add past the last version");
            return false;
        };
        if clock.get(actor) != expected {
            debug!(actor, expected, got = clock.get(actor), "rejecting non-contiguous add");
            return false;
        }

        self.version.set(actor, expected);
        self.absorb(DataValue {
            version: clock.clone(),
            value: value.clone(),
        });
        true
    }

    pub(crate) fn remove(&mut self, actor: &str, clock: &VersionMap, value: &T) -> bool {
        let Some(existing) = self.values.get(value.id()) else {
            debug!(actor, id = value.id(), "rejecting remove of absent item");
            return false;
        };
        if clock.get(actor) != self.version.get(actor) {
            debug!(
                actor,
                expected = self.version.get(actor),
                got = clock.get(actor),
                "rejecting remove at wrong version"
            );
            return false;
        }
        if !clock.dominates(&existing.version) {
            debug!(
                actor,
                clock = %clock,
                item = %existing.version,
                "rejecting remove of unobserved add"
            );
            return false;
        }

        self.values.remove(value.id());
        true
    }

    pub(crate) fn fast_forward(&mut self, op: &FastForward<T>) -> bool {
        if !self.version.dominates(&op.old_clock) {
            debug!(
                current = %self.version,
                old = %op.old_clock,
                "rejecting fast-forward from the future"
            );
            return false;
        }
        if !op.added.iter().all(|entry| has_id(&entry.value)) || !op.removed.iter().all(has_id) {
            debug!("rejecting fast-forward carrying items without id");
            return false;
        }

        // An absent item whose adds are all covered was removed here.
        for entry in &op.added {
            let held = self.values.contains_key(entry.value.id());
            if held || !self.version.dominates(&entry.version) {
                self.absorb(entry.clone());
            }
        }

        for value in &op.removed {
            let covered = self
                .values
                .get(value.id())
                .is_some_and(|existing| op.new_clock.dominates(&existing.version));
            if covered {
                self.values.remove(value.id());
            }
        }

        self.version.merge_from(&op.new_clock);
        true
    }

    /// Drop every entry whose adds are all covered by `clock`.
    pub(crate) fn remove_dominated(&mut self, clock: &VersionMap) {
        self.values
            .retain(|_, existing| !clock.dominates(&existing.version));
    }

    /// Insert `entry`, or widen the existing entry with the same id.
    fn absorb(&mut self, entry: DataValue<T>) {
        match self.values.get_mut(entry.value.id()) {
            Some(existing) => {
                if overrides(&entry, existing) {
                    existing.value = entry.value;
                }
                existing.version.merge_from(&entry.version);
            }
            None => {
                self.values.insert(entry.value.id().into(), entry);
            }
        }
    }

    pub(crate) fn merge_with(&self, other: &Self) -> SetMerge<T> {
        let new_clock = self.version.merge(&other.version);
        let mut merged = SetData {
            values: BTreeMap::new(),
            version: new_clock.clone(),
        };
        let mut local = FastForward::new(self.version.clone(), new_clock.clone());
        let mut remote = FastForward::new(other.version.clone(), new_clock);

        for (id, theirs) in &other.values {
            match self.values.get(id) {
                Some(mine) => {
                    let winner = if overrides(theirs, mine) { theirs } else { mine };
                    let combined = DataValue {
                        version: mine.version.merge(&theirs.version),
                        value: winner.value.clone(),
                    };
                    if combined != *theirs {
                        remote.added.push(combined.clone());
                    }
                    if combined != *mine {
                        local.added.push(combined.clone());
                    }
                    merged.values.insert(id.clone(), combined);
                }
                // Seen here and then removed.
                None if self.version.dominates(&theirs.version) => {
                    remote.removed.push(theirs.value.clone());
                }
                None => {
                    local.added.push(theirs.clone());
                    merged.values.insert(id.clone(), theirs.clone());
                }
            }
        }

        for (id, mine) in &self.values {
            if other.values.contains_key(id) {
                continue;
            }
            if other.version.dominates(&mine.version) {
                local.removed.push(mine.value.clone());
            } else {
                remote.added.push(mine.clone());
                merged.values.insert(id.clone(), mine.clone());
            }
        }

        trace!(
            clock = %merged.version,
            local_added = local.added.len(),
            local_removed = local.removed.len(),
            other_added = remote.added.len(),
            other_removed = remote.removed.len(),
            "merged set data"
        );
        SetMerge {
            merged,
            local,
            other: remote,
        }
    }

    pub(crate) fn items(&self) -> BTreeSet<T> {
        self.values.values().map(|entry| entry.value.clone()).collect()
    }
}

/// A distributed set of identity-bearing items with observed-remove semantics.
///
/// Adds from one actor must arrive in order. A remove only succeeds once it
/// causally follows every add that contributed to the item, so a concurrent
/// add is never silently lost.
///
/// # Example
///
/// ```
/// use causal_crdt::prelude::*;
///
/// let mut r1 = Set::new();
/// assert!(r1.add("r1", String::from("x")));
///
/// let mut r2 = Set::new();
/// r2.merge(&r1.data()).unwrap();
/// assert!(r2.add("r2", String::from("y")));
///
/// let changes = r1.merge(&r2.data()).unwrap();
/// for op in &changes.other_changes {
///     assert!(r2.apply_operation(op));
/// }
/// assert_eq!(r1.consumer_view(), r2.consumer_view());
/// assert_eq!(r1.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Set<T> {
    data: SetData<T>,
}

impl<T> Default for Set<T> {
    fn default() -> Self {
        Self {
            data: SetData::default(),
        }
    }
}

impl<T: Referenceable + Clone + Ord> Set<T> {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a set holding existing data.
    #[must_use]
    pub fn from_data(data: SetData<T>) -> Self {
        Self { data }
    }

    /// Build the operation adding `item` as `actor`'s next add.
    #[must_use]
    pub fn add_op(&self, actor: &str, item: T) -> SetOperation<T> {
        let mut clock = self.data.version.clone();
        // Left unchanged on overflow, which the add then rejects.
        clock.increment(actor);
        SetOperation::Add {
            actor: actor.into(),
            clock,
            added: item,
        }
    }

    /// Build the operation removing `item` as `actor`, citing everything this
    /// replica has seen.
    #[must_use]
    pub fn remove_op(&self, actor: &str, item: T) -> SetOperation<T> {
        SetOperation::Remove {
            actor: actor.into(),
            clock: self.data.version.clone(),
            removed: item,
        }
    }

    /// Add `item` on behalf of `actor`.
    pub fn add(&mut self, actor: &str, item: T) -> bool {
        let op = self.add_op(actor, item);
        self.apply_operation(&op)
    }

    /// Remove `item` on behalf of `actor`.
    pub fn remove(&mut self, actor: &str, item: T) -> bool {
        let op = self.remove_op(actor, item);
        self.apply_operation(&op)
    }

    /// Returns `true` if an item with `id` is present.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.data.values.contains_key(id)
    }

    /// Number of live items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.values.len()
    }

    /// Returns `true` if the set holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.values.is_empty()
    }

    /// Iterate over the live items in id order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.data.values.values().map(|entry| &entry.value)
    }
}

impl<T: Referenceable + Clone + Ord> CrdtModel for Set<T> {
    type Data = SetData<T>;
    type Operation = SetOperation<T>;
    type ConsumerView = BTreeSet<T>;

    fn version_map(&self) -> VersionMap {
        self.data.version.clone()
    }

    fn data(&self) -> SetData<T> {
        self.data.clone()
    }

    fn consumer_view(&self) -> BTreeSet<T> {
        self.data.items()
    }

    fn merge(&mut self, other: &SetData<T>) -> Result<MergeChanges<SetOperation<T>>, CrdtError> {
        let SetMerge {
            merged,
            local,
            other,
        } = self.data.merge_with(other);
        self.data = merged;
        Ok(MergeChanges {
            model_changes: local.into_changes(),
            other_changes: other.into_changes(),
        })
    }

    fn apply_operation(&mut self, op: &SetOperation<T>) -> bool {
        match op {
            SetOperation::Add {
                actor,
                clock,
                added,
            } => self.data.add(actor, clock, added),
            SetOperation::Remove {
                actor,
                clock,
                removed,
            } => self.data.remove(actor, clock, removed),
            SetOperation::FastForward(ff) => self.data.fast_forward(ff),
        }
    }

    fn update_data(&mut self, new_data: SetData<T>) {
        self.data = new_data;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::String;

    fn vm(entries: &[(&str, u64)]) -> VersionMap {
        entries.iter().map(|&(a, v)| (a, v)).collect()
    }

    fn add(actor: &str, clock: &[(&str, u64)], id: &str) -> SetOperation<String> {
        SetOperation::Add {
            actor: actor.into(),
            clock: vm(clock),
            added: id.into(),
        }
    }

    fn remove(actor: &str, clock: &[(&str, u64)], id: &str) -> SetOperation<String> {
        SetOperation::Remove {
            actor: actor.into(),
            clock: vm(clock),
            removed: id.into(),
        }
    }

    fn entry(clock: &[(&str, u64)], id: &str) -> DataValue<String> {
        DataValue {
            version: vm(clock),
            value: id.into(),
        }
    }

    fn ids(set: &Set<String>) -> Vec<&str> {
        set.iter().map(String::as_str).collect()
    }

    /// An item whose payload changes while its id stays put.
    #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
    struct Doc {
        id: String,
        rev: u32,
    }

    impl Referenceable for Doc {
        fn id(&self) -> &str {
            &self.id
        }
    }

    fn doc(rev: u32) -> Doc {
        Doc {
            id: "doc".into(),
            rev,
        }
    }

    fn rev(set: &Set<Doc>) -> Option<u32> {
        set.iter().next().map(|d| d.rev)
    }

    #[test]
    fn starts_empty() {
        let s = Set::<String>::new();
        assert!(s.is_empty());
        assert!(s.consumer_view().is_empty());
    }

    #[test]
    fn adds_two_items_from_same_actor() {
        let mut s = Set::new();
        assert!(s.apply_operation(&add("alice", &[("alice", 1)], "one")));
        assert!(s.apply_operation(&add("alice", &[("alice", 2)], "two")));
        assert_eq!(ids(&s), vec!["one", "two"]);
    }

    #[test]
    fn same_item_from_different_actors_accumulates_versions() {
        let mut s = Set::new();
        assert!(s.apply_operation(&add("alice", &[("alice", 1)], "one")));
        assert!(s.apply_operation(&add("bob", &[("bob", 1)], "one")));
        assert_eq!(s.len(), 1);
        assert_eq!(
            s.data().values["one"].version,
            vm(&[("alice", 1), ("bob", 1)])
        );
    }

    #[test]
    fn rejects_adds_out_of_sequence() {
        let mut s = Set::new();
        assert!(s.apply_operation(&add("alice", &[("alice", 1)], "one")));
        let before = s.data();
        assert!(!s.apply_operation(&add("alice", &[("alice", 0)], "two")));
        assert!(!s.apply_operation(&add("alice", &[("alice", 1)], "two")));
        assert!(!s.apply_operation(&add("alice", &[("alice", 3)], "two")));
        assert_eq!(s.data(), before);
    }

    #[test]
    fn later_add_replaces_payload() {
        let mut s = Set::new();
        assert!(s.add("a", doc(2)));
        assert!(s.add("a", doc(1)));
        assert_eq!(s.len(), 1);
        assert_eq!(rev(&s), Some(1));
        assert_eq!(s.data().values["doc"].version, vm(&[("a", 2)]));
    }

    #[test]
    fn concurrent_payloads_converge_in_any_merge_order() {
        let mut first = Set::new();
        assert!(first.add("x", doc(9)));
        let mut rewritten = first.clone();
        assert!(rewritten.add("x", doc(0)));
        let mut other = Set::new();
        assert!(other.add("y", doc(1)));

        let mut one = first.clone();
        one.merge(&other.data()).unwrap();
        one.merge(&rewritten.data()).unwrap();

        let mut two = other.clone();
        two.merge(&rewritten.data()).unwrap();
        two.merge(&first.data()).unwrap();

        assert_eq!(one.data(), two.data());
        assert_eq!(rev(&one), Some(1));
        assert_eq!(one.data().values["doc"].version, vm(&[("x", 2), ("y", 1)]));
    }

    #[test]
    fn merge_ships_replaced_payload_to_the_other_side() {
        let mut alice = Set::new();
        assert!(alice.add("a", doc(5)));
        let mut bob = alice.clone();
        assert!(alice.add("a", doc(3)));

        let changes = alice.merge(&bob.data()).unwrap();
        assert!(changes.model_changes.is_empty());
        for op in &changes.other_changes {
            assert!(bob.apply_operation(op));
        }
        assert_eq!(rev(&bob), Some(3));
        assert_eq!(alice.data(), bob.data());
    }

    #[test]
    fn add_rejected_once_actor_version_is_exhausted() {
        let mut s = Set::new();
        let ff = FastForward::new(VersionMap::new(), vm(&[("a", u64::MAX)]));
        assert!(s.apply_operation(&SetOperation::FastForward(ff)));

        let SetOperation::Add { clock, .. } = s.add_op("a", String::from("y")) else {
            panic!("expected an add");
        };
        assert_eq!(clock.get("a"), u64::MAX);
        assert!(!s.add("a", String::from("y")));
        assert!(s.is_empty());
        assert_eq!(s.version_map(), vm(&[("a", u64::MAX)]));
    }

    #[test]
    fn rejects_items_without_id() {
        let mut s = Set::new();
        assert!(!s.apply_operation(&add("alice", &[("alice", 1)], "")));
        assert!(s.version_map().is_empty());
    }

    #[test]
    fn remove_removes_an_item() {
        let mut s = Set::new();
        assert!(s.apply_operation(&add("alice", &[("alice", 1)], "one")));
        assert!(s.apply_operation(&remove("alice", &[("alice", 1)], "one")));
        assert!(s.is_empty());
        assert_eq!(s.version_map(), vm(&[("alice", 1)]));
    }

    #[test]
    fn remove_rejected_on_version_mismatch() {
        let mut s = Set::new();
        assert!(s.apply_operation(&add("alice", &[("alice", 1)], "one")));
        assert!(!s.apply_operation(&remove("alice", &[("alice", 2)], "one")));
        assert!(!s.apply_operation(&remove("alice", &[("alice", 0)], "one")));
        assert!(s.contains("one"));
    }

    #[test]
    fn remove_rejected_for_absent_item() {
        let mut s = Set::new();
        assert!(s.apply_operation(&add("alice", &[("alice", 1)], "one")));
        assert!(!s.apply_operation(&remove("alice", &[("alice", 1)], "two")));
    }

    #[test]
    fn remove_rejected_when_clock_is_too_old() {
        let mut s = Set::new();
        assert!(s.apply_operation(&add("alice", &[("alice", 1)], "one")));
        assert!(s.apply_operation(&add("bob", &[("bob", 1)], "two")));
        assert!(s.apply_operation(&remove("charlie", &[("alice", 1)], "one")));
        assert!(!s.apply_operation(&remove("charlie", &[("alice", 1)], "two")));
        assert_eq!(ids(&s), vec!["two"]);
    }

    #[test]
    fn merge_reconciles_concurrent_adds_and_removes() {
        let mut alice = Set::new();
        let mut bob = Set::new();
        for op in [
            add("charlie", &[("charlie", 1)], "kept by both"),
            add("charlie", &[("charlie", 2)], "removed by alice"),
            add("charlie", &[("charlie", 3)], "removed by bob"),
            add("charlie", &[("charlie", 4)], "removed by alice added by bob"),
            add("charlie", &[("charlie", 5)], "removed by bob added by alice"),
        ] {
            assert!(alice.apply_operation(&op));
            assert!(bob.apply_operation(&op));
        }

        for op in [
            remove("alice", &[("charlie", 5)], "removed by alice"),
            add("alice", &[("alice", 1), ("charlie", 5)], "added by alice"),
            add("alice", &[("alice", 2), ("charlie", 5)], "added by both"),
            add("alice", &[("alice", 3), ("charlie", 5)], "removed by bob added by alice"),
            remove("alice", &[("alice", 3), ("charlie", 5)], "removed by alice added by bob"),
        ] {
            assert!(alice.apply_operation(&op), "alice: {op:?}");
        }

        for op in [
            add("bob", &[("bob", 1), ("charlie", 5)], "added by both"),
            add("bob", &[("bob", 2), ("charlie", 5)], "added by bob"),
            remove("bob", &[("bob", 2), ("charlie", 5)], "removed by bob"),
            remove("bob", &[("bob", 2), ("charlie", 5)], "removed by bob added by alice"),
            add("bob", &[("bob", 3), ("charlie", 5)], "removed by alice added by bob"),
        ] {
            assert!(bob.apply_operation(&op), "bob: {op:?}");
        }

        let changes = alice.merge(&bob.data()).unwrap();
        let expected_version = vm(&[("alice", 3), ("bob", 3), ("charlie", 5)]);

        let data = alice.data();
        assert_eq!(data.version, expected_version);
        let expected_values: BTreeMap<String, DataValue<String>> = [
            entry(&[("charlie", 1)], "kept by both"),
            entry(&[("bob", 3), ("charlie", 5)], "removed by alice added by bob"),
            entry(&[("alice", 3), ("charlie", 5)], "removed by bob added by alice"),
            entry(&[("alice", 1), ("charlie", 5)], "added by alice"),
            entry(&[("bob", 2), ("charlie", 5)], "added by bob"),
            entry(&[("alice", 2), ("bob", 1), ("charlie", 5)], "added by both"),
        ]
        .into_iter()
        .map(|e| (e.value.clone(), e))
        .collect();
        assert_eq!(data.values, expected_values);

        assert_eq!(changes.other_changes.len(), 1);
        let SetOperation::FastForward(ff) = &changes.other_changes[0] else {
            panic!("expected a fast-forward, got {:?}", changes.other_changes);
        };
        let added: BTreeSet<_> = ff.added.iter().map(|e| e.value.as_str()).collect();
        assert_eq!(
            added,
            BTreeSet::from([
                "added by both",
                "removed by bob added by alice",
                "added by alice"
            ])
        );
        assert_eq!(ff.removed, vec![String::from("removed by alice")]);
        assert_eq!(ff.old_clock, vm(&[("bob", 3), ("charlie", 5)]));
        assert_eq!(ff.new_clock, expected_version);

        assert!(bob.apply_operation(&changes.other_changes[0]));
        assert_eq!(alice.data(), bob.data());
    }

    #[test]
    fn model_changes_replay_the_merge_locally() {
        let mut alice = Set::new();
        alice.add("alice", String::from("a1"));
        let base = alice.data();
        alice.add("alice", String::from("a2"));

        let mut bob = Set::from_data(base.clone());
        bob.add("bob", String::from("b1"));
        bob.remove("bob", String::from("a1"));

        let before = alice.data();
        let changes = alice.merge(&bob.data()).unwrap();

        let mut replay = Set::from_data(before);
        for op in &changes.model_changes {
            assert!(replay.apply_operation(op));
        }
        assert_eq!(replay.data(), alice.data());
        assert_eq!(ids(&alice), vec!["a2", "b1"]);
    }

    #[test]
    fn merge_simplifies_single_actor_adds() {
        let mut alice = Set::new();
        let mut bob = Set::new();
        for op in [
            add("alice", &[("alice", 1)], "zero"),
            add("bob", &[("bob", 1)], "one"),
        ] {
            assert!(alice.apply_operation(&op));
            assert!(bob.apply_operation(&op));
        }

        let expected = vec![
            add("bob", &[("alice", 1), ("bob", 2)], "two"),
            add("bob", &[("alice", 1), ("bob", 3)], "three"),
            add("bob", &[("alice", 1), ("bob", 4)], "four"),
            add("bob", &[("alice", 1), ("bob", 5)], "five"),
        ];
        for op in &expected {
            assert!(bob.apply_operation(op));
        }

        let changes = bob.merge(&alice.data()).unwrap();
        assert_eq!(changes.other_changes, expected);
        assert!(changes.model_changes.is_empty());
    }

    #[test]
    fn fast_forward_rejected_when_it_begins_in_the_future() {
        let mut s = Set::<String>::new();
        let ff = FastForward::new(vm(&[("alice", 5)]), vm(&[("alice", 10)]));
        assert!(!s.apply_operation(&SetOperation::FastForward(ff)));
        assert!(s.version_map().is_empty());
    }

    #[test]
    fn fast_forward_ignores_additions_it_already_covers() {
        let mut s = Set::new();
        for op in [
            add("alice", &[("alice", 1)], "one"),
            add("alice", &[("alice", 2)], "two"),
            add("alice", &[("alice", 3)], "three"),
        ] {
            assert!(s.apply_operation(&op));
        }

        let mut ff = FastForward::new(vm(&[("alice", 1)]), vm(&[("alice", 2)]));
        ff.added.push(entry(&[("alice", 2)], "four"));
        assert!(s.apply_operation(&SetOperation::FastForward(ff)));
        assert!(!s.contains("four"));
        assert_eq!(s.version_map(), vm(&[("alice", 3)]));
    }

    #[test]
    fn fast_forward_advances_the_clock() {
        let mut s = Set::new();
        for op in [
            add("alice", &[("alice", 1)], "one"),
            add("alice", &[("alice", 2)], "two"),
            add("bob", &[("bob", 1)], "three"),
            add("charlie", &[("charlie", 1)], "four"),
        ] {
            assert!(s.apply_operation(&op));
        }

        let ff = FastForward::new(
            vm(&[("alice", 2), ("bob", 1)]),
            vm(&[("alice", 27), ("bob", 45)]),
        );
        assert!(s.apply_operation(&SetOperation::FastForward(ff)));
        assert_eq!(
            s.version_map(),
            vm(&[("alice", 27), ("bob", 45), ("charlie", 1)])
        );
    }

    #[test]
    fn fast_forward_adds_and_widens_items() {
        let mut s = Set::new();
        assert!(s.apply_operation(&add("alice", &[("alice", 1)], "one")));
        assert!(s.apply_operation(&add("bob", &[("bob", 1)], "two")));

        let mut ff = FastForward::new(
            vm(&[("alice", 1), ("bob", 1)]),
            vm(&[("alice", 1), ("bob", 9)]),
        );
        ff.added.push(entry(&[("alice", 1), ("bob", 7)], "one"));
        ff.added.push(entry(&[("alice", 1), ("bob", 9)], "four"));
        assert!(s.apply_operation(&SetOperation::FastForward(ff)));

        assert!(s.apply_operation(&remove("alice", &[("alice", 1), ("bob", 1)], "two")));
        assert!(s.apply_operation(&add("alice", &[("alice", 2), ("bob", 1)], "three")));

        let expected: BTreeMap<String, DataValue<String>> = [
            entry(&[("alice", 1), ("bob", 7)], "one"),
            entry(&[("alice", 2), ("bob", 1)], "three"),
            entry(&[("alice", 1), ("bob", 9)], "four"),
        ]
        .into_iter()
        .map(|e| (e.value.clone(), e))
        .collect();
        assert_eq!(s.version_map(), vm(&[("alice", 2), ("bob", 9)]));
        assert_eq!(s.data().values, expected);
    }

    #[test]
    fn fast_forward_removes_only_covered_items() {
        let mut s = Set::new();
        for op in [
            add("alice", &[("alice", 1)], "one"),
            add("alice", &[("alice", 2)], "two"),
            add("bob", &[("bob", 1)], "three"),
        ] {
            assert!(s.apply_operation(&op));
        }

        let mut ff = FastForward::new(
            vm(&[("alice", 1), ("bob", 1)]),
            vm(&[("alice", 1), ("bob", 5)]),
        );
        ff.removed = vec![String::from("one"), String::from("two")];
        assert!(s.apply_operation(&SetOperation::FastForward(ff)));

        assert_eq!(ids(&s), vec!["three", "two"]);
        assert_eq!(s.version_map(), vm(&[("alice", 2), ("bob", 5)]));
    }

    #[test]
    fn fast_forward_removals_apply_even_when_clock_is_covered() {
        let mut s = Set::new();
        assert!(s.apply_operation(&add("alice", &[("alice", 1)], "one")));

        let mut ff = FastForward::new(vm(&[("alice", 1)]), vm(&[("alice", 1)]));
        ff.removed.push(String::from("one"));
        assert!(s.apply_operation(&SetOperation::FastForward(ff)));
        assert!(s.is_empty());
    }

    #[test]
    fn fast_forward_widens_held_items_when_clock_is_covered() {
        let mut alice = Set::new();
        assert!(alice.add("alice", String::from("x")));
        let mut bob = Set::from_data(alice.data());
        assert!(bob.remove("bob", String::from("x")));
        let mut charlie = Set::new();
        assert!(charlie.add("charlie", String::from("x")));

        bob.merge(&charlie.data()).unwrap();
        assert!(bob.version_map().dominates(&alice.version_map()));

        let changes = alice.merge(&bob.data()).unwrap();
        for op in &changes.other_changes {
            assert!(bob.apply_operation(op));
        }
        assert_eq!(alice.data(), bob.data());
        assert_eq!(
            bob.data().values["x"].version,
            vm(&[("alice", 1), ("charlie", 1)])
        );
    }

    #[test]
    fn simplifies_single_add() {
        let mut ff = FastForward::new(
            vm(&[("alice", 1), ("bob", 1)]),
            vm(&[("alice", 2), ("bob", 1)]),
        );
        ff.added.push(entry(&[("alice", 2), ("bob", 1)], "one"));
        assert_eq!(
            ff.simplify(),
            vec![add("alice", &[("alice", 2), ("bob", 1)], "one")]
        );
    }

    #[test]
    fn simplifies_multiple_adds_in_version_order() {
        let mut ff = FastForward::new(
            vm(&[("alice", 1), ("bob", 1)]),
            vm(&[("alice", 3), ("bob", 1)]),
        );
        ff.added.push(entry(&[("alice", 3), ("bob", 1)], "two"));
        ff.added.push(entry(&[("alice", 2), ("bob", 1)], "one"));
        assert_eq!(
            ff.simplify(),
            vec![
                add("alice", &[("alice", 2), ("bob", 1)], "one"),
                add("alice", &[("alice", 3), ("bob", 1)], "two"),
            ]
        );
    }

    #[test]
    fn does_not_simplify_removals() {
        let mut ff = FastForward::new(vm(&[("alice", 1)]), vm(&[("alice", 1)]));
        ff.removed.push(String::from("one"));
        assert_eq!(
            ff.clone().simplify(),
            vec![SetOperation::FastForward(ff)]
        );
    }

    #[test]
    fn does_not_simplify_pure_version_bumps() {
        let ff = FastForward::<String>::new(vm(&[("alice", 1)]), vm(&[("alice", 5)]));
        assert_eq!(
            ff.clone().simplify(),
            vec![SetOperation::FastForward(ff)]
        );
    }

    #[test]
    fn does_not_simplify_version_jumps() {
        let mut ff = FastForward::new(VersionMap::new(), vm(&[("alice", 4)]));
        ff.added.push(entry(&[("alice", 1)], "one"));
        ff.added.push(entry(&[("alice", 2)], "two"));
        ff.added.push(entry(&[("alice", 4)], "four"));
        assert_eq!(
            ff.clone().simplify(),
            vec![SetOperation::FastForward(ff)]
        );

        let mut ff = FastForward::new(vm(&[("alice", 1)]), vm(&[("alice", 3)]));
        ff.added.push(entry(&[("alice", 2)], "one"));
        assert_eq!(
            ff.clone().simplify(),
            vec![SetOperation::FastForward(ff)]
        );
    }

    #[test]
    fn does_not_simplify_adds_past_the_last_version() {
        let mut ff = FastForward::new(
            vm(&[("alice", u64::MAX - 1)]),
            vm(&[("alice", u64::MAX)]),
        );
        ff.added.push(entry(&[("alice", u64::MAX)], "one"));
        ff.added.push(entry(&[("alice", u64::MAX)], "two"));
        assert_eq!(
            ff.clone().simplify(),
            vec![SetOperation::FastForward(ff)]
        );
    }

    #[test]
    fn does_not_simplify_multiple_actors() {
        let mut ff = FastForward::new(
            vm(&[("alice", 1), ("bob", 1)]),
            vm(&[("alice", 2), ("bob", 2)]),
        );
        ff.added.push(entry(&[("alice", 2)], "one"));
        ff.added.push(entry(&[("bob", 2)], "two"));
        assert_eq!(
            ff.clone().simplify(),
            vec![SetOperation::FastForward(ff)]
        );
    }

    #[test]
    fn merging_identical_models_is_empty() {
        let mut alice = Set::<String>::new();
        let mut bob = Set::<String>::new();
        assert!(alice.merge(&bob.data()).unwrap().is_empty());

        assert!(alice.apply_operation(&add("a", &[("a", 1)], "foo")));
        assert!(alice.apply_operation(&add("b", &[("a", 1), ("b", 1)], "bar")));
        bob.merge(&alice.data()).unwrap();
        assert!(alice.merge(&bob.data()).unwrap().is_empty());

        let mut charlie = Set::new();
        assert!(charlie.apply_operation(&add("c", &[("c", 1)], "baz")));
        let changes = alice.merge(&charlie.data()).unwrap();
        assert!(!changes.model_changes.is_empty());
        assert!(!changes.other_changes.is_empty());
    }

    #[test]
    fn can_apply_operation_is_a_dry_run() {
        let mut s = Set::new();
        assert!(s.add("alice", String::from("one")));
        let op = s.add_op("alice", String::from("two"));
        assert!(s.can_apply_operation(&op));
        assert!(!s.contains("two"));
        assert!(!s.can_apply_operation(&remove("alice", &[("alice", 1)], "two")));
    }
}
