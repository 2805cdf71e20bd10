use alloc::collections::{BTreeMap, BTreeSet};
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use tracing::{debug, trace, warn};

use crate::set::{SetData, SetMerge};
use crate::{
    Actor, CrdtError, CrdtModel, DataValue, FastForward, MergeChanges, Referenceable, VersionMap,
};

/// Plain view of an entity: one optional value per singleton field and one
/// set per collection field.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(
    feature = "serde",
    serde(bound(
        serialize = "T: serde::Serialize",
        deserialize = "T: serde::Deserialize<'de> + Ord"
    ))
)]
pub struct RawEntity<T> {
    /// Singleton fields by name.
    pub singletons: BTreeMap<String, Option<T>>,
    /// Collection fields by name.
    pub collections: BTreeMap<String, BTreeSet<T>>,
}

impl<T> Default for RawEntity<T> {
    fn default() -> Self {
        Self {
            singletons: BTreeMap::new(),
            collections: BTreeMap::new(),
        }
    }
}

/// Replicated state of an [`Entity`].
///
/// Every field's `version` equals the entity `version`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EntityData<T> {
    /// The clock shared by all fields.
    pub version: VersionMap,
    /// Singleton fields by name.
    pub singletons: BTreeMap<String, SetData<T>>,
    /// Collection fields by name.
    pub collections: BTreeMap<String, SetData<T>>,
}

/// Per-field fast-forwards applied as one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EntityFastForward<T> {
    /// Entity clock the receiver must already dominate.
    pub old_clock: VersionMap,
    /// Entity clock after applying the batch.
    pub new_clock: VersionMap,
    /// Changes to singleton fields. Fields without changes are omitted.
    pub singletons: BTreeMap<String, FastForward<T>>,
    /// Changes to collection fields. Fields without changes are omitted.
    pub collections: BTreeMap<String, FastForward<T>>,
}

impl<T> EntityFastForward<T> {
    /// A batch moving the entity clock without touching any field.
    #[must_use]
    pub fn new(old_clock: VersionMap, new_clock: VersionMap) -> Self {
        Self {
            old_clock,
            new_clock,
            singletons: BTreeMap::new(),
            collections: BTreeMap::new(),
        }
    }

    /// Returns `true` if applying this batch could change anything.
    #[must_use]
    pub fn is_effectful(&self) -> bool {
        !self.singletons.is_empty()
            || !self.collections.is_empty()
            || self.old_clock != self.new_clock
    }
}

/// Operations accepted by an [`Entity`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EntityOperation<T> {
    /// Write a singleton field.
    SetSingleton {
        /// The writing actor.
        actor: Actor,
        /// Must carry the actor's next version.
        clock: VersionMap,
        /// Field name.
        field: String,
        /// The new value.
        value: T,
    },
    /// Clear a singleton field of everything `clock` has observed.
    ClearSingleton {
        /// The clearing actor.
        actor: Actor,
        /// Must carry the actor's current version.
        clock: VersionMap,
        /// Field name.
        field: String,
    },
    /// Add an item to a collection field.
    AddToSet {
        /// The adding actor.
        actor: Actor,
        /// Must carry the actor's next version.
        clock: VersionMap,
        /// Field name.
        field: String,
        /// The item.
        added: T,
    },
    /// Remove an item from a collection field.
    RemoveFromSet {
        /// The removing actor.
        actor: Actor,
        /// Must carry the actor's current version and cover every add of the item.
        clock: VersionMap,
        /// Field name.
        field: String,
        /// The item.
        removed: T,
    },
    /// Clear every field of everything `clock` has observed.
    ClearAll {
        /// The clearing actor.
        actor: Actor,
        /// Must carry the actor's current version.
        clock: VersionMap,
    },
    /// Batch catch-up produced by a merge.
    FastForward(EntityFastForward<T>),
}

#[derive(Debug, Clone, Copy)]
enum FieldKind {
    Singleton,
    Collection,
}

impl<T: Referenceable + Clone + Ord> EntityData<T> {
    fn field_mut(&mut self, kind: FieldKind, field: &str) -> Option<&mut SetData<T>> {
        match kind {
            FieldKind::Singleton => self.singletons.get_mut(field),
            FieldKind::Collection => self.collections.get_mut(field),
        }
    }

    fn fields_mut(&mut self) -> impl Iterator<Item = &mut SetData<T>> {
        self.singletons
            .values_mut()
            .chain(self.collections.values_mut())
    }

    /// Run a field operation, then share its effect on `actor`'s counter.
    fn apply_to_field(
        &mut self,
        actor: &str,
        kind: FieldKind,
        field: &str,
        apply: impl FnOnce(&mut SetData<T>) -> bool,
    ) -> bool {
        let Some(data) = self.field_mut(kind, field) else {
            warn!(field, ?kind, "operation names an unknown entity field");
            return false;
        };
        if !apply(data) {
            return false;
        }
        let version = data.version.get(actor);
        self.version.set(actor, version);
        for data in self.fields_mut() {
            data.version.set(actor, version);
        }
        true
    }

    fn clear_all(&mut self, actor: &str, clock: &VersionMap) -> bool {
        if clock.get(actor) != self.version.get(actor) {
            debug!(
                actor,
                expected = self.version.get(actor),
                got = clock.get(actor),
                "rejecting entity clear at wrong version"
            );
            return false;
        }
        for data in self.fields_mut() {
            data.remove_dominated(clock);
        }
        true
    }

    fn fast_forward(&mut self, op: &EntityFastForward<T>) -> bool {
        if !self.version.dominates(&op.old_clock) {
            debug!(
                current = %self.version,
                old = %op.old_clock,
                "rejecting entity fast-forward from the future"
            );
            return false;
        }

        let mut next = self.clone();
        let fields = op
            .singletons
            .iter()
            .map(|(name, ff)| (FieldKind::Singleton, name, ff))
            .chain(
                op.collections
                    .iter()
                    .map(|(name, ff)| (FieldKind::Collection, name, ff)),
            );
        for (kind, name, ff) in fields {
            let Some(data) = next.field_mut(kind, name) else {
                warn!(field = %name, ?kind, "fast-forward names an unknown entity field");
                return false;
            };
            if !data.fast_forward(ff) {
                return false;
            }
        }

        next.version.merge_from(&op.new_clock);
        let version = next.version.clone();
        for data in next.fields_mut() {
            data.version = version.clone();
        }
        *self = next;
        true
    }

    fn to_raw(&self) -> RawEntity<T> {
        RawEntity {
            singletons: self
                .singletons
                .iter()
                .map(|(name, data)| (name.clone(), data.last_written().cloned()))
                .collect(),
            collections: self
                .collections
                .iter()
                .map(|(name, data)| (name.clone(), data.items()))
                .collect(),
        }
    }
}

fn seed<T: Referenceable>(version: &VersionMap, values: impl IntoIterator<Item = T>) -> SetData<T> {
    let values = values
        .into_iter()
        .filter(|value| !value.id().is_empty())
        .map(|value| {
            let id = value.id().into();
            let entry = DataValue {
                version: version.clone(),
                value,
            };
            (id, entry)
        })
        .collect();
    SetData {
        values,
        version: version.clone(),
    }
}

fn field_mismatch(field: &str) -> CrdtError {
    warn!(field, "entity replicas have different fields");
    CrdtError::FieldMismatch {
        field: field.into(),
    }
}

/// Merged fields plus the per-field fast-forwards for each side.
type MergedFields<T> = (
    BTreeMap<String, SetData<T>>,
    BTreeMap<String, FastForward<T>>,
    BTreeMap<String, FastForward<T>>,
);

fn merge_fields<T: Referenceable + Clone + Ord>(
    mine: &BTreeMap<String, SetData<T>>,
    theirs: &BTreeMap<String, SetData<T>>,
    clock: &VersionMap,
) -> Result<MergedFields<T>, CrdtError> {
    if let Some(field) = theirs.keys().find(|name| !mine.contains_key(*name)) {
        return Err(field_mismatch(field));
    }

    let mut merged = BTreeMap::new();
    let mut local_changes = BTreeMap::new();
    let mut other_changes = BTreeMap::new();
    for (name, data) in mine {
        let other = theirs.get(name).ok_or_else(|| field_mismatch(name))?;
        let SetMerge {
            merged: mut field,
            local,
            other,
        } = data.merge_with(other);
        field.version = clock.clone();
        if local.carries_items() {
            local_changes.insert(name.clone(), local);
        }
        if other.carries_items() {
            other_changes.insert(name.clone(), other);
        }
        merged.insert(name.clone(), field);
    }
    Ok((merged, local_changes, other_changes))
}

fn into_changes<T>(ff: EntityFastForward<T>) -> Vec<EntityOperation<T>> {
    if ff.is_effectful() {
        vec![EntityOperation::FastForward(ff)]
    } else {
        Vec::new()
    }
}

/// A record of named singleton and collection fields sharing one clock.
///
/// The schema is fixed at construction. Each field follows the rules of
/// [`Singleton`](crate::Singleton) or [`Set`](crate::Set), but an operation on
/// any field consumes the acting actor's next entity-wide version, so the
/// entity clock orders all of an actor's edits across fields.
///
/// # Example
///
/// ```
/// use causal_crdt::prelude::*;
///
/// let mut alice = Entity::new(["name"], ["tags"]);
/// let mut bob = alice.clone();
///
/// assert!(alice.set_singleton("alice", "name", String::from("Ada")));
/// assert!(bob.add_to_set("bob", "tags", String::from("math")));
///
/// let changes = alice.merge(&bob.data()).unwrap();
/// for op in &changes.other_changes {
///     assert!(bob.apply_operation(op));
/// }
///
/// let view = bob.consumer_view();
/// assert_eq!(view.singletons["name"].as_deref(), Some("Ada"));
/// assert!(view.collections["tags"].contains("math"));
/// assert_eq!(alice.data(), bob.data());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity<T> {
    data: EntityData<T>,
}

impl<T: Referenceable + Clone + Ord> Entity<T> {
    /// Create an empty entity with the given fields.
    #[must_use]
    pub fn new<S, C>(singleton_fields: S, collection_fields: C) -> Self
    where
        S: IntoIterator,
        S::Item: Into<String>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Self {
            data: EntityData {
                version: VersionMap::new(),
                singletons: singleton_fields
                    .into_iter()
                    .map(|name| (name.into(), SetData::default()))
                    .collect(),
                collections: collection_fields
                    .into_iter()
                    .map(|name| (name.into(), SetData::default()))
                    .collect(),
            },
        }
    }

    /// Create an entity whose fields hold `raw`, every value stamped with
    /// `version`.
    ///
    /// Values with an empty id are skipped.
    #[must_use]
    pub fn with_values(version: VersionMap, raw: RawEntity<T>) -> Self {
        let singletons = raw
            .singletons
            .into_iter()
            .map(|(name, value)| (name, seed(&version, value)))
            .collect();
        let collections = raw
            .collections
            .into_iter()
            .map(|(name, values)| (name, seed(&version, values)))
            .collect();

        Self {
            data: EntityData {
                version,
                singletons,
                collections,
            },
        }
    }

    /// Create an entity holding existing data.
    #[must_use]
    pub fn from_data(data: EntityData<T>) -> Self {
        Self { data }
    }

    fn next_clock(&self, actor: &str) -> VersionMap {
        let mut clock = self.data.version.clone();
        // Left unchanged on overflow, which the field then rejects.
        clock.increment(actor);
        clock
    }

    /// Build the operation writing `value` into the singleton `field`.
    #[must_use]
    pub fn set_singleton_op(&self, actor: &str, field: &str, value: T) -> EntityOperation<T> {
        EntityOperation::SetSingleton {
            actor: actor.into(),
            clock: self.next_clock(actor),
            field: field.into(),
            value,
        }
    }

    /// Build the operation clearing the singleton `field`.
    #[must_use]
    pub fn clear_singleton_op(&self, actor: &str, field: &str) -> EntityOperation<T> {
        EntityOperation::ClearSingleton {
            actor: actor.into(),
            clock: self.data.version.clone(),
            field: field.into(),
        }
    }

    /// Build the operation adding `item` to the collection `field`.
    #[must_use]
    pub fn add_to_set_op(&self, actor: &str, field: &str, item: T) -> EntityOperation<T> {
        EntityOperation::AddToSet {
            actor: actor.into(),
            clock: self.next_clock(actor),
            field: field.into(),
            added: item,
        }
    }

    /// Build the operation removing `item` from the collection `field`.
    #[must_use]
    pub fn remove_from_set_op(&self, actor: &str, field: &str, item: T) -> EntityOperation<T> {
        EntityOperation::RemoveFromSet {
            actor: actor.into(),
            clock: self.data.version.clone(),
            field: field.into(),
            removed: item,
        }
    }

    /// Build the operation clearing every field.
    #[must_use]
    pub fn clear_all_op(&self, actor: &str) -> EntityOperation<T> {
        EntityOperation::ClearAll {
            actor: actor.into(),
            clock: self.data.version.clone(),
        }
    }

    /// Write `value` into the singleton `field` on behalf of `actor`.
    pub fn set_singleton(&mut self, actor: &str, field: &str, value: T) -> bool {
        let op = self.set_singleton_op(actor, field, value);
        self.apply_operation(&op)
    }

    /// Clear the singleton `field` on behalf of `actor`.
    pub fn clear_singleton(&mut self, actor: &str, field: &str) -> bool {
        let op = self.clear_singleton_op(actor, field);
        self.apply_operation(&op)
    }

    /// Add `item` to the collection `field` on behalf of `actor`.
    pub fn add_to_set(&mut self, actor: &str, field: &str, item: T) -> bool {
        let op = self.add_to_set_op(actor, field, item);
        self.apply_operation(&op)
    }

    /// Remove `item` from the collection `field` on behalf of `actor`.
    pub fn remove_from_set(&mut self, actor: &str, field: &str, item: T) -> bool {
        let op = self.remove_from_set_op(actor, field, item);
        self.apply_operation(&op)
    }

    /// Clear every field on behalf of `actor`.
    pub fn clear_all(&mut self, actor: &str) -> bool {
        let op = self.clear_all_op(actor);
        self.apply_operation(&op)
    }

    /// Current value of the singleton `field`.
    #[must_use]
    pub fn singleton(&self, field: &str) -> Option<&T> {
        self.data.singletons.get(field)?.last_written()
    }
}

impl<T: Referenceable + Clone + Ord> CrdtModel for Entity<T> {
    type Data = EntityData<T>;
    type Operation = EntityOperation<T>;
    type ConsumerView = RawEntity<T>;

    fn version_map(&self) -> VersionMap {
        self.data.version.clone()
    }

    fn data(&self) -> EntityData<T> {
        self.data.clone()
    }

    fn consumer_view(&self) -> RawEntity<T> {
        self.data.to_raw()
    }

    fn merge(
        &mut self,
        other: &EntityData<T>,
    ) -> Result<MergeChanges<EntityOperation<T>>, CrdtError> {
        let new_clock = self.data.version.merge(&other.version);
        let (singletons, local_singletons, other_singletons) =
            merge_fields(&self.data.singletons, &other.singletons, &new_clock)?;
        let (collections, local_collections, other_collections) =
            merge_fields(&self.data.collections, &other.collections, &new_clock)?;

        let local = EntityFastForward {
            old_clock: self.data.version.clone(),
            new_clock: new_clock.clone(),
            singletons: local_singletons,
            collections: local_collections,
        };
        let remote = EntityFastForward {
            old_clock: other.version.clone(),
            new_clock: new_clock.clone(),
            singletons: other_singletons,
            collections: other_collections,
        };
        trace!(
            clock = %new_clock,
            local_fields = local.singletons.len() + local.collections.len(),
            other_fields = remote.singletons.len() + remote.collections.len(),
            "merged entity"
        );

        self.data = EntityData {
            version: new_clock,
            singletons,
            collections,
        };
        Ok(MergeChanges {
            model_changes: into_changes(local),
            other_changes: into_changes(remote),
        })
    }

    fn apply_operation(&mut self, op: &EntityOperation<T>) -> bool {
        match op {
            EntityOperation::SetSingleton {
                actor,
                clock,
                field,
                value,
            } => self
                .data
                .apply_to_field(actor, FieldKind::Singleton, field, |data| {
                    data.update_singleton(actor, clock, value)
                }),
            EntityOperation::ClearSingleton {
                actor,
                clock,
                field,
            } => self
                .data
                .apply_to_field(actor, FieldKind::Singleton, field, |data| {
                    data.clear_observed(actor, clock)
                }),
            EntityOperation::AddToSet {
                actor,
                clock,
                field,
                added,
            } => self
                .data
                .apply_to_field(actor, FieldKind::Collection, field, |data| {
                    data.add(actor, clock, added)
                }),
            EntityOperation::RemoveFromSet {
                actor,
                clock,
                field,
                removed,
            } => self
                .data
                .apply_to_field(actor, FieldKind::Collection, field, |data| {
                    data.remove(actor, clock, removed)
                }),
            EntityOperation::ClearAll { actor, clock } => self.data.clear_all(actor, clock),
            EntityOperation::FastForward(ff) => self.data.fast_forward(ff),
        }
    }

    fn update_data(&mut self, new_data: EntityData<T>) {
        self.data = new_data;
    }
}
