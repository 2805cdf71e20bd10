use alloc::string::String;
use alloc::vec::Vec;

use crate::{CrdtError, VersionMap};

/// Identity of an item stored in a [`Set`](crate::Set) or
/// [`Singleton`](crate::Singleton).
pub type ReferenceId = String;

/// An item with a stable identity.
///
/// Two items with the same [`id`](Referenceable::id) are the same element of
/// a set, whatever their payload.
pub trait Referenceable {
    /// The item's identity. Must be non-empty.
    fn id(&self) -> &str;
}

impl Referenceable for String {
    fn id(&self) -> &str {
        self
    }
}

/// Operations produced by [`CrdtModel::merge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeChanges<Op> {
    /// What the merge did to the local replica.
    ///
    /// Applying these to a snapshot of the local data taken before the merge
    /// reproduces the merged data.
    pub model_changes: Vec<Op>,
    /// Operations the owner of the other replica must apply to catch up.
    pub other_changes: Vec<Op>,
}

impl<Op> MergeChanges<Op> {
    /// Changes for a merge that touched neither side.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            model_changes: Vec::new(),
            other_changes: Vec::new(),
        }
    }

    /// Returns `true` if neither side needs to change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.model_changes.is_empty() && self.other_changes.is_empty()
    }
}

/// Core trait that all CRDT models implement.
///
/// A model owns a replicated `Data` value. Local mutations and changes from
/// remote replicas arrive as operations through
/// [`apply_operation`](CrdtModel::apply_operation); whole replicas are
/// reconciled with [`merge`](CrdtModel::merge).
///
/// # Properties
///
/// All implementations must satisfy:
/// - **Convergence:** after two replicas merge and exchange the resulting
///   changes, their consumer views are equal.
/// - **Idempotency:** merging a snapshot of a model's own data changes
///   nothing and produces no operations.
/// - **Atomicity:** a rejected operation or a failed merge leaves the model
///   untouched.
pub trait CrdtModel {
    /// The replicated state.
    type Data: Clone;
    /// The closed set of operations this model accepts.
    type Operation;
    /// The derived value handed to consumers.
    type ConsumerView;

    /// A copy of the model's overall clock.
    fn version_map(&self) -> VersionMap;

    /// An independent copy of the replicated state.
    fn data(&self) -> Self::Data;

    /// The externally visible value.
    fn consumer_view(&self) -> Self::ConsumerView;

    /// Merge another replica's state into this one.
    ///
    /// On success `self` holds the merged state and the returned changes tell
    /// the caller what happened locally and what the other replica needs. On
    /// error `self` is unchanged.
    fn merge(&mut self, other: &Self::Data)
        -> Result<MergeChanges<Self::Operation>, CrdtError>;

    /// Apply a single operation.
    ///
    /// Returns `false`, leaving the model untouched, if the operation is not
    /// causally applicable right now.
    fn apply_operation(&mut self, op: &Self::Operation) -> bool;

    /// Replace the state wholesale, e.g. after an out-of-band resync.
    fn update_data(&mut self, new_data: Self::Data);

    /// Checks whether `op` would be accepted, without applying it.
    fn can_apply_operation(&self, op: &Self::Operation) -> bool
    where
        Self: Clone,
    {
        self.clone().apply_operation(op)
    }
}
