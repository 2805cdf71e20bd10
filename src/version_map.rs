//! Per-actor logical clocks.
//!
//! A [`VersionMap`] maps every actor that has touched a model to the number of
//! operations it has issued. It is a vector clock whose entries are keyed by
//! opaque actor identifiers rather than by position.

use alloc::collections::btree_map;
use alloc::collections::{BTreeMap, BTreeSet};
use alloc::string::String;
use core::cmp::Ordering;
use core::fmt;

/// Opaque identifier of a replica or participant.
pub type Actor = String;

/// A per-actor logical clock.
///
/// Actors that are absent have version `0`, and zero entries are never
/// stored, so two maps compare equal exactly when they agree on every actor.
///
/// # Example
///
/// ```
/// use causal_crdt::VersionMap;
///
/// let a = VersionMap::from_iter([("a", 2), ("b", 1)]);
/// let b = VersionMap::from_iter([("a", 1), ("c", 4)]);
///
/// let merged = a.merge(&b);
/// assert!(merged.dominates(&a));
/// assert!(merged.dominates(&b));
/// assert!(!a.dominates(&b));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct VersionMap {
    versions: BTreeMap<Actor, u64>,
}

impl VersionMap {
    /// Create an empty version map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the version recorded for `actor`, or `0` if it has none.
    #[must_use]
    pub fn get(&self, actor: &str) -> u64 {
        self.versions.get(actor).copied().unwrap_or(0)
    }

    /// Record `version` for `actor`. Setting `0` forgets the actor.
    pub fn set(&mut self, actor: impl Into<Actor>, version: u64) {
        let actor = actor.into();
        if version == 0 {
            self.versions.remove(&actor);
        } else {
            self.versions.insert(actor, version);
        }
    }

    /// Advance `actor` by one and return its new version.
    ///
    /// Returns `None`, leaving the map unchanged, if the version would
    /// overflow.
    pub fn increment(&mut self, actor: &str) -> Option<u64> {
        let next = self.get(actor).checked_add(1)?;
        self.set(actor, next);
        Some(next)
    }

    /// Pointwise maximum of `self` and `other`.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        let mut merged = self.clone();
        merged.merge_from(other);
        merged
    }

    /// In-place pointwise maximum.
    pub fn merge_from(&mut self, other: &Self) {
        for (actor, &version) in &other.versions {
            let entry = self.versions.entry(actor.clone()).or_insert(0);
            *entry = (*entry).max(version);
        }
    }

    /// Returns `true` if `self[actor] >= other[actor]` for every actor in `other`.
    #[must_use]
    pub fn dominates(&self, other: &Self) -> bool {
        other
            .versions
            .iter()
            .all(|(actor, &version)| self.get(actor) >= version)
    }

    /// Returns `true` if `other` dominates `self`.
    #[must_use]
    pub fn is_dominated_by(&self, other: &Self) -> bool {
        other.dominates(self)
    }

    /// Per-actor amount by which `self` is ahead of `other`.
    ///
    /// Only actors where `self` is strictly ahead appear in the result.
    #[must_use]
    pub fn difference(&self, other: &Self) -> Self {
        self.versions
            .iter()
            .filter_map(|(actor, &version)| {
                let behind = other.get(actor);
                (version > behind).then(|| (actor.clone(), version - behind))
            })
            .collect()
    }

    /// Total order used to pick a single winner among concurrent writes.
    ///
    /// Actors are scanned in descending identifier order and the first
    /// differing counter decides. If `self` strictly dominates `other` the
    /// result is always [`Ordering::Greater`].
    #[must_use]
    pub fn cmp_last_writer(&self, other: &Self) -> Ordering {
        let actors: BTreeSet<&Actor> = self.versions.keys().chain(other.versions.keys()).collect();
        actors
            .into_iter()
            .rev()
            .map(|actor| self.get(actor).cmp(&other.get(actor)))
            .find(|ord| ord.is_ne())
            .unwrap_or(Ordering::Equal)
    }

    /// Iterate over the actors with a non-zero version.
    pub fn actors(&self) -> impl Iterator<Item = &str> {
        self.versions.keys().map(String::as_str)
    }

    /// Iterate over `(actor, version)` pairs in actor order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.versions.iter().map(|(a, &v)| (a.as_str(), v))
    }

    /// Number of actors with a non-zero version.
    #[must_use]
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    /// Returns `true` if no actor has a non-zero version.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

impl<A: Into<Actor>> FromIterator<(A, u64)> for VersionMap {
    fn from_iter<I: IntoIterator<Item = (A, u64)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (actor, version) in iter {
            map.set(actor, version);
        }
        map
    }
}

impl IntoIterator for VersionMap {
    type Item = (Actor, u64);
    type IntoIter = btree_map::IntoIter<Actor, u64>;

    fn into_iter(self) -> Self::IntoIter {
        self.versions.into_iter()
    }
}

impl fmt::Display for VersionMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (actor, version)) in self.versions.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{actor}: {version}")?;
        }
        f.write_str("}")
    }
}
