//! # causal-crdt
//!
//! Operation-based CRDTs with per-actor causal ordering.
//!
//! Every model carries a [`VersionMap`] recording how many operations each
//! actor has issued. Local edits and remote changes arrive as operations,
//! which are only accepted in causal order: an operation that comes too early
//! or too late is rejected without touching the model, and the caller
//! resynchronizes. Whole replicas are reconciled with [`CrdtModel::merge`],
//! which also reports the operations the other side needs to catch up.
//!
//! ## `no_std` Support
//!
//! This crate supports `no_std` environments with the `alloc` crate.
//! Disable the default `std` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! causal-crdt = { version = "0.1", default-features = false }
//! ```
//!
//! Enable the `serde` feature to serialize data snapshots and operations.
//!
//! ## Quick Start
//!
//! ```
//! use causal_crdt::prelude::*;
//!
//! let mut a = Count::new();
//! assert!(a.add("a", 5));
//!
//! let mut b = Count::new();
//! assert!(b.add("b", 3));
//!
//! let changes = a.merge(&b.data()).unwrap();
//! for op in &changes.other_changes {
//!     assert!(b.apply_operation(op));
//! }
//! assert_eq!(a.consumer_view(), 8);
//! assert_eq!(b.consumer_view(), 8);
//! ```
//!
//! ## Available CRDTs
//!
//! - [`Count`] - Counter with per-actor partial sums
//! - [`Set`] - Observed-remove set of identity-bearing items
//! - [`Singleton`] - Register holding at most one visible value
//! - [`Entity`] - Record of singleton and collection fields with a shared clock
//!
//! ## The `CrdtModel` Trait
//!
//! All models implement [`CrdtModel`]. A rejected operation returns `false`;
//! a merge of replicas that cannot be reconciled returns a [`CrdtError`].
//! Neither ever leaves a model partially updated.

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]

extern crate alloc;

mod count;
mod crdt;
mod entity;
mod error;
mod set;
mod singleton;
mod version_map;

pub mod prelude;

pub use count::{Count, CountData, CountOperation};
pub use crdt::{CrdtModel, MergeChanges, ReferenceId, Referenceable};
pub use entity::{Entity, EntityData, EntityFastForward, EntityOperation, RawEntity};
pub use error::CrdtError;
pub use set::{DataValue, FastForward, Set, SetData, SetOperation};
pub use singleton::{Singleton, SingletonData, SingletonOperation};
pub use version_map::{Actor, VersionMap};
