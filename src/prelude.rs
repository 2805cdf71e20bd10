//! Convenient re-exports for common usage.
//!
//! ```
//! use causal_crdt::prelude::*;
//! ```

pub use crate::Count;
pub use crate::CrdtError;
pub use crate::CrdtModel;
pub use crate::Entity;
pub use crate::MergeChanges;
pub use crate::RawEntity;
pub use crate::Referenceable;
pub use crate::Set;
pub use crate::Singleton;
pub use crate::VersionMap;
