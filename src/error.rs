//! Errors raised when two replicas cannot be reconciled.
//!
//! Ordinary causality races (an operation arriving too early or too late) are
//! not errors: `apply_operation` reports them by returning `false`. The
//! variants here mean the replica states are corrupt or mutually incompatible.

use alloc::string::String;

use thiserror::Error;

use crate::Actor;

/// Error returned by [`CrdtModel::merge`](crate::CrdtModel::merge).
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CrdtError {
    /// Two counter replicas hold contributions from `actor` that cannot both
    /// be prefixes of the same operation history.
    #[error(
        "divergent versions for actor {actor}: local {local_value}@{local_version}, \
         other {other_value}@{other_version}"
    )]
    DivergentVersions {
        /// The actor whose contributions disagree.
        actor: Actor,
        /// Local partial sum.
        local_value: u64,
        /// Remote partial sum.
        other_value: u64,
        /// Local version for the actor.
        local_version: u64,
        /// Remote version for the actor.
        other_version: u64,
    },

    /// Two entity replicas were built with different field schemas.
    #[error("entity field {field} is not present on both replicas")]
    FieldMismatch {
        /// The field missing on one side.
        field: String,
    },
}

impl CrdtError {
    /// Returns `true` if this error came from a counter merge.
    #[must_use]
    pub fn is_divergence(&self) -> bool {
        matches!(self, CrdtError::DivergentVersions { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn divergence_message_names_actor_and_versions() {
        let err = CrdtError::DivergentVersions {
            actor: "a".into(),
            local_value: 5,
            other_value: 5,
            local_version: 1,
            other_version: 2,
        };
        assert!(err.is_divergence());
        assert_eq!(
            err.to_string(),
            "divergent versions for actor a: local 5@1, other 5@2"
        );
    }

    #[test]
    fn field_mismatch_message() {
        let err = CrdtError::FieldMismatch {
            field: "name".into(),
        };
        assert!(!err.is_divergence());
        assert_eq!(
            err.to_string(),
            "entity field name is not present on both replicas"
        );
    }
}
