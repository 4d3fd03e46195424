//! Domain error model.

use thiserror::Error;

use crate::entity::Entity;
use crate::id::OrganizationId;

/// Result type used across the domain and storage layers.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Covers the deterministic failures of the data model (validation, missing
/// entities, uniqueness conflicts) plus the one infrastructure condition every
/// caller must be able to name: the store being unreachable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A referenced entity does not exist.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// A unique field is already taken (username, email, name).
    #[error("conflict: {field} already exists")]
    Conflict { field: &'static str },

    /// A sharing target does not resolve to an organization.
    #[error("unknown organization {id}")]
    UnknownOrganization { id: OrganizationId },

    /// The persistent store could not be reached. Not retried.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(entity: &'static str, id: impl Into<i64>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Missing entity of kind `E`.
    pub fn missing<E: Entity>(id: E::Id) -> Self {
        Self::not_found(E::KIND, id)
    }

    pub fn conflict(field: &'static str) -> Self {
        Self::Conflict { field }
    }

    pub fn store_unavailable(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::FileId;

    struct Doc;

    impl Entity for Doc {
        type Id = FileId;
        const KIND: &'static str = "doc";
    }

    #[test]
    fn not_found_message_names_entity_and_id() {
        let err = DomainError::not_found("file", FileId::new(9));
        assert_eq!(err.to_string(), "file 9 not found");
    }

    #[test]
    fn missing_uses_entity_kind() {
        assert_eq!(
            DomainError::missing::<Doc>(FileId::new(3)),
            DomainError::NotFound { entity: "doc", id: 3 }
        );
    }

    #[test]
    fn conflict_names_field() {
        assert_eq!(
            DomainError::conflict("email").to_string(),
            "conflict: email already exists"
        );
    }
}
