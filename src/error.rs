//! Error types for ownergraph.
//!
//! All errors are strongly typed using thiserror so that the pipeline can
//! classify a failure (retry, skip, merge, abort) by matching on it instead of
//! inspecting messages.

use thiserror::Error;

use crate::entity::{Entity, EntityId, EntityType};
use crate::identifier::{display_identifiers, Identifier};
use crate::reader::ReaderError;
use crate::storage::StorageError;

/// Validation errors raised at the input boundary.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Malformed record: {reason}")]
    MalformedRecord { reason: String },

    #[error("Required field '{field}' is missing")]
    MissingField { field: String },

    #[error("Required field '{field}' is blank")]
    BlankField { field: String },

    #[error("Entity must carry at least one identifier")]
    NoIdentifiers,

    #[error("Invalid identifier {identifier}: {reason}")]
    InvalidIdentifier { identifier: String, reason: String },

    #[error("Identity resolver broke its contract: {reason}")]
    ResolverContract { reason: String },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl ValidationError {
    /// Shorthand for a missing required field.
    #[must_use]
    pub fn missing(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Returns true if this error describes bad input data that will never
    /// succeed on retry.
    #[must_use]
    pub const fn is_malformed_input(&self) -> bool {
        matches!(
            self,
            Self::MalformedRecord { .. }
                | Self::MissingField { .. }
                | Self::BlankField { .. }
                | Self::NoIdentifiers
                | Self::InvalidIdentifier { .. }
        )
    }
}

/// Two or more live entities match one candidate identifier set.
///
/// The upsert engine never retries this on its own; callers are expected to
/// merge the matches and try again.
#[derive(Debug, Error)]
#[error(
    "Unable to upsert entity due to {} matching multiple documents ({} matches)",
    display_identifiers(.identifiers),
    .matches.len()
)]
pub struct DuplicateEntitiesDetected {
    /// Identifiers of the candidate that could not be upserted.
    pub identifiers: Vec<Identifier>,
    /// Every live entity matching the candidate, ordered by id.
    pub matches: Vec<Entity>,
}

impl DuplicateEntitiesDetected {
    /// Creates the condition, sorting matches for deterministic handling.
    #[must_use]
    pub fn new(identifiers: Vec<Identifier>, mut matches: Vec<Entity>) -> Self {
        matches.sort_by_key(|e| e.id);
        Self {
            identifiers,
            matches,
        }
    }

    /// Ids of the matched entities.
    #[must_use]
    pub fn matched_ids(&self) -> Vec<EntityId> {
        self.matches.iter().map(|e| e.id).collect()
    }
}

/// A merge that was refused before any mutation took place.
///
/// Retrying with the same inputs fails identically.
#[derive(Debug, Error)]
pub enum BadMergeError {
    #[error("Trying to merge the same entity ({id})")]
    SameEntity { id: EntityId },

    #[error("to_remove entity type '{to_remove}' does not match to_keep entity type '{to_keep}' - cannot merge")]
    TypeMismatch {
        to_remove: EntityType,
        to_keep: EntityType,
    },

    #[error("differing OC identifiers detected: {to_remove} vs {to_keep}")]
    DifferingCanonicalIdentifiers {
        to_remove: Identifier,
        to_keep: Identifier,
    },

    #[error("Entity {id} is already merged into {master}, not into {to_keep}")]
    AlreadyMerged {
        id: EntityId,
        master: EntityId,
        to_keep: EntityId,
    },

    #[error("Entity {id} is an alias of {master} and cannot survive a merge")]
    AliasedSurvivor { id: EntityId, master: EntityId },
}

/// Top-level error type for ownergraph.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("{0}")]
    DuplicateEntities(#[from] DuplicateEntitiesDetected),

    #[error("Bad merge: {0}")]
    BadMerge(#[from] BadMergeError),

    #[error("Reader error: {0}")]
    Reader(#[from] ReaderError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl GraphError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true for timeout-class downstream failures.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_timeout(),
            _ => false,
        }
    }

    /// Returns true if the input record itself is at fault.
    #[must_use]
    pub const fn is_malformed(&self) -> bool {
        match self {
            Self::Validation(e) => e.is_malformed_input(),
            Self::Reader(e) => e.is_line_error(),
            _ => false,
        }
    }

    /// Returns true if a merge was refused.
    #[must_use]
    pub const fn is_bad_merge(&self) -> bool {
        matches!(self, Self::BadMerge(_))
    }

    /// Returns true if a duplicate-entities state was detected.
    #[must_use]
    pub const fn is_duplicate_entities(&self) -> bool {
        matches!(self, Self::DuplicateEntities(_))
    }

    /// Returns true if the error must abort a whole pipeline run.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::Reader(e) => !e.is_line_error(),
            _ => false,
        }
    }
}

/// Result type alias for ownergraph operations.
pub type GraphResult<T> = Result<T, GraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_missing_field() {
        let err = ValidationError::missing("company_number");
        assert!(err.to_string().contains("company_number"));
        assert!(err.is_malformed_input());
    }

    #[test]
    fn test_resolver_contract_is_not_malformed_input() {
        let err = ValidationError::ResolverContract {
            reason: "dropped identifier".to_string(),
        };
        assert!(!err.is_malformed_input());
        assert!(!GraphError::from(err).is_malformed());
    }

    #[test]
    fn test_type_mismatch_message() {
        let err = BadMergeError::TypeMismatch {
            to_remove: EntityType::LegalEntity,
            to_keep: EntityType::NaturalPerson,
        };
        assert_eq!(
            err.to_string(),
            "to_remove entity type 'legal-entity' does not match to_keep entity type 'natural-person' - cannot merge"
        );
    }

    #[test]
    fn test_duplicate_entities_mentions_identifiers() {
        let identifiers = vec![Identifier::open_corporates("gb", "01234567")];
        let err = DuplicateEntitiesDetected::new(identifiers, Vec::new());
        let msg = err.to_string();
        assert!(msg.contains("jurisdiction_code=gb"));
        assert!(msg.contains("01234567"));
    }

    #[test]
    fn test_graph_error_classification() {
        let timeout: GraphError = StorageError::Timeout {
            operation: "entity.upsert".to_string(),
            duration_ms: 500,
        }
        .into();
        assert!(timeout.is_retryable());
        assert!(!timeout.is_malformed());

        let violation: GraphError = StorageError::UniqueConstraintViolation {
            index: "entities.identifiers",
            key: "x".to_string(),
        }
        .into();
        assert!(!violation.is_retryable());

        let malformed: GraphError = ValidationError::NoIdentifiers.into();
        assert!(malformed.is_malformed());

        let reader: GraphError = ReaderError::EmptyArchive.into();
        assert!(reader.is_fatal());
        let encoding: GraphError = ReaderError::InvalidEncoding { line: 7 }.into();
        assert!(encoding.is_malformed());
        assert!(!encoding.is_fatal());

        let bad: GraphError = BadMergeError::SameEntity { id: EntityId::new() }.into();
        assert!(bad.is_bad_merge());
        assert!(!bad.is_retryable());
    }
}
