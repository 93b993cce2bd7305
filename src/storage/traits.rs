//! Abstract storage traits for ownergraph.
//!
//! These traits define the contract the persistence layer must honour:
//! - an atomic "find matching selector, else insert" entity write that returns
//!   the post-write document
//! - a uniqueness constraint over live entity identifiers and over the
//!   relationship composite id, surfaced as
//!   [`StorageError::UniqueConstraintViolation`]
//!
//! Everything else (merges, repointing) is built from idempotent single-step
//! operations so that an interrupted merge can be re-run.

use thiserror::Error;

use crate::entity::{Entity, EntityId, NewEntity};
use crate::identifier::Identifier;
use crate::provenance::{ProvenanceSubject, RawDataProvenance, RawRecord, RawRecordId};
use crate::relationship::{Relationship, RelationshipId};
use crate::statement::{Statement, StatementId};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Entity not found.
    #[error("Entity not found: {0}")]
    EntityNotFound(EntityId),

    /// Relationship not found.
    #[error("Relationship not found: {0}")]
    RelationshipNotFound(RelationshipId),

    /// A write would break a uniqueness index.
    #[error("Duplicate key on index '{index}': {key}")]
    UniqueConstraintViolation { index: &'static str, key: String },

    /// A storage round-trip exceeded its deadline.
    #[error("Storage operation '{operation}' timed out after {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    /// A merge found one side already aliased, usually because another
    /// writer merged it first.
    #[error("Entity {id} is already an alias of {master}")]
    AliasConflict { id: EntityId, master: EntityId },

    /// Backend error.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Returns true for uniqueness violations.
    #[must_use]
    pub const fn is_constraint_violation(&self) -> bool {
        matches!(self, Self::UniqueConstraintViolation { .. })
    }

    /// Returns true if a merge lost to a concurrent one.
    #[must_use]
    pub const fn is_alias_conflict(&self) -> bool {
        matches!(self, Self::AliasConflict { .. })
    }

    /// Returns true for timeout-class errors.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Which entities a query may return.
///
/// Aliases (entities merged into a master) are excluded unless the caller
/// explicitly asks for them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Only entities without a master.
    #[default]
    Live,
    /// Live entities and aliases.
    All,
}

impl Scope {
    /// Returns true if the entity is visible in this scope.
    #[must_use]
    pub const fn admits(self, entity: &Entity) -> bool {
        match self {
            Self::Live => entity.master_entity.is_none(),
            Self::All => true,
        }
    }
}

/// Storage trait for entities.
pub trait EntityStore: Send + Sync {
    /// Atomically finds the single live entity sharing any identifier with
    /// `candidate` and updates it (identifier union, non-blank attribute
    /// update), or inserts the candidate when nothing matches.
    ///
    /// # Errors
    /// - `UniqueConstraintViolation` when the write would leave two live
    ///   entities sharing an identifier (more than one match).
    fn find_one_and_upsert(&self, candidate: &NewEntity) -> Result<Entity, StorageError>;

    /// Inserts the candidate as a new entity.
    ///
    /// # Errors
    /// - `UniqueConstraintViolation` if any identifier is held by a live entity.
    fn insert(&self, candidate: &NewEntity) -> Result<Entity, StorageError>;

    /// Get the stored document for an id, alias or not.
    fn get(&self, id: EntityId) -> Result<Option<Entity>, StorageError>;

    /// Get the live entity an id resolves to, following `master_entity`
    /// pointers to a fixed point.
    fn resolve(&self, id: EntityId) -> Result<Option<Entity>, StorageError>;

    /// Find entities holding any of the identifiers.
    fn find_by_identifiers(&self, identifiers: &[Identifier], scope: Scope) -> Result<Vec<Entity>, StorageError>;

    /// Marks `to_remove` as an alias of `survivor.id` and writes the
    /// survivor's merged identifiers and attributes, atomically.
    ///
    /// Calling again once `to_remove` already points at the survivor is a
    /// no-op returning the stored survivor.
    ///
    /// # Errors
    /// - `EntityNotFound` if either side is missing
    /// - `UniqueConstraintViolation` if a merged identifier belongs to a third
    ///   live entity
    /// - `AliasConflict` if the survivor is an alias, or `to_remove` is an
    ///   alias of a different entity
    fn merge_into(&self, to_remove: EntityId, survivor: &Entity) -> Result<Entity, StorageError>;

    /// Ids of entities whose `master_entity` is `id`.
    fn merged_entities(&self, id: EntityId) -> Result<Vec<EntityId>, StorageError>;

    /// All entities in scope, ordered by creation.
    fn list(&self, scope: Scope) -> Result<Vec<Entity>, StorageError>;

    /// Count entities in scope.
    fn count(&self, scope: Scope) -> Result<usize, StorageError>;
}

/// Storage trait for relationships.
pub trait RelationshipStore: Send + Sync {
    /// Inserts or updates by composite id. Updates replace endpoints,
    /// interests and provenance; dates are only replaced when present.
    fn upsert(&self, relationship: &Relationship) -> Result<Relationship, StorageError>;

    /// Get a relationship as stored.
    fn get(&self, id: &RelationshipId) -> Result<Option<Relationship>, StorageError>;

    /// Relationships whose source is any of `ids`.
    fn find_by_source(&self, ids: &[EntityId]) -> Result<Vec<Relationship>, StorageError>;

    /// Relationships whose target is any of `ids`.
    fn find_by_target(&self, ids: &[EntityId]) -> Result<Vec<Relationship>, StorageError>;

    /// Rewrites every endpoint equal to `from` into `to`. Returns the number
    /// of relationships touched.
    fn repoint(&self, from: EntityId, to: EntityId) -> Result<usize, StorageError>;

    /// All relationships.
    fn list(&self) -> Result<Vec<Relationship>, StorageError>;

    /// Count relationships.
    fn count(&self) -> Result<usize, StorageError>;
}

/// Storage trait for statements.
pub trait StatementStore: Send + Sync {
    fn insert(&self, statement: Statement) -> Result<(), StorageError>;

    fn get(&self, id: StatementId) -> Result<Option<Statement>, StorageError>;

    fn find_by_entity(&self, entity_id: EntityId) -> Result<Vec<Statement>, StorageError>;

    /// Moves statements from one entity to another.
    fn repoint(&self, from: EntityId, to: EntityId) -> Result<usize, StorageError>;
}

/// Storage trait for raw-data provenance.
pub trait ProvenanceStore: Send + Sync {
    /// Appends raw record ids to the provenance of `(subject, import_id)`,
    /// creating it if needed.
    fn upsert(
        &self,
        subject: ProvenanceSubject,
        import_id: &str,
        raw_record_ids: &[RawRecordId],
    ) -> Result<RawDataProvenance, StorageError>;

    fn find_by_subject(&self, subject: &ProvenanceSubject) -> Result<Vec<RawDataProvenance>, StorageError>;

    /// Moves entity provenance from one entity to another, folding records of
    /// the same import together.
    fn repoint_entity(&self, from: EntityId, to: EntityId) -> Result<usize, StorageError>;
}

/// Storage trait for staged raw records.
pub trait RawRecordStore: Send + Sync {
    /// Inserts records whose id is not yet stored. Returns the ids that were
    /// newly inserted, in input order.
    fn bulk_upsert(&self, records: Vec<RawRecord>) -> Result<Vec<RawRecordId>, StorageError>;

    fn get(&self, id: &RawRecordId) -> Result<Option<RawRecord>, StorageError>;

    fn count(&self) -> Result<usize, StorageError>;
}
