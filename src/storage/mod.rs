//! Storage layer for ownergraph.
//!
//! The store traits are the abstract interface; [`memory`] is the in-process
//! backend used by the ingest binary and the tests.

pub mod memory;
mod traits;

use std::sync::Arc;

pub use memory::{
    InMemoryEntityStore, InMemoryProvenanceStore, InMemoryRawRecordStore, InMemoryRelationshipStore,
    InMemoryStatementStore, InMemoryStores, ENTITY_IDENTIFIER_INDEX,
};
pub use traits::{
    EntityStore, ProvenanceStore, RawRecordStore, RelationshipStore, Scope, StatementStore, StorageError,
};

/// Shared handles to every store, cheap to clone across worker threads.
#[derive(Clone)]
pub struct Stores {
    pub entities: Arc<dyn EntityStore>,
    pub relationships: Arc<dyn RelationshipStore>,
    pub statements: Arc<dyn StatementStore>,
    pub provenance: Arc<dyn ProvenanceStore>,
    pub raw_records: Arc<dyn RawRecordStore>,
}

impl Stores {
    /// Fresh in-memory stores.
    #[must_use]
    pub fn in_memory() -> Self {
        InMemoryStores::new().handles()
    }

    /// Replaces the entity store, keeping the others.
    #[must_use]
    pub fn with_entities(mut self, entities: Arc<dyn EntityStore>) -> Self {
        self.entities = entities;
        self
    }

    /// Replaces the relationship store, keeping the others.
    #[must_use]
    pub fn with_relationships(mut self, relationships: Arc<dyn RelationshipStore>) -> Self {
        self.relationships = relationships;
        self
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}
