//! # ownergraph - merge-safe ingestion for beneficial-ownership graphs
//!
//! ownergraph folds bulk registry and beneficial-ownership datasets into a
//! canonical graph of entities and ownership relationships. The same
//! real-world company or person may appear many times under different
//! identifiers; ownergraph keeps exactly one live entity per identity.
//!
//! ## Core Concepts
//!
//! - **Entity**: a legal entity or natural person, identified by a set of
//!   key/value identifiers. No two live entities share an identifier.
//! - **Upsert**: atomic find-or-create-or-update keyed by identifier overlap.
//! - **Merge**: when one record spans two stored entities, one survives and
//!   the other becomes an alias pointing at it.
//! - **Pipeline**: a bounded producer/consumer pool that streams records from
//!   plain, gzip or zip sources.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use ownergraph::identifier::Identifier;
//! use ownergraph::index::NoopNotifier;
//! use ownergraph::storage::Stores;
//! use ownergraph::{NewEntity, UpsertEngine};
//!
//! let engine = UpsertEngine::new(Stores::in_memory(), Arc::new(NoopNotifier));
//! let first = engine
//!     .upsert(&NewEntity::legal_entity().identifier(Identifier::open_corporates("gb", "12345")).name("Foo Ltd"))
//!     .unwrap();
//! let again = engine
//!     .upsert(&NewEntity::legal_entity().identifier(Identifier::open_corporates("gb", "12345")).name("Foo Limited"))
//!     .unwrap();
//! assert_eq!(first.id, again.id);
//! assert_eq!(again.attributes.name.as_deref(), Some("Foo Limited"));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Data model
pub mod entity;
pub mod error;
pub mod identifier;
pub mod provenance;
pub mod relationship;
pub mod statement;

// Storage and write path
pub mod index;
pub mod merge;
pub mod resolver;
pub mod retry;
pub mod storage;
pub mod upsert;

// Ingestion
pub mod config;
pub mod graph;
pub mod importer;
pub mod pipeline;
pub mod reader;
pub mod staging;

pub use config::IngestConfig;
pub use entity::{Entity, EntityAttributes, EntityId, EntityType, NewEntity};
pub use error::{BadMergeError, DuplicateEntitiesDetected, GraphError, GraphResult, ValidationError};
pub use graph::OwnershipGraph;
pub use identifier::{Identifier, IdentifierScheme};
pub use importer::{BeneficialOwnerImporter, ImportContext};
pub use merge::{MergeDecider, MergeDecision, MergeOutcome, MergeState, Merger, PopulatedFieldsDecider};
pub use pipeline::{Pipeline, PipelineConfig, PipelineSummary, RecordProcessor};
pub use provenance::{Provenance, RawRecord, RawRecordId};
pub use relationship::{Interest, Relationship, RelationshipId};
pub use statement::{Statement, StatementId};
pub use storage::{Scope, StorageError, Stores};
pub use upsert::UpsertEngine;
