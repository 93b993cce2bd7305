//! In-memory storage backend.
//!
//! This module provides thread-safe in-memory implementations of the storage traits.
//! It is intended for embedded usage, tests, and as a reference implementation of
//! the atomicity and uniqueness contracts.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, RwLock};

use chrono::Utc;

use crate::entity::{Entity, EntityId, NewEntity};
use crate::identifier::{self, display_identifiers, Identifier};
use crate::provenance::{ProvenanceSubject, RawDataProvenance, RawRecord, RawRecordId};
use crate::relationship::{Relationship, RelationshipId};
use crate::statement::{Statement, StatementId};
use crate::storage::traits::{
    EntityStore, ProvenanceStore, RawRecordStore, RelationshipStore, Scope, StatementStore, StorageError,
};
use crate::storage::Stores;

/// Name of the live-identifier uniqueness index.
pub const ENTITY_IDENTIFIER_INDEX: &str = "entities.identifiers";

const MAX_MASTER_HOPS: usize = 128;

fn lock_err(context: &'static str) -> StorageError {
    StorageError::Backend(format!("poisoned lock: {context}"))
}

#[derive(Debug, Default)]
struct EntityState {
    by_id: HashMap<EntityId, Entity>,
    /// Live entities only. More than one owner per identifier only happens
    /// through [`InMemoryEntityStore::restore`].
    by_identifier: HashMap<Identifier, BTreeSet<EntityId>>,
    merged_from: HashMap<EntityId, BTreeSet<EntityId>>,
}

fn resolve_canonical_id(state: &EntityState, id: EntityId) -> Result<Option<EntityId>, StorageError> {
    let mut current = id;
    let mut seen = HashSet::new();
    for _ in 0..MAX_MASTER_HOPS {
        let Some(entity) = state.by_id.get(&current) else {
            return Ok(None);
        };
        let Some(next) = entity.master_entity else {
            return Ok(Some(current));
        };
        if !seen.insert(current) || next == current {
            return Err(StorageError::Backend(format!(
                "master_entity chain starting at {id} contains a cycle"
            )));
        }
        current = next;
    }

    Err(StorageError::Backend(
        "master_entity resolution exceeded hop limit".to_string(),
    ))
}

fn live_matches(state: &EntityState, identifiers: &[Identifier]) -> BTreeSet<EntityId> {
    identifiers
        .iter()
        .filter_map(|i| state.by_identifier.get(i))
        .flatten()
        .copied()
        .collect()
}

fn index_identifiers(state: &mut EntityState, entity: &Entity) {
    for identifier in &entity.identifiers {
        state.by_identifier.entry(identifier.clone()).or_default().insert(entity.id);
    }
}

fn unindex_identifiers(state: &mut EntityState, entity: &Entity) {
    for identifier in &entity.identifiers {
        if let Some(owners) = state.by_identifier.get_mut(identifier) {
            owners.remove(&entity.id);
            if owners.is_empty() {
                state.by_identifier.remove(identifier);
            }
        }
    }
}

fn insert_new(state: &mut EntityState, candidate: NewEntity) -> Entity {
    let entity = Entity::from_candidate(EntityId::new(), candidate);
    index_identifiers(state, &entity);
    state.by_id.insert(entity.id, entity.clone());
    entity
}

fn violation(identifiers: &[Identifier]) -> StorageError {
    StorageError::UniqueConstraintViolation {
        index: ENTITY_IDENTIFIER_INDEX,
        key: display_identifiers(identifiers),
    }
}

/// Thread-safe in-memory entity store.
#[derive(Debug, Default)]
pub struct InMemoryEntityStore {
    state: RwLock<EntityState>,
}

impl InMemoryEntityStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads an entity document verbatim, as when replaying a snapshot.
    ///
    /// Identifier uniqueness is not checked, so this reproduces the duplicate
    /// live entities a lost insert race leaves behind. An existing document
    /// with the same id is replaced.
    pub fn restore(&self, entity: Entity) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("entity.restore"))?;
        if let Some(previous) = state.by_id.remove(&entity.id) {
            unindex_identifiers(&mut state, &previous);
        }
        match entity.master_entity {
            Some(master) => {
                state.merged_from.entry(master).or_default().insert(entity.id);
            }
            None => index_identifiers(&mut state, &entity),
        }
        state.by_id.insert(entity.id, entity);
        Ok(())
    }
}

impl EntityStore for InMemoryEntityStore {
    fn find_one_and_upsert(&self, candidate: &NewEntity) -> Result<Entity, StorageError> {
        if candidate.identifiers.is_empty() {
            return Err(StorageError::Backend(
                "cannot upsert an entity without identifiers".to_string(),
            ));
        }

        let mut state = self.state.write().map_err(|_| lock_err("entity.find_one_and_upsert"))?;
        let matches = live_matches(&state, &candidate.identifiers);

        let id = match matches.len() {
            0 => return Ok(insert_new(&mut state, candidate.clone())),
            1 => matches.into_iter().next().ok_or_else(|| violation(&candidate.identifiers))?,
            _ => return Err(violation(&candidate.identifiers)),
        };

        let mut entity = state
            .by_id
            .get(&id)
            .cloned()
            .ok_or(StorageError::EntityNotFound(id))?;
        identifier::union_into(&mut entity.identifiers, &candidate.identifiers);
        entity.attributes.apply_update(&candidate.attributes);
        if candidate.last_resolved_at.is_some() {
            entity.last_resolved_at = candidate.last_resolved_at;
        }
        entity.touch();

        index_identifiers(&mut state, &entity);
        state.by_id.insert(id, entity.clone());
        Ok(entity)
    }

    fn insert(&self, candidate: &NewEntity) -> Result<Entity, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("entity.insert"))?;
        if !live_matches(&state, &candidate.identifiers).is_empty() {
            return Err(violation(&candidate.identifiers));
        }
        Ok(insert_new(&mut state, candidate.clone()))
    }

    fn get(&self, id: EntityId) -> Result<Option<Entity>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("entity.get"))?;
        Ok(state.by_id.get(&id).cloned())
    }

    fn resolve(&self, id: EntityId) -> Result<Option<Entity>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("entity.resolve"))?;
        let canonical = resolve_canonical_id(&state, id)?;
        Ok(canonical.and_then(|c| state.by_id.get(&c).cloned()))
    }

    fn find_by_identifiers(&self, identifiers: &[Identifier], scope: Scope) -> Result<Vec<Entity>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("entity.find_by_identifiers"))?;
        let mut results: Vec<Entity> = match scope {
            Scope::Live => live_matches(&state, identifiers)
                .into_iter()
                .filter_map(|id| state.by_id.get(&id).cloned())
                .collect(),
            Scope::All => state
                .by_id
                .values()
                .filter(|e| e.matches_any(identifiers))
                .cloned()
                .collect(),
        };
        results.sort_by_key(|e| e.id);
        Ok(results)
    }

    fn merge_into(&self, to_remove: EntityId, survivor: &Entity) -> Result<Entity, StorageError> {
        let keep_id = survivor.id;
        if to_remove == keep_id {
            return Err(StorageError::Backend(
                "cannot merge an entity into itself".to_string(),
            ));
        }

        let mut state = self.state.write().map_err(|_| lock_err("entity.merge_into"))?;

        let mut removed = state
            .by_id
            .get(&to_remove)
            .cloned()
            .ok_or(StorageError::EntityNotFound(to_remove))?;
        let mut kept = state
            .by_id
            .get(&keep_id)
            .cloned()
            .ok_or(StorageError::EntityNotFound(keep_id))?;

        if let Some(master) = kept.master_entity {
            return Err(StorageError::AliasConflict { id: keep_id, master });
        }
        match removed.master_entity {
            Some(master) if master == keep_id => return Ok(kept),
            Some(master) => return Err(StorageError::AliasConflict { id: to_remove, master }),
            None => {}
        }

        for identifier in &survivor.identifiers {
            let foreign = state
                .by_identifier
                .get(identifier)
                .is_some_and(|owners| !owners.contains(&keep_id) && !owners.contains(&to_remove));
            if foreign {
                return Err(violation(std::slice::from_ref(identifier)));
            }
        }

        unindex_identifiers(&mut state, &removed);
        let now = Utc::now();
        removed.master_entity = Some(keep_id);
        removed.updated_at = now;
        removed.version += 1;

        identifier::union_into(&mut kept.identifiers, &survivor.identifiers);
        identifier::union_into(&mut kept.identifiers, &removed.identifiers);
        kept.attributes.fill_blanks_from(&survivor.attributes);
        if kept.last_resolved_at.is_none() {
            kept.last_resolved_at = survivor.last_resolved_at;
        }
        kept.updated_at = now;
        kept.version += 1;

        index_identifiers(&mut state, &kept);
        state.merged_from.entry(keep_id).or_default().insert(to_remove);
        state.by_id.insert(to_remove, removed);
        state.by_id.insert(keep_id, kept.clone());

        Ok(kept)
    }

    fn merged_entities(&self, id: EntityId) -> Result<Vec<EntityId>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("entity.merged_entities"))?;
        Ok(state
            .merged_from
            .get(&id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }

    fn list(&self, scope: Scope) -> Result<Vec<Entity>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("entity.list"))?;
        let mut results: Vec<Entity> = state.by_id.values().filter(|e| scope.admits(e)).cloned().collect();
        results.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(results)
    }

    fn count(&self, scope: Scope) -> Result<usize, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("entity.count"))?;
        Ok(state.by_id.values().filter(|e| scope.admits(e)).count())
    }
}

#[derive(Debug, Default)]
struct RelationshipState {
    by_id: HashMap<RelationshipId, Relationship>,
    by_source: HashMap<EntityId, HashSet<RelationshipId>>,
    by_target: HashMap<EntityId, HashSet<RelationshipId>>,
}

impl RelationshipState {
    fn unindex(&mut self, relationship: &Relationship) {
        if let Some(set) = self.by_source.get_mut(&relationship.source) {
            set.remove(&relationship.id);
            if set.is_empty() {
                self.by_source.remove(&relationship.source);
            }
        }
        if let Some(set) = self.by_target.get_mut(&relationship.target) {
            set.remove(&relationship.id);
            if set.is_empty() {
                self.by_target.remove(&relationship.target);
            }
        }
    }

    fn index(&mut self, relationship: &Relationship) {
        self.by_source
            .entry(relationship.source)
            .or_default()
            .insert(relationship.id.clone());
        self.by_target
            .entry(relationship.target)
            .or_default()
            .insert(relationship.id.clone());
    }

    fn collect(&self, index: &HashMap<EntityId, HashSet<RelationshipId>>, ids: &[EntityId]) -> Vec<Relationship> {
        let mut out: Vec<Relationship> = ids
            .iter()
            .filter_map(|id| index.get(id))
            .flatten()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter_map(|rid| self.by_id.get(rid).cloned())
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }
}

/// Thread-safe in-memory relationship store.
#[derive(Debug, Default)]
pub struct InMemoryRelationshipStore {
    state: RwLock<RelationshipState>,
}

impl InMemoryRelationshipStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RelationshipStore for InMemoryRelationshipStore {
    fn upsert(&self, relationship: &Relationship) -> Result<Relationship, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("relationship.upsert"))?;
        let stored = match state.by_id.get(&relationship.id).cloned() {
            Some(mut existing) => {
                state.unindex(&existing);
                existing.source = relationship.source;
                existing.target = relationship.target;
                existing.interests.clone_from(&relationship.interests);
                existing.provenance.clone_from(&relationship.provenance);
                if relationship.sample_date.is_some() {
                    existing.sample_date.clone_from(&relationship.sample_date);
                }
                if relationship.started_date.is_some() {
                    existing.started_date.clone_from(&relationship.started_date);
                }
                if relationship.ended_date.is_some() {
                    existing.ended_date.clone_from(&relationship.ended_date);
                }
                if relationship.is_indirect.is_some() {
                    existing.is_indirect = relationship.is_indirect;
                }
                existing.updated_at = Utc::now();
                existing
            }
            None => {
                let mut fresh = relationship.clone();
                fresh.updated_at = Utc::now();
                fresh
            }
        };
        state.index(&stored);
        state.by_id.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    fn get(&self, id: &RelationshipId) -> Result<Option<Relationship>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("relationship.get"))?;
        Ok(state.by_id.get(id).cloned())
    }

    fn find_by_source(&self, ids: &[EntityId]) -> Result<Vec<Relationship>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("relationship.find_by_source"))?;
        Ok(state.collect(&state.by_source, ids))
    }

    fn find_by_target(&self, ids: &[EntityId]) -> Result<Vec<Relationship>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("relationship.find_by_target"))?;
        Ok(state.collect(&state.by_target, ids))
    }

    fn repoint(&self, from: EntityId, to: EntityId) -> Result<usize, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("relationship.repoint"))?;
        let affected: BTreeSet<RelationshipId> = state
            .by_source
            .get(&from)
            .into_iter()
            .chain(state.by_target.get(&from))
            .flatten()
            .cloned()
            .collect();

        for rid in &affected {
            let Some(mut relationship) = state.by_id.get(rid).cloned() else {
                continue;
            };
            state.unindex(&relationship);
            if relationship.source == from {
                relationship.source = to;
            }
            if relationship.target == from {
                relationship.target = to;
            }
            relationship.updated_at = Utc::now();
            state.index(&relationship);
            state.by_id.insert(rid.clone(), relationship);
        }
        Ok(affected.len())
    }

    fn list(&self) -> Result<Vec<Relationship>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("relationship.list"))?;
        let mut out: Vec<Relationship> = state.by_id.values().cloned().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    fn count(&self) -> Result<usize, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("relationship.count"))?;
        Ok(state.by_id.len())
    }
}

/// Thread-safe in-memory statement store.
#[derive(Debug, Default)]
pub struct InMemoryStatementStore {
    state: RwLock<HashMap<StatementId, Statement>>,
}

impl StatementStore for InMemoryStatementStore {
    fn insert(&self, statement: Statement) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("statement.insert"))?;
        if state.contains_key(&statement.id) {
            return Err(StorageError::UniqueConstraintViolation {
                index: "statements._id",
                key: statement.id.to_string(),
            });
        }
        state.insert(statement.id, statement);
        Ok(())
    }

    fn get(&self, id: StatementId) -> Result<Option<Statement>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("statement.get"))?;
        Ok(state.get(&id).cloned())
    }

    fn find_by_entity(&self, entity_id: EntityId) -> Result<Vec<Statement>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("statement.find_by_entity"))?;
        let mut out: Vec<Statement> = state.values().filter(|s| s.entity_id == entity_id).cloned().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    fn repoint(&self, from: EntityId, to: EntityId) -> Result<usize, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("statement.repoint"))?;
        let mut touched = 0;
        for statement in state.values_mut().filter(|s| s.entity_id == from) {
            statement.entity_id = to;
            touched += 1;
        }
        Ok(touched)
    }
}

/// Thread-safe in-memory raw-data provenance store.
#[derive(Debug, Default)]
pub struct InMemoryProvenanceStore {
    state: RwLock<HashMap<(ProvenanceSubject, String), RawDataProvenance>>,
}

impl ProvenanceStore for InMemoryProvenanceStore {
    fn upsert(
        &self,
        subject: ProvenanceSubject,
        import_id: &str,
        raw_record_ids: &[RawRecordId],
    ) -> Result<RawDataProvenance, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("provenance.upsert"))?;
        let record = state
            .entry((subject.clone(), import_id.to_string()))
            .or_insert_with(|| RawDataProvenance::new(subject, import_id));
        record.add_records(raw_record_ids);
        Ok(record.clone())
    }

    fn find_by_subject(&self, subject: &ProvenanceSubject) -> Result<Vec<RawDataProvenance>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("provenance.find_by_subject"))?;
        let mut out: Vec<RawDataProvenance> = state.values().filter(|p| &p.subject == subject).cloned().collect();
        out.sort_by(|a, b| a.import_id.cmp(&b.import_id));
        Ok(out)
    }

    fn repoint_entity(&self, from: EntityId, to: EntityId) -> Result<usize, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("provenance.repoint_entity"))?;
        let keys: Vec<(ProvenanceSubject, String)> = state
            .keys()
            .filter(|(subject, _)| *subject == ProvenanceSubject::Entity(from))
            .cloned()
            .collect();

        for key in &keys {
            let Some(mut record) = state.remove(key) else {
                continue;
            };
            let target_key = (ProvenanceSubject::Entity(to), key.1.clone());
            match state.get_mut(&target_key) {
                Some(existing) => {
                    existing.add_records(&record.raw_record_ids);
                }
                None => {
                    record.subject = ProvenanceSubject::Entity(to);
                    record.updated_at = Utc::now();
                    state.insert(target_key, record);
                }
            }
        }
        Ok(keys.len())
    }
}

/// Thread-safe in-memory raw record store.
#[derive(Debug, Default)]
pub struct InMemoryRawRecordStore {
    state: RwLock<HashMap<RawRecordId, RawRecord>>,
}

impl RawRecordStore for InMemoryRawRecordStore {
    fn bulk_upsert(&self, records: Vec<RawRecord>) -> Result<Vec<RawRecordId>, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("raw_record.bulk_upsert"))?;
        let mut inserted = Vec::new();
        for record in records {
            if state.contains_key(&record.id) {
                continue;
            }
            inserted.push(record.id.clone());
            state.insert(record.id.clone(), record);
        }
        Ok(inserted)
    }

    fn get(&self, id: &RawRecordId) -> Result<Option<RawRecord>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("raw_record.get"))?;
        Ok(state.get(id).cloned())
    }

    fn count(&self) -> Result<usize, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("raw_record.count"))?;
        Ok(state.len())
    }
}

/// Bundle of in-memory stores sharing one process.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStores {
    pub entities: Arc<InMemoryEntityStore>,
    pub relationships: Arc<InMemoryRelationshipStore>,
    pub statements: Arc<InMemoryStatementStore>,
    pub provenance: Arc<InMemoryProvenanceStore>,
    pub raw_records: Arc<InMemoryRawRecordStore>,
}

impl InMemoryStores {
    /// Create empty stores.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Trait-object handles over these stores.
    #[must_use]
    pub fn handles(&self) -> Stores {
        Stores {
            entities: self.entities.clone(),
            relationships: self.relationships.clone(),
            statements: self.statements.clone(),
            provenance: self.provenance.clone(),
            raw_records: self.raw_records.clone(),
        }
    }
}
