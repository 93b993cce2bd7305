//! End-to-end merge behaviour over the in-memory stores.

use std::sync::Arc;

use ownergraph::identifier::Identifier;
use ownergraph::index::InMemoryIndex;
use ownergraph::provenance::{ProvenanceSubject, RawRecordId};
use ownergraph::storage::{EntityStore, InMemoryStores};
use ownergraph::{
    Entity, EntityId, GraphError, Interest, MergeState, NewEntity, OwnershipGraph, Relationship, RelationshipId,
    Scope, Statement, UpsertEngine,
};

struct Harness {
    stores: InMemoryStores,
    index: Arc<InMemoryIndex>,
    engine: UpsertEngine,
}

fn harness() -> Harness {
    let stores = InMemoryStores::new();
    let index = Arc::new(InMemoryIndex::new());
    let engine = UpsertEngine::new(stores.handles(), index.clone());
    Harness { stores, index, engine }
}

fn restored(stores: &InMemoryStores, candidate: NewEntity) -> Entity {
    let entity = Entity::from_candidate(EntityId::new(), candidate);
    stores.entities.restore(entity.clone()).unwrap();
    entity
}

fn gb(number: &str) -> Identifier {
    Identifier::open_corporates("gb", number)
}

#[test]
fn test_race_duplicates_collapse_into_one_entity() {
    let h = harness();
    // Both documents hold {gb, 12345}: the state a lost insert race leaves.
    let a = restored(&h.stores, NewEntity::legal_entity().identifier(gb("12345")).name("Foo"));
    let b = restored(
        &h.stores,
        NewEntity::legal_entity()
            .identifier(gb("12345"))
            .identifier(Identifier::open_corporates("dk", "999")),
    );

    let entity = h
        .engine
        .upsert_and_merge_duplicates(&NewEntity::legal_entity().identifier(gb("12345")))
        .unwrap();

    assert_eq!(entity.id, a.id);
    assert_eq!(entity.identifiers, vec![gb("12345"), Identifier::open_corporates("dk", "999")]);
    assert_eq!(entity.attributes.name.as_deref(), Some("Foo"));
    assert_eq!(h.stores.entities.count(Scope::Live).unwrap(), 1);

    let alias = h.stores.entities.get(b.id).unwrap().unwrap();
    assert_eq!(alias.master_entity, Some(a.id));
    assert!(!h.index.contains(b.id));
    assert!(h.index.contains(a.id));
}

#[test]
fn test_merge_moves_every_reference_to_the_survivor() {
    let h = harness();
    let handles = h.stores.handles();
    let keep = handles
        .entities
        .insert(
            &NewEntity::legal_entity()
                .identifier(gb("1"))
                .name("Foo Limited")
                .address("1 High St"),
        )
        .unwrap();
    let remove = handles
        .entities
        .insert(&NewEntity::legal_entity().identifier(Identifier::source_company("SOURCE_2", "1")))
        .unwrap();
    let owner = handles
        .entities
        .insert(&NewEntity::natural_person().identifier(Identifier::new().with("person", "1")).name("Jane"))
        .unwrap();

    let rel = Relationship::new(RelationshipId::from_parts([("n", "1")]), owner.id, remove.id)
        .with_interests(vec![Interest::flag("ownership-of-shares-75-to-100-percent")]);
    handles.relationships.upsert(&rel).unwrap();
    handles
        .statements
        .insert(Statement::new(remove.id, "psc-exists-but-not-identified"))
        .unwrap();
    handles
        .provenance
        .upsert(ProvenanceSubject::Entity(remove.id), "import-1", &[RawRecordId::for_content("line")])
        .unwrap();

    let outcome = h.engine.merger().merge(remove.id, keep.id).unwrap();
    assert_eq!(outcome.state, MergeState::Committed);
    assert_eq!(outcome.relationships_repointed, 1);
    assert_eq!(outcome.statements_repointed, 1);
    assert_eq!(outcome.provenance_repointed, 1);

    let survivor = handles.entities.get(keep.id).unwrap().unwrap();
    assert!(survivor.identifiers.contains(&Identifier::source_company("SOURCE_2", "1")));
    assert!(survivor.identifiers.contains(&gb("1")));
    assert_eq!(survivor.attributes.address.as_deref(), Some("1 High St"));

    // Nothing live references the removed entity any more.
    assert!(handles.relationships.find_by_source(&[remove.id]).unwrap().is_empty());
    assert!(handles.relationships.find_by_target(&[remove.id]).unwrap().is_empty());
    assert!(handles.statements.find_by_entity(remove.id).unwrap().is_empty());
    assert!(handles
        .provenance
        .find_by_subject(&ProvenanceSubject::Entity(remove.id))
        .unwrap()
        .is_empty());
    assert_eq!(handles.statements.find_by_entity(keep.id).unwrap().len(), 1);

    let graph = OwnershipGraph::new(handles.clone());
    assert_eq!(graph.relationships_as_target(keep.id).unwrap().len(), 1);
    assert_eq!(graph.entity(remove.id).unwrap().unwrap().id, keep.id);
    assert_eq!(h.index.delete_calls(), 1);
}

#[test]
fn test_rejected_merges_change_nothing() {
    let h = harness();
    let handles = h.stores.handles();
    let company = handles.entities.insert(&NewEntity::legal_entity().identifier(gb("1"))).unwrap();
    let other_company = handles
        .entities
        .insert(&NewEntity::legal_entity().identifier(Identifier::open_corporates("pl", "1")))
        .unwrap();
    let person = handles
        .entities
        .insert(&NewEntity::natural_person().identifier(Identifier::new().with("person", "1")))
        .unwrap();

    let before = handles.entities.list(Scope::All).unwrap();

    let differing = h.engine.merger().merge(company.id, other_company.id).unwrap_err();
    assert!(differing.is_bad_merge());
    let mismatch = h.engine.merger().merge(person.id, company.id).unwrap_err();
    assert!(mismatch.is_bad_merge());
    let same = h.engine.merger().merge(company.id, company.id).unwrap_err();
    assert!(matches!(same, GraphError::BadMerge(_)));

    let after = handles.entities.list(Scope::All).unwrap();
    assert_eq!(before.len(), after.len());
    for (b, a) in before.iter().zip(&after) {
        assert_eq!(b.id, a.id);
        assert_eq!(b.master_entity, a.master_entity);
        assert_eq!(b.identifiers, a.identifiers);
        assert_eq!(b.version, a.version);
    }
    assert_eq!(h.index.delete_calls(), 0);
}

#[test]
fn test_rerunning_a_merge_finishes_the_repoint() {
    let h = harness();
    let handles = h.stores.handles();
    let keep = handles.entities.insert(&NewEntity::legal_entity().identifier(gb("1"))).unwrap();
    let remove = handles
        .entities
        .insert(&NewEntity::legal_entity().identifier(Identifier::new().with("x", "1")))
        .unwrap();

    // An interrupted merge: the entity step committed, the repoint did not.
    let mut survivor = keep.clone();
    survivor.identifiers.extend(remove.identifiers.clone());
    handles.entities.merge_into(remove.id, &survivor).unwrap();
    let rel = Relationship::new(RelationshipId::from_parts([("n", "1")]), remove.id, keep.id);
    handles.relationships.upsert(&rel).unwrap();

    let outcome = h.engine.merger().merge(remove.id, keep.id).unwrap();
    assert_eq!(outcome.relationships_repointed, 1);
    assert_eq!(handles.relationships.get(&rel.id).unwrap().unwrap().source, keep.id);

    let again = h.engine.merger().merge(remove.id, keep.id).unwrap();
    assert_eq!(again.relationships_repointed, 0);
    assert_eq!(again.survivor.identifiers, outcome.survivor.identifiers);
    assert_eq!(handles.entities.count(Scope::Live).unwrap(), 1);
}

#[test]
fn test_alias_of_another_entity_is_not_merged_again() {
    let h = harness();
    let handles = h.stores.handles();
    let a = handles.entities.insert(&NewEntity::legal_entity().identifier(gb("1"))).unwrap();
    let b = handles
        .entities
        .insert(&NewEntity::legal_entity().identifier(Identifier::new().with("x", "1")))
        .unwrap();
    let c = handles
        .entities
        .insert(&NewEntity::legal_entity().identifier(Identifier::new().with("y", "1")))
        .unwrap();

    h.engine.merger().merge(b.id, a.id).unwrap();
    let err = h.engine.merger().merge(b.id, c.id).unwrap_err();
    assert!(err.is_bad_merge());
    let err = h.engine.merger().merge(c.id, b.id).unwrap_err();
    assert!(err.is_bad_merge());
    assert_eq!(handles.entities.resolve(b.id).unwrap().unwrap().id, a.id);
}
