//! Read side of the ownership graph.
//!
//! Reads never expose aliases: an id that has been merged away resolves to
//! its live master, and relationship endpoints are redirected the same way.

use std::collections::{BTreeSet, HashSet, VecDeque};

use crate::entity::{Entity, EntityId};
use crate::error::GraphResult;
use crate::relationship::{Relationship, RelationshipId};
use crate::storage::{Scope, Stores};

/// Alias-aware queries over the stores.
#[derive(Debug, Clone)]
pub struct OwnershipGraph {
    stores: Stores,
}

impl OwnershipGraph {
    #[must_use]
    pub const fn new(stores: Stores) -> Self {
        Self { stores }
    }

    /// The live entity `id` resolves to.
    pub fn entity(&self, id: EntityId) -> GraphResult<Option<Entity>> {
        Ok(self.stores.entities.resolve(id)?)
    }

    /// The live id for `id` plus every id ever merged into it, directly or
    /// through an alias chain.
    pub fn all_ids(&self, id: EntityId) -> GraphResult<Vec<EntityId>> {
        let Some(master) = self.entity(id)? else {
            return Ok(Vec::new());
        };

        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([master.id]);
        while let Some(next) = queue.pop_front() {
            if !seen.insert(next) {
                continue;
            }
            queue.extend(self.stores.entities.merged_entities(next)?);
        }

        let mut ids = vec![master.id];
        ids.extend(seen.into_iter().filter(|i| *i != master.id));
        Ok(ids)
    }

    fn redirect(&self, mut relationship: Relationship) -> GraphResult<Relationship> {
        if let Some(source) = self.stores.entities.resolve(relationship.source)? {
            relationship.source = source.id;
        }
        if let Some(target) = self.stores.entities.resolve(relationship.target)? {
            relationship.target = target.id;
        }
        Ok(relationship)
    }

    /// A relationship with both endpoints pointing at live entities.
    pub fn relationship(&self, id: &RelationshipId) -> GraphResult<Option<Relationship>> {
        self.stores
            .relationships
            .get(id)?
            .map(|r| self.redirect(r))
            .transpose()
    }

    /// Relationships in which the entity, or anything merged into it, is the
    /// owner.
    pub fn relationships_as_source(&self, id: EntityId) -> GraphResult<Vec<Relationship>> {
        let ids = self.all_ids(id)?;
        self.stores
            .relationships
            .find_by_source(&ids)?
            .into_iter()
            .map(|r| self.redirect(r))
            .collect()
    }

    /// Relationships in which the entity is owned. People are never owned.
    ///
    /// A company with no stored owners falls back to one relationship per
    /// statement made about it, each from an unknown owner.
    pub fn relationships_as_target(&self, id: EntityId) -> GraphResult<Vec<Relationship>> {
        let master = match self.entity(id)? {
            Some(entity) if !entity.is_natural_person() => entity.id,
            _ => return Ok(Vec::new()),
        };
        let ids = self.all_ids(id)?;
        let stored = self.stores.relationships.find_by_target(&ids)?;
        if !stored.is_empty() {
            return stored.into_iter().map(|r| self.redirect(r)).collect();
        }

        let mut relationships = Vec::new();
        for alias in &ids {
            for statement in self.stores.statements.find_by_entity(*alias)? {
                let mut relationship = statement.to_relationship();
                relationship.target = master;
                relationships.push(relationship);
            }
        }
        Ok(relationships)
    }

    /// Number of distinct `(source, target, interest types)` triples after
    /// alias redirection.
    pub fn distinct_relationship_count(&self) -> GraphResult<usize> {
        let mut keys = HashSet::new();
        for relationship in self.stores.relationships.list()? {
            keys.insert(self.redirect(relationship)?.grouping_key());
        }
        Ok(keys.len())
    }

    pub fn live_entity_count(&self) -> GraphResult<usize> {
        Ok(self.stores.entities.count(Scope::Live)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::entity::NewEntity;
    use crate::identifier::Identifier;
    use crate::index::NoopNotifier;
    use crate::merge::Merger;
    use crate::relationship::Interest;
    use crate::statement::Statement;

    fn insert(stores: &Stores, candidate: NewEntity) -> Entity {
        stores.entities.insert(&candidate).unwrap()
    }

    #[test]
    fn test_reads_redirect_through_aliases() {
        let stores = Stores::in_memory();
        let company_a = insert(&stores, NewEntity::legal_entity().identifier(Identifier::new().with("a", "1")));
        let company_b = insert(&stores, NewEntity::legal_entity().identifier(Identifier::new().with("b", "1")));
        let person = insert(&stores, NewEntity::natural_person().identifier(Identifier::new().with("p", "1")));

        let rel = Relationship::new(RelationshipId::from_parts([("n", "1")]), person.id, company_a.id)
            .with_interests(vec![Interest::flag("voting-rights")]);
        stores.relationships.upsert(&rel).unwrap();

        // Alias the company without repointing, as an interrupted merge would.
        stores.entities.merge_into(company_a.id, &company_b).unwrap();

        let graph = OwnershipGraph::new(stores.clone());
        assert_eq!(graph.entity(company_a.id).unwrap().unwrap().id, company_b.id);
        assert_eq!(graph.relationship(&rel.id).unwrap().unwrap().target, company_b.id);
        assert_eq!(graph.all_ids(company_a.id).unwrap(), vec![company_b.id, company_a.id]);
        assert_eq!(graph.relationships_as_target(company_b.id).unwrap().len(), 1);
        assert_eq!(graph.relationships_as_source(person.id).unwrap().len(), 1);
        assert!(graph.relationships_as_target(person.id).unwrap().is_empty());
        assert_eq!(graph.live_entity_count().unwrap(), 2);
    }

    #[test]
    fn test_target_reads_fall_back_to_statements() {
        let stores = Stores::in_memory();
        let company = insert(&stores, NewEntity::legal_entity().identifier(Identifier::new().with("c", "1")));
        let alias = insert(&stores, NewEntity::legal_entity().identifier(Identifier::new().with("c", "2")));
        let graph = OwnershipGraph::new(stores.clone());
        assert!(graph.relationships_as_target(company.id).unwrap().is_empty());

        stores
            .statements
            .insert(Statement::new(alias.id, "psc-exists-but-not-identified"))
            .unwrap();
        stores.entities.merge_into(alias.id, &company).unwrap();

        let fallback = graph.relationships_as_target(company.id).unwrap();
        assert_eq!(fallback.len(), 1);
        assert_eq!(fallback[0].target, company.id);
        assert_eq!(fallback[0].interests, vec![Interest::flag("psc-exists-but-not-identified")]);
        assert!(graph.entity(fallback[0].source).unwrap().is_none());
        assert_eq!(graph.relationships_as_target(company.id).unwrap()[0].id, fallback[0].id);

        let person = insert(&stores, NewEntity::natural_person().identifier(Identifier::new().with("p", "1")));
        let rel = Relationship::new(RelationshipId::from_parts([("n", "1")]), person.id, company.id);
        stores.relationships.upsert(&rel).unwrap();
        let stored = graph.relationships_as_target(company.id).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].source, person.id);
    }

    #[test]
    fn test_distinct_count_collapses_merged_duplicates() {
        let stores = Stores::in_memory();
        let company = insert(&stores, NewEntity::legal_entity().identifier(Identifier::new().with("c", "1")));
        let p1 = insert(&stores, NewEntity::natural_person().identifier(Identifier::new().with("p", "1")));
        let p2 = insert(&stores, NewEntity::natural_person().identifier(Identifier::new().with("p", "2")));

        for (n, owner) in [("1", p1.id), ("2", p2.id)] {
            let rel = Relationship::new(RelationshipId::from_parts([("n", n)]), owner, company.id)
                .with_interests(vec![Interest::flag("shareholding")]);
            stores.relationships.upsert(&rel).unwrap();
        }

        let graph = OwnershipGraph::new(stores.clone());
        assert_eq!(graph.distinct_relationship_count().unwrap(), 2);

        Merger::new(stores.clone(), Arc::new(NoopNotifier)).merge(p2.id, p1.id).unwrap();
        assert_eq!(graph.distinct_relationship_count().unwrap(), 1);
        assert_eq!(stores.relationships.count().unwrap(), 2);
    }
}
