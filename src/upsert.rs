//! Merge-safe upserts.
//!
//! [`UpsertEngine::upsert`] is the only way candidates become entities. The
//! store's atomic find-one-and-upsert does the work; the engine adds the
//! retry policy around uniqueness races and turns a genuine multi-match into
//! [`DuplicateEntitiesDetected`]. [`UpsertEngine::upsert_and_merge_duplicates`]
//! is what the pipeline calls: it resolves duplicates by merging and tries
//! again.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::entity::{Entity, NewEntity};
use crate::error::{BadMergeError, DuplicateEntitiesDetected, GraphError, GraphResult};
use crate::identifier::display_identifiers;
use crate::index::{notify_index, IndexNotifier};
use crate::merge::{MergeDecider, MergeOutcome, MergeState, Merger, PopulatedFieldsDecider};
use crate::relationship::Relationship;
use crate::retry::{retry, Attempt, RetryPolicy};
use crate::storage::{Scope, StorageError, Stores};

/// Entity and relationship upserts over a set of stores.
#[derive(Clone)]
pub struct UpsertEngine {
    stores: Stores,
    notifier: Arc<dyn IndexNotifier>,
    decider: Arc<dyn MergeDecider>,
    merger: Merger,
    contention: RetryPolicy,
}

impl std::fmt::Debug for UpsertEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpsertEngine")
            .field("contention", &self.contention)
            .finish_non_exhaustive()
    }
}

/// Merge failures caused by another worker changing the pair first. The
/// upsert is simply tried again against the new state.
fn is_stale_merge(err: &GraphError) -> bool {
    matches!(
        err,
        GraphError::BadMerge(BadMergeError::AlreadyMerged { .. } | BadMergeError::AliasedSurvivor { .. })
            | GraphError::Storage(
                StorageError::UniqueConstraintViolation { .. }
                    | StorageError::EntityNotFound(_)
                    | StorageError::AliasConflict { .. }
            )
    )
}

impl UpsertEngine {
    /// Creates an engine with the default decider and unbounded contention
    /// retries.
    #[must_use]
    pub fn new(stores: Stores, notifier: Arc<dyn IndexNotifier>) -> Self {
        let merger = Merger::new(stores.clone(), Arc::clone(&notifier));
        Self {
            stores,
            notifier,
            decider: Arc::new(PopulatedFieldsDecider),
            merger,
            contention: RetryPolicy::unbounded(),
        }
    }

    #[must_use]
    pub fn with_decider(mut self, decider: Arc<dyn MergeDecider>) -> Self {
        self.decider = decider;
        self
    }

    #[must_use]
    pub fn with_contention_policy(mut self, policy: RetryPolicy) -> Self {
        self.contention = policy;
        self
    }

    #[must_use]
    pub const fn stores(&self) -> &Stores {
        &self.stores
    }

    #[must_use]
    pub const fn merger(&self) -> &Merger {
        &self.merger
    }

    /// Finds the single live entity sharing an identifier with `candidate`
    /// and updates it, or inserts a new one.
    ///
    /// # Errors
    /// - `Validation` if the candidate has no or invalid identifiers
    /// - `DuplicateEntities` if more than one live entity matches; never
    ///   retried here
    pub fn upsert(&self, candidate: &NewEntity) -> GraphResult<Entity> {
        candidate.validate()?;

        let entity = retry::<_, GraphError, _>(&self.contention, |attempt| {
            match self.stores.entities.find_one_and_upsert(candidate) {
                Ok(entity) => Attempt::Done(entity),
                Err(err) if err.is_constraint_violation() => {
                    match self.stores.entities.find_by_identifiers(&candidate.identifiers, Scope::Live) {
                        Ok(matches) if matches.len() > 1 => Attempt::Fail(
                            DuplicateEntitiesDetected::new(candidate.identifiers.clone(), matches).into(),
                        ),
                        Ok(_) => {
                            debug!(
                                attempt,
                                identifiers = %display_identifiers(&candidate.identifiers),
                                "identifier contention, retrying upsert"
                            );
                            Attempt::Retry(err.into())
                        }
                        Err(read_err) => Attempt::Fail(read_err.into()),
                    }
                }
                Err(err) => Attempt::Fail(err.into()),
            }
        })?;

        notify_index(self.notifier.as_ref(), &entity);
        Ok(entity)
    }

    /// Upserts, merging duplicate matches until a single live entity remains.
    ///
    /// # Errors
    /// `BadMerge` when two matches must not be merged; the condition is
    /// logged with both sides so it can be audited.
    pub fn upsert_and_merge_duplicates(&self, candidate: &NewEntity) -> GraphResult<Entity> {
        retry(&self.contention, |_| match self.upsert(candidate) {
            Ok(entity) => Attempt::Done(entity),
            Err(GraphError::DuplicateEntities(dup)) => match self.handle_duplicates(&dup) {
                Ok(_) => Attempt::Retry(GraphError::DuplicateEntities(dup)),
                Err(err) if is_stale_merge(&err) => {
                    debug!(error = %err, "duplicate set changed underneath merge, retrying");
                    Attempt::Retry(err)
                }
                Err(err) => Attempt::Fail(err),
            },
            Err(err) => Attempt::Fail(err),
        })
    }

    /// Merges the first two matches of a duplicate set.
    ///
    /// # Errors
    /// Whatever the merger reports.
    pub fn handle_duplicates(&self, dup: &DuplicateEntitiesDetected) -> GraphResult<MergeOutcome> {
        for entity in &dup.matches {
            warn!(
                state = %MergeState::Detected,
                entity_id = %entity.id,
                name = entity.attributes.name.as_deref().unwrap_or_default(),
                identifiers = %display_identifiers(&entity.identifiers),
                candidate_identifiers = %display_identifiers(&dup.identifiers),
                "duplicate entities detected"
            );
        }
        let [a, b, ..] = dup.matches.as_slice() else {
            return Err(GraphError::internal(format!(
                "duplicate set for {} holds fewer than two entities",
                display_identifiers(&dup.identifiers)
            )));
        };
        self.merger.merge_pair(self.decider.as_ref(), a, b)
    }

    /// Upserts a relationship by its composite id. A uniqueness violation is
    /// retried exactly once.
    pub fn upsert_relationship(&self, relationship: &Relationship) -> GraphResult<Relationship> {
        retry(&RetryPolicy::once(), |attempt| {
            match self.stores.relationships.upsert(relationship) {
                Ok(stored) => Attempt::Done(stored),
                Err(err) if err.is_constraint_violation() => {
                    debug!(attempt, relationship_id = %relationship.id, "relationship upsert conflict");
                    Attempt::Retry(err.into())
                }
                Err(err) => Attempt::Fail(err.into()),
            }
        })
    }
}
