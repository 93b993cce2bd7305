use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::entity::{Entity, EntityId};
use crate::error::{GraphError, GraphResult};
use crate::identifier::display_identifiers;
use crate::index::{notify_delete, notify_index, IndexNotifier};
use crate::merge::{validate, MergeDecider, MergeDecision, MergeOutcome, MergeState};
use crate::storage::{StorageError, Stores};

/// Merges one entity into another and repoints everything that referenced
/// the removed side.
#[derive(Clone)]
pub struct Merger {
    stores: Stores,
    notifier: Arc<dyn IndexNotifier>,
}

impl std::fmt::Debug for Merger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Merger").finish_non_exhaustive()
    }
}

impl Merger {
    #[must_use]
    pub fn new(stores: Stores, notifier: Arc<dyn IndexNotifier>) -> Self {
        Self { stores, notifier }
    }

    fn load(&self, id: EntityId) -> GraphResult<Entity> {
        self.stores
            .entities
            .get(id)?
            .ok_or_else(|| StorageError::EntityNotFound(id).into())
    }

    /// Lets `decider` order the pair, then merges.
    pub fn merge_pair(&self, decider: &dyn MergeDecider, a: &Entity, b: &Entity) -> GraphResult<MergeOutcome> {
        let decision = decider.decide(a, b);
        self.merge(decision.to_remove, decision.to_keep)
    }

    /// Merges `to_remove` into `to_keep`.
    ///
    /// Both sides are reloaded first, so the call works on the stored state
    /// rather than on whatever snapshot the caller holds. Calling it again
    /// for a pair that is already merged finishes any repointing a previous
    /// run did not get to.
    ///
    /// # Errors
    /// - `BadMerge` if the pair must not be merged (nothing is modified)
    /// - `Storage` if a step fails; the merge can be re-run
    pub fn merge(&self, to_remove: EntityId, to_keep: EntityId) -> GraphResult<MergeOutcome> {
        let remove = self.load(to_remove)?;
        let keep = self.load(to_keep)?;

        if let Err(err) = validate(&remove, &keep) {
            warn!(
                state = %MergeState::Rejected,
                to_remove = %remove.id,
                to_remove_name = remove.attributes.name.as_deref().unwrap_or_default(),
                to_remove_identifiers = %display_identifiers(&remove.identifiers),
                to_keep = %keep.id,
                to_keep_name = keep.attributes.name.as_deref().unwrap_or_default(),
                to_keep_identifiers = %display_identifiers(&keep.identifiers),
                error = %err,
                "merge rejected"
            );
            return Err(GraphError::BadMerge(err));
        }
        debug!(
            state = %MergeState::Validated,
            to_remove = %remove.id,
            to_keep = %keep.id,
            "merge validated"
        );

        let decision = MergeDecision::new(&remove, &keep);
        let survivor = decision.apply(&remove, &keep);
        info!(
            state = %MergeState::Merging,
            to_remove = %remove.id,
            to_remove_name = remove.attributes.name.as_deref().unwrap_or_default(),
            to_keep = %keep.id,
            to_keep_name = keep.attributes.name.as_deref().unwrap_or_default(),
            identifiers = %display_identifiers(&survivor.identifiers),
            fields_copied = ?decision.fields_to_copy,
            "merging entities"
        );

        let survivor = self.stores.entities.merge_into(remove.id, &survivor)?;
        let relationships_repointed = self.stores.relationships.repoint(remove.id, keep.id)?;
        let statements_repointed = self.stores.statements.repoint(remove.id, keep.id)?;
        let provenance_repointed = self.stores.provenance.repoint_entity(remove.id, keep.id)?;

        notify_delete(self.notifier.as_ref(), &remove);
        notify_index(self.notifier.as_ref(), &survivor);

        info!(
            state = %MergeState::Committed,
            to_remove = %remove.id,
            to_keep = %survivor.id,
            relationships_repointed,
            statements_repointed,
            provenance_repointed,
            "merge committed"
        );

        Ok(MergeOutcome {
            state: MergeState::Committed,
            decision,
            survivor,
            relationships_repointed,
            statements_repointed,
            provenance_repointed,
        })
    }
}
