//! Search index notification.
//!
//! The full-text index lives outside this crate. It only hears about
//! committed entity writes: `index` after an upsert or a merge survivor
//! update, `delete` for the removed side of a merge. Notification is best
//! effort; failures are logged and never undo the write.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use thiserror::Error;
use tracing::warn;

use crate::entity::{Entity, EntityId};
use crate::error::GraphResult;
use crate::storage::{EntityStore, Scope};

/// Errors reported by an index backend.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Index unavailable: {0}")]
    Unavailable(String),

    #[error("Index rejected document for {id}: {reason}")]
    Rejected { id: EntityId, reason: String },
}

/// Receives post-commit entity changes.
pub trait IndexNotifier: Send + Sync {
    /// (Re)indexes an entity.
    fn index(&self, entity: &Entity) -> Result<(), IndexError>;

    /// Removes an entity from the index.
    fn delete(&self, entity: &Entity) -> Result<(), IndexError>;
}

/// Notifier that drops every call.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl IndexNotifier for NoopNotifier {
    fn index(&self, _entity: &Entity) -> Result<(), IndexError> {
        Ok(())
    }

    fn delete(&self, _entity: &Entity) -> Result<(), IndexError> {
        Ok(())
    }
}

/// In-process index holding the documents it was sent.
#[derive(Debug, Default)]
pub struct InMemoryIndex {
    documents: RwLock<HashMap<EntityId, serde_json::Value>>,
    index_calls: AtomicU64,
    delete_calls: AtomicU64,
}

impl InMemoryIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The indexed document for an entity.
    #[must_use]
    pub fn document(&self, id: EntityId) -> Option<serde_json::Value> {
        self.documents.read().ok()?.get(&id).cloned()
    }

    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.documents.read().map(|docs| docs.contains_key(&id)).unwrap_or(false)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.read().map(|docs| docs.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn index_calls(&self) -> u64 {
        self.index_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn delete_calls(&self) -> u64 {
        self.delete_calls.load(Ordering::SeqCst)
    }
}

impl IndexNotifier for InMemoryIndex {
    fn index(&self, entity: &Entity) -> Result<(), IndexError> {
        self.index_calls.fetch_add(1, Ordering::SeqCst);
        let mut docs = self
            .documents
            .write()
            .map_err(|_| IndexError::Unavailable("poisoned lock: index.index".to_string()))?;
        docs.insert(entity.id, entity.indexed_document());
        Ok(())
    }

    fn delete(&self, entity: &Entity) -> Result<(), IndexError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        let mut docs = self
            .documents
            .write()
            .map_err(|_| IndexError::Unavailable("poisoned lock: index.delete".to_string()))?;
        docs.remove(&entity.id);
        Ok(())
    }
}

/// Sends `index` for an entity, logging failures.
pub fn notify_index(notifier: &dyn IndexNotifier, entity: &Entity) {
    if let Err(err) = notifier.index(entity) {
        warn!(entity_id = %entity.id, error = %err, "index notification failed");
    }
}

/// Sends `delete` for an entity, logging failures.
pub fn notify_delete(notifier: &dyn IndexNotifier, entity: &Entity) {
    if let Err(err) = notifier.delete(entity) {
        warn!(entity_id = %entity.id, error = %err, "index delete notification failed");
    }
}

/// Reindexes every entity in `scope`. Returns the number of entities sent.
///
/// # Errors
/// Fails only if the store cannot be listed.
pub fn rebuild(notifier: &dyn IndexNotifier, store: &dyn EntityStore, scope: Scope) -> GraphResult<usize> {
    let entities = store.list(scope)?;
    for entity in &entities {
        notify_index(notifier, entity);
    }
    Ok(entities.len())
}
