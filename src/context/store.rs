//! Committed object storage shared by every context.
//!
//! Thread-safe in-memory map of the latest committed snapshot of each object.
//! Contexts read through it and write to it only when a unit of work is saved.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use crate::batch::ChangeBatch;
use crate::entity::{EntityName, ObjectId};
use crate::error::{ObserverError, ObserverResult};

use super::object::{ManagedObject, ObjectRef};

fn lock_err(context: &'static str) -> ObserverError {
    ObserverError::internal(format!("poisoned lock: {context}"))
}

/// One object's edit as handed from a context to the store.
#[derive(Debug, Clone)]
pub(crate) enum StagedChange {
    Insert(ManagedObject),
    Update {
        id: ObjectId,
        attributes: BTreeMap<String, Value>,
    },
    Delete(ObjectId),
}

#[derive(Debug, Default)]
struct StoreState {
    // Commit sequence keeps fetch results in insertion order.
    next_seq: u64,
    objects: HashMap<ObjectId, (u64, ObjectRef)>,
}

/// In-memory committed object store.
#[derive(Debug, Default)]
pub struct ObjectStore {
    state: RwLock<StoreState>,
}

impl ObjectStore {
    /// Creates an empty store ready to be shared between contexts.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Latest committed snapshot of one object.
    pub fn get(&self, id: ObjectId) -> ObserverResult<Option<ObjectRef>> {
        let state = self.state.read().map_err(|_| lock_err("store.get"))?;
        Ok(state.objects.get(&id).map(|(_, obj)| Arc::clone(obj)))
    }

    /// Committed objects of `entity` in insertion order, at most `limit`.
    pub fn fetch(
        &self,
        entity: &EntityName,
        limit: Option<usize>,
    ) -> ObserverResult<Vec<ObjectRef>> {
        let state = self.state.read().map_err(|_| lock_err("store.fetch"))?;
        let mut hits: Vec<&(u64, ObjectRef)> = state
            .objects
            .values()
            .filter(|(_, obj)| &obj.entity == entity)
            .collect();
        hits.sort_by_key(|(seq, _)| *seq);
        Ok(hits
            .into_iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(|(_, obj)| Arc::clone(obj))
            .collect())
    }

    /// Number of committed objects of `entity`.
    pub fn count(&self, entity: &EntityName) -> ObserverResult<usize> {
        let state = self.state.read().map_err(|_| lock_err("store.count"))?;
        Ok(state.objects.values().filter(|(_, obj)| &obj.entity == entity).count())
    }

    /// Number of committed objects.
    pub fn len(&self) -> ObserverResult<usize> {
        let state = self.state.read().map_err(|_| lock_err("store.len"))?;
        Ok(state.objects.len())
    }

    /// True when nothing has been committed.
    pub fn is_empty(&self) -> ObserverResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Applies one unit of work atomically and returns what was committed.
    ///
    /// Updates and deletes are resolved against the current committed entry,
    /// not the snapshot the context staged them from. Updates merge their
    /// attribute edits onto the current object and bump its version. Edits to
    /// objects another commit has already deleted are dropped from the batch.
    pub(crate) fn apply(
        &self,
        staged: Vec<StagedChange>,
        committed_at: DateTime<Utc>,
    ) -> ObserverResult<ChangeBatch<ObjectRef>> {
        let mut state = self.state.write().map_err(|_| lock_err("store.apply"))?;
        let mut batch = ChangeBatch::new();
        batch.committed_at = committed_at;

        for change in staged {
            match change {
                StagedChange::Insert(mut obj) => {
                    obj.version = 1;
                    obj.updated_at = committed_at;
                    let obj = Arc::new(obj);
                    let seq = state.next_seq;
                    state.next_seq += 1;
                    state.objects.insert(obj.id, (seq, Arc::clone(&obj)));
                    batch.inserted.push(obj);
                }
                StagedChange::Update { id, attributes } => {
                    let Some((_, current)) = state.objects.get_mut(&id) else {
                        debug!(%id, "dropping update of an object deleted by another commit");
                        continue;
                    };
                    let mut merged = ManagedObject::clone(current);
                    merged.attributes.extend(attributes);
                    merged.version = current.version + 1;
                    merged.updated_at = committed_at;
                    let merged = Arc::new(merged);
                    *current = Arc::clone(&merged);
                    batch.updated.push(merged);
                }
                StagedChange::Delete(id) => match state.objects.remove(&id) {
                    Some((_, current)) => batch.deleted.push(current),
                    None => debug!(%id, "dropping delete of an object deleted by another commit"),
                },
            }
        }
        Ok(batch)
    }

    #[cfg(test)]
    pub(crate) fn poison(&self) {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = self.state.write();
            panic!("poisoning store lock");
        }));
    }
}
