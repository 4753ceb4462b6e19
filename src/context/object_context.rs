//! Units of work.
//!
//! An [`ObjectContext`] stages inserts, updates and deletes against a shared
//! [`ObjectStore`]. `save()` applies them atomically and reports exactly one
//! [`ChangeBatch`](crate::batch::ChangeBatch) to its [`ChangeListener`] on the calling thread.
//!
//! Edits to the same object inside one unit of work coalesce:
//! insert then update reports an insert, insert then delete reports nothing,
//! update then delete reports a delete.
//!
//! Contexts sharing a store only conflict at save time. Updates are stored as
//! attribute edits and merged onto whatever is committed when the save runs,
//! and edits to an object another context deleted first are dropped.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use crate::entity::{EntityName, ObjectId};
use crate::error::{ContextError, ObserverError, ObserverResult};
use crate::observer::{ChangeListener, DispatchReport};

use super::object::{ManagedObject, ObjectRef};
use super::store::{ObjectStore, StagedChange};

#[derive(Debug, Clone)]
enum PendingChange {
    Insert(ManagedObject),
    Update {
        // Committed snapshot with the edits applied, for reads in this context.
        view: ManagedObject,
        edits: BTreeMap<String, Value>,
    },
    Delete,
}

impl PendingChange {
    fn staged(&self, id: ObjectId) -> StagedChange {
        match self {
            Self::Insert(obj) => StagedChange::Insert(obj.clone()),
            Self::Update { edits, .. } => StagedChange::Update {
                id,
                attributes: edits.clone(),
            },
            Self::Delete => StagedChange::Delete(id),
        }
    }
}

#[derive(Debug, Default)]
struct Pending {
    order: Vec<ObjectId>,
    changes: HashMap<ObjectId, PendingChange>,
}

impl Pending {
    fn record(&mut self, id: ObjectId, change: PendingChange) {
        if self.changes.insert(id, change).is_none() {
            self.order.push(id);
        }
    }

    fn forget(&mut self, id: ObjectId) {
        self.changes.remove(&id);
        self.order.retain(|o| *o != id);
    }

    fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    fn staged(&self) -> Vec<StagedChange> {
        self.order
            .iter()
            .filter_map(|id| self.changes.get(id).map(|change| change.staged(*id)))
            .collect()
    }
}

/// A unit of work bound to a store and a change listener.
///
/// Contexts are `Send + Sync`; give each worker thread its own context and
/// point them all at the same store and dispatcher.
pub struct ObjectContext {
    store: Arc<ObjectStore>,
    listener: Arc<dyn ChangeListener<ObjectRef>>,
    pending: Mutex<Pending>,
}

impl ObjectContext {
    /// Creates an empty unit of work.
    #[must_use]
    pub fn new(store: Arc<ObjectStore>, listener: Arc<dyn ChangeListener<ObjectRef>>) -> Self {
        Self {
            store,
            listener,
            pending: Mutex::new(Pending::default()),
        }
    }

    /// The store this context commits into.
    #[must_use]
    pub fn store(&self) -> &Arc<ObjectStore> {
        &self.store
    }

    fn lock(&self) -> ObserverResult<MutexGuard<'_, Pending>> {
        self.pending
            .lock()
            .map_err(|_| ObserverError::internal("poisoned lock: context.pending"))
    }

    /// Stages a new object of `entity` with the given attributes.
    pub fn insert<K, V>(
        &self,
        entity: impl AsRef<str>,
        attributes: impl IntoIterator<Item = (K, V)>,
    ) -> ObserverResult<ObjectId>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let mut obj = ManagedObject::new(EntityName::parse(entity)?);
        for (k, v) in attributes {
            obj.set(k, v);
        }
        let id = obj.id;
        self.lock()?.record(id, PendingChange::Insert(obj));
        Ok(id)
    }

    /// Stages an attribute change.
    ///
    /// # Errors
    ///
    /// `ObjectNotFound` if the object is neither committed nor pending,
    /// `AlreadyDeleted` if it was deleted earlier in this unit of work.
    pub fn set(
        &self,
        id: ObjectId,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> ObserverResult<()> {
        let (key, value) = (key.into(), value.into());
        let mut pending = self.lock()?;
        match pending.changes.get_mut(&id) {
            Some(PendingChange::Insert(obj)) => {
                obj.set(key, value);
                return Ok(());
            }
            Some(PendingChange::Update { view, edits }) => {
                view.set(key.clone(), value.clone());
                edits.insert(key, value);
                return Ok(());
            }
            Some(PendingChange::Delete) => {
                return Err(ContextError::AlreadyDeleted { id }.into());
            }
            None => {}
        }

        let committed = self
            .store
            .get(id)?
            .ok_or(ContextError::ObjectNotFound { id })?;
        let mut view = ManagedObject::clone(&committed);
        view.set(key.clone(), value.clone());
        let edits = BTreeMap::from([(key, value)]);
        pending.record(id, PendingChange::Update { view, edits });
        Ok(())
    }

    /// Stages a deletion.
    ///
    /// # Errors
    ///
    /// Same as [`ObjectContext::set`].
    pub fn delete(&self, id: ObjectId) -> ObserverResult<()> {
        let mut pending = self.lock()?;
        if matches!(pending.changes.get(&id), Some(PendingChange::Insert(_))) {
            pending.forget(id);
            return Ok(());
        }
        if matches!(pending.changes.get(&id), Some(PendingChange::Delete)) {
            return Err(ContextError::AlreadyDeleted { id }.into());
        }

        if self.store.get(id)?.is_none() {
            return Err(ContextError::ObjectNotFound { id }.into());
        }
        pending.record(id, PendingChange::Delete);
        Ok(())
    }

    /// An object as seen from inside this unit of work.
    pub fn get(&self, id: ObjectId) -> ObserverResult<Option<ObjectRef>> {
        let pending = self.lock()?;
        match pending.changes.get(&id) {
            Some(PendingChange::Insert(obj) | PendingChange::Update { view: obj, .. }) => {
                Ok(Some(Arc::new(obj.clone())))
            }
            Some(PendingChange::Delete) => Ok(None),
            None => self.store.get(id),
        }
    }

    /// Objects of `entity` as seen from inside this unit of work: committed
    /// ones first (with pending edits applied, pending deletes removed), then
    /// pending inserts. At most `limit` results.
    pub fn fetch(
        &self,
        entity: impl AsRef<str>,
        limit: Option<usize>,
    ) -> ObserverResult<Vec<ObjectRef>> {
        let entity = EntityName::new(entity);
        let committed = self.store.fetch(&entity, None)?;
        let pending = self.lock()?;

        let mut out: Vec<ObjectRef> = committed
            .into_iter()
            .filter_map(|obj| match pending.changes.get(&obj.id) {
                Some(PendingChange::Update { view, .. }) => Some(Arc::new(view.clone())),
                Some(PendingChange::Delete) => None,
                Some(PendingChange::Insert(_)) | None => Some(obj),
            })
            .collect();
        out.extend(pending.order.iter().filter_map(|id| match pending.changes.get(id) {
            Some(PendingChange::Insert(obj)) if obj.entity == entity => {
                Some(Arc::new(obj.clone()))
            }
            _ => None,
        }));
        out.truncate(limit.unwrap_or(usize::MAX));
        Ok(out)
    }

    /// Number of objects of `entity` as seen from inside this unit of work.
    pub fn count(&self, entity: impl AsRef<str>) -> ObserverResult<usize> {
        Ok(self.fetch(entity, None)?.len())
    }

    /// True when there is something to save.
    pub fn has_changes(&self) -> ObserverResult<bool> {
        Ok(!self.lock()?.is_empty())
    }

    /// Discards every staged change.
    pub fn rollback(&self) -> ObserverResult<()> {
        *self.lock()? = Pending::default();
        Ok(())
    }

    /// Commits the unit of work and notifies the listener once.
    ///
    /// Returns `None` without notifying when nothing was staged, or when every
    /// staged edit targeted an object another context had already deleted.
    ///
    /// # Errors
    ///
    /// If the store cannot be written, the staged changes are kept and the
    /// save can be retried. A failing subscriber callback is propagated; the
    /// commit itself has already been applied to the store at that point.
    pub fn save(&self) -> ObserverResult<Option<DispatchReport>> {
        let batch = {
            let mut pending = self.lock()?;
            if pending.is_empty() {
                return Ok(None);
            }
            let batch = self.store.apply(pending.staged(), Utc::now())?;
            *pending = Pending::default();
            batch
        };

        debug!(
            inserted = batch.inserted.len(),
            updated = batch.updated.len(),
            deleted = batch.deleted.len(),
            "unit of work saved"
        );
        if batch.is_empty() {
            return Ok(None);
        }
        self.listener.handle_commit(&batch).map(Some)
    }
}

impl fmt::Debug for ObjectContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectContext")
            .field("store", &self.store)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::ChangeBatch;

    #[derive(Default)]
    struct Recorder {
        batches: Mutex<Vec<ChangeBatch<ObjectRef>>>,
    }

    impl ChangeListener<ObjectRef> for Recorder {
        fn handle_commit(
            &self,
            batch: &ChangeBatch<ObjectRef>,
        ) -> ObserverResult<DispatchReport> {
            self.batches.lock().unwrap().push(batch.clone());
            Ok(DispatchReport::default())
        }
    }

    fn setup() -> (ObjectContext, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let ctx = ObjectContext::new(ObjectStore::new(), recorder.clone());
        (ctx, recorder)
    }

    fn no_attrs() -> Vec<(String, Value)> {
        Vec::new()
    }

    #[test]
    fn save_without_changes_is_silent() {
        let (ctx, rec) = setup();
        assert!(!ctx.has_changes().unwrap());
        assert_eq!(ctx.save().unwrap(), None);
        assert!(rec.batches.lock().unwrap().is_empty());
    }

    #[test]
    fn insert_then_update_reports_insert() {
        let (ctx, rec) = setup();
        let id = ctx.insert("Rec", [("first", "a")]).unwrap();
        ctx.set(id, "first", "b").unwrap();
        ctx.save().unwrap();

        let batches = rec.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].inserted.len(), 1);
        assert!(batches[0].updated.is_empty());
        assert_eq!(batches[0].inserted[0].get_str("first"), Some("b"));
        assert_eq!(batches[0].inserted[0].version, 1);
    }

    #[test]
    fn insert_then_delete_cancels_out() {
        let (ctx, rec) = setup();
        let id = ctx.insert("Rec", no_attrs()).unwrap();
        ctx.delete(id).unwrap();
        assert!(!ctx.has_changes().unwrap());
        assert_eq!(ctx.save().unwrap(), None);
        assert!(rec.batches.lock().unwrap().is_empty());
    }

    #[test]
    fn update_then_delete_reports_committed_state() {
        let (ctx, rec) = setup();
        let id = ctx.insert("Rec", [("title", "old")]).unwrap();
        ctx.save().unwrap();

        ctx.set(id, "title", "new").unwrap();
        ctx.delete(id).unwrap();
        ctx.save().unwrap();

        let batches = rec.batches.lock().unwrap();
        let last = batches.last().unwrap();
        assert!(last.updated.is_empty());
        assert_eq!(last.deleted.len(), 1);
        assert_eq!(last.deleted[0].get_str("title"), Some("old"));
        assert!(ctx.store().get(id).unwrap().is_none());
    }

    #[test]
    fn repeated_updates_report_once_with_bumped_version() {
        let (ctx, rec) = setup();
        let id = ctx.insert("User", no_attrs()).unwrap();
        ctx.save().unwrap();

        ctx.set(id, "first", "x").unwrap();
        ctx.set(id, "last", "y").unwrap();
        ctx.save().unwrap();

        let batches = rec.batches.lock().unwrap();
        let last = batches.last().unwrap();
        assert_eq!(last.updated.len(), 1);
        assert_eq!(last.updated[0].version, 2);
        assert_eq!(last.updated[0].get_str("last"), Some("y"));
    }

    #[test]
    fn misuse_is_reported() {
        let (ctx, _rec) = setup();
        let ghost = ObjectId::new();
        let err = ctx.delete(ghost).unwrap_err();
        assert!(matches!(err, ObserverError::Context(ContextError::ObjectNotFound { .. })));

        let id = ctx.insert("Rec", no_attrs()).unwrap();
        ctx.save().unwrap();
        ctx.delete(id).unwrap();
        let err = ctx.set(id, "k", 1).unwrap_err();
        assert!(matches!(err, ObserverError::Context(ContextError::AlreadyDeleted { .. })));

        let err = ctx.insert("  ", no_attrs()).unwrap_err();
        assert!(matches!(err, ObserverError::Context(ContextError::EmptyEntityName)));
    }

    #[test]
    fn fetch_overlays_pending_changes() {
        let (ctx, _rec) = setup();
        let a = ctx.insert("Rec", [("n", 1)]).unwrap();
        let b = ctx.insert("Rec", [("n", 2)]).unwrap();
        ctx.save().unwrap();

        ctx.set(a, "n", 10).unwrap();
        ctx.delete(b).unwrap();
        let c = ctx.insert("Rec", [("n", 3)]).unwrap();
        let _u = ctx.insert("User", no_attrs()).unwrap();

        let recs = ctx.fetch("Rec", None).unwrap();
        assert_eq!(recs.iter().map(|o| o.id).collect::<Vec<_>>(), vec![a, c]);
        assert_eq!(recs[0].get("n"), Some(&Value::from(10)));
        assert_eq!(ctx.count("Rec").unwrap(), 2);
        assert_eq!(ctx.fetch("Rec", Some(1)).unwrap().len(), 1);
        assert!(ctx.get(b).unwrap().is_none());
    }

    #[test]
    fn failed_store_write_keeps_the_unit_of_work() {
        let (ctx, rec) = setup();
        ctx.insert("Rec", [("title", "kept")]).unwrap();
        ctx.store().poison();

        let err = ctx.save().unwrap_err();
        assert!(err.is_internal());
        assert!(ctx.has_changes().unwrap());
        assert!(rec.batches.lock().unwrap().is_empty());
    }

    #[test]
    fn rollback_discards_pending() {
        let (ctx, _rec) = setup();
        ctx.insert("Rec", no_attrs()).unwrap();
        ctx.rollback().unwrap();
        assert!(!ctx.has_changes().unwrap());
        assert!(ctx.store().is_empty().unwrap());
    }
}
