//! Commit batches and the aggregate change triple.

use chrono::{DateTime, Utc};

use crate::entity::ChangeKind;

/// Objects changed by one committed unit of work.
///
/// The three sets are handed over as produced by the change source. They are
/// treated independently: an object present in two sets is reported twice.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeBatch<O> {
    /// Objects removed by the commit.
    pub deleted: Vec<O>,
    /// Objects created by the commit.
    pub inserted: Vec<O>,
    /// Objects modified by the commit.
    pub updated: Vec<O>,
    /// When the commit happened.
    pub committed_at: DateTime<Utc>,
}

impl<O> ChangeBatch<O> {
    /// Creates an empty batch stamped with the current time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            deleted: Vec::new(),
            inserted: Vec::new(),
            updated: Vec::new(),
            committed_at: Utc::now(),
        }
    }

    /// Replaces the deleted set.
    #[must_use]
    pub fn with_deleted(mut self, objects: impl IntoIterator<Item = O>) -> Self {
        self.deleted = objects.into_iter().collect();
        self
    }

    /// Replaces the inserted set.
    #[must_use]
    pub fn with_inserted(mut self, objects: impl IntoIterator<Item = O>) -> Self {
        self.inserted = objects.into_iter().collect();
        self
    }

    /// Replaces the updated set.
    #[must_use]
    pub fn with_updated(mut self, objects: impl IntoIterator<Item = O>) -> Self {
        self.updated = objects.into_iter().collect();
        self
    }

    /// Appends one object to the set for `kind`.
    pub fn push(&mut self, kind: ChangeKind, object: O) {
        self.objects_mut(kind).push(object);
    }

    /// The set for `kind`.
    #[must_use]
    pub fn objects(&self, kind: ChangeKind) -> &[O] {
        match kind {
            ChangeKind::Deleted => &self.deleted,
            ChangeKind::Inserted => &self.inserted,
            ChangeKind::Updated => &self.updated,
        }
    }

    fn objects_mut(&mut self, kind: ChangeKind) -> &mut Vec<O> {
        match kind {
            ChangeKind::Deleted => &mut self.deleted,
            ChangeKind::Inserted => &mut self.inserted,
            ChangeKind::Updated => &mut self.updated,
        }
    }

    /// Total number of reported objects across all three sets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.deleted.len() + self.inserted.len() + self.updated.len()
    }

    /// True when all three sets are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty() && self.inserted.is_empty() && self.updated.is_empty()
    }
}

impl<O> Default for ChangeBatch<O> {
    fn default() -> Self {
        Self::new()
    }
}

/// The per-type `(deletes, inserts, updates)` triple given to aggregate
/// subscribers. Individual members may be empty; the triple as delivered
/// never is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Changes<O> {
    /// Deleted objects of the observed type.
    pub deletes: Vec<O>,
    /// Inserted objects of the observed type.
    pub inserts: Vec<O>,
    /// Updated objects of the observed type.
    pub updates: Vec<O>,
}

impl<O> Changes<O> {
    /// Bundles three slices.
    #[must_use]
    pub const fn new(deletes: Vec<O>, inserts: Vec<O>, updates: Vec<O>) -> Self {
        Self {
            deletes,
            inserts,
            updates,
        }
    }

    /// The member for `kind`.
    #[must_use]
    pub fn get(&self, kind: ChangeKind) -> &[O] {
        match kind {
            ChangeKind::Deleted => &self.deletes,
            ChangeKind::Inserted => &self.inserts,
            ChangeKind::Updated => &self.updates,
        }
    }

    /// Total number of objects in the triple.
    #[must_use]
    pub fn len(&self) -> usize {
        self.deletes.len() + self.inserts.len() + self.updates.len()
    }

    /// True when all three members are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.inserts.is_empty() && self.updates.is_empty()
    }
}
