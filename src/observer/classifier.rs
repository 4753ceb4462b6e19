//! Change classification: grouping changed objects by concrete entity type.
//!
//! Matching is nominal. An object belongs to type `T` exactly when its entity
//! name equals `T`'s; prefixes and hierarchies never match. Objects whose type
//! cannot be resolved belong to no type.

use std::collections::{HashMap, HashSet};

use crate::batch::ChangeBatch;
use crate::entity::{ChangeKind, ChangedObject, EntityName};

/// Distinct entity types present in `objects`, each once, in discovery order.
#[must_use]
pub fn types_present<O: ChangedObject>(objects: &[O]) -> Vec<EntityName> {
    let mut seen: HashSet<&EntityName> = HashSet::new();
    let mut out = Vec::new();
    for name in objects.iter().filter_map(|o| o.entity_name()) {
        if seen.insert(name) {
            out.push(name.clone());
        }
    }
    out
}

/// Members of `objects` whose entity type is exactly `entity`, in input order.
#[must_use]
pub fn filter<O: ChangedObject + Clone>(objects: &[O], entity: &EntityName) -> Vec<O> {
    objects
        .iter()
        .filter(|o| o.entity_name() == Some(entity))
        .cloned()
        .collect()
}

/// A batch split into per-type slices for a fixed list of observed types.
///
/// Built in one pass per change kind. Objects of unobserved or unresolvable
/// types are looked up once and dropped, never copied.
pub struct TypePartition<O> {
    deletes: Vec<Vec<O>>,
    inserts: Vec<Vec<O>>,
    updates: Vec<Vec<O>>,
}

impl<O: ChangedObject + Clone> TypePartition<O> {
    /// Partitions `batch` over `types`. Slice `i` belongs to `types[i]`.
    #[must_use]
    pub fn new<'a>(
        batch: &ChangeBatch<O>,
        types: impl IntoIterator<Item = &'a EntityName>,
    ) -> Self {
        let index: HashMap<&EntityName, usize> = types
            .into_iter()
            .enumerate()
            .map(|(i, t)| (t, i))
            .collect();
        let width = index.values().max().map_or(0, |m| m + 1);

        let split = |kind: ChangeKind| {
            let mut buckets: Vec<Vec<O>> = (0..width).map(|_| Vec::new()).collect();
            for object in batch.objects(kind) {
                let Some(name) = object.entity_name() else {
                    continue;
                };
                if let Some(&i) = index.get(name) {
                    buckets[i].push(object.clone());
                }
            }
            buckets
        };

        Self {
            deletes: split(ChangeKind::Deleted),
            inserts: split(ChangeKind::Inserted),
            updates: split(ChangeKind::Updated),
        }
    }
}

impl<O> TypePartition<O> {
    /// Moves out the `(deletes, inserts, updates)` slices of type `i`.
    ///
    /// A second call for the same index yields empty slices.
    pub fn take(&mut self, i: usize) -> (Vec<O>, Vec<O>, Vec<O>) {
        let take = |buckets: &mut Vec<Vec<O>>| {
            buckets.get_mut(i).map(std::mem::take).unwrap_or_default()
        };
        (
            take(&mut self.deletes),
            take(&mut self.inserts),
            take(&mut self.updates),
        )
    }
}
