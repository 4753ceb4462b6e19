//! Subscription registry.
//!
//! Four insertion-ordered channels (deletes, inserts, updates, any) of weak
//! subscription references. One mutex guards all four so a snapshot is always
//! internally consistent. The lock is never held while a callback runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::debug;

use crate::entity::EntityName;

use super::subscription::{Callback, ObserverToken, Subscription, SubscriptionId, SubscriptionKind};

struct Entry<O> {
    id: SubscriptionId,
    entity: EntityName,
    subscription: Weak<Subscription<O>>,
}

impl<O> Entry<O> {
    fn is_live(&self) -> bool {
        self.subscription.strong_count() > 0
    }
}

impl<O> Clone for Entry<O> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            entity: self.entity.clone(),
            subscription: Weak::clone(&self.subscription),
        }
    }
}

struct RegistryState<O> {
    deletes: Vec<Entry<O>>,
    inserts: Vec<Entry<O>>,
    updates: Vec<Entry<O>>,
    any: Vec<Entry<O>>,
}

impl<O> RegistryState<O> {
    const fn new() -> Self {
        Self {
            deletes: Vec::new(),
            inserts: Vec::new(),
            updates: Vec::new(),
            any: Vec::new(),
        }
    }

    fn channel(&self, kind: SubscriptionKind) -> &Vec<Entry<O>> {
        match kind {
            SubscriptionKind::Deleted => &self.deletes,
            SubscriptionKind::Inserted => &self.inserts,
            SubscriptionKind::Updated => &self.updates,
            SubscriptionKind::Any => &self.any,
        }
    }

    fn channel_mut(&mut self, kind: SubscriptionKind) -> &mut Vec<Entry<O>> {
        match kind {
            SubscriptionKind::Deleted => &mut self.deletes,
            SubscriptionKind::Inserted => &mut self.inserts,
            SubscriptionKind::Updated => &mut self.updates,
            SubscriptionKind::Any => &mut self.any,
        }
    }

    /// Drops dead entries from every channel holding at least `threshold` of them.
    fn compact(&mut self, threshold: usize) -> usize {
        let mut pruned = 0;
        for kind in SubscriptionKind::ALL {
            let channel = self.channel_mut(kind);
            let dead = channel.iter().filter(|e| !e.is_live()).count();
            if dead > 0 && dead >= threshold {
                channel.retain(Entry::is_live);
                pruned += dead;
            }
        }
        pruned
    }
}

/// Live subscriptions of one entity type, grouped by channel.
pub struct TypeSubscriptions<O> {
    entity: EntityName,
    deletes: Vec<Weak<Subscription<O>>>,
    inserts: Vec<Weak<Subscription<O>>>,
    updates: Vec<Weak<Subscription<O>>>,
    any: Vec<Weak<Subscription<O>>>,
}

impl<O> TypeSubscriptions<O> {
    fn new(entity: EntityName) -> Self {
        Self {
            entity,
            deletes: Vec::new(),
            inserts: Vec::new(),
            updates: Vec::new(),
            any: Vec::new(),
        }
    }

    /// Observed entity type.
    #[must_use]
    pub const fn entity(&self) -> &EntityName {
        &self.entity
    }

    /// Weak references for one channel, in registration order.
    #[must_use]
    pub fn channel(&self, kind: SubscriptionKind) -> &[Weak<Subscription<O>>] {
        match kind {
            SubscriptionKind::Deleted => &self.deletes,
            SubscriptionKind::Inserted => &self.inserts,
            SubscriptionKind::Updated => &self.updates,
            SubscriptionKind::Any => &self.any,
        }
    }

    fn channel_mut(&mut self, kind: SubscriptionKind) -> &mut Vec<Weak<Subscription<O>>> {
        match kind {
            SubscriptionKind::Deleted => &mut self.deletes,
            SubscriptionKind::Inserted => &mut self.inserts,
            SubscriptionKind::Updated => &mut self.updates,
            SubscriptionKind::Any => &mut self.any,
        }
    }
}

/// Point-in-time view of the registry for one dispatch round.
///
/// Holds weak references only: a token dropped after the snapshot was taken
/// still prevents its callback from running.
pub struct RegistrySnapshot<O> {
    groups: Vec<TypeSubscriptions<O>>,
}

impl<O> RegistrySnapshot<O> {
    /// Groups in type-discovery order (deletes, inserts, updates, then any).
    #[must_use]
    pub fn groups(&self) -> &[TypeSubscriptions<O>] {
        &self.groups
    }

    /// Distinct observed types, in discovery order.
    pub fn observed_types(&self) -> impl Iterator<Item = &EntityName> + '_ {
        self.groups.iter().map(|g| &g.entity)
    }

    /// True when no live subscription was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Registry of weak subscription references keyed by (kind, entity type).
pub struct SubscriptionRegistry<O> {
    state: Mutex<RegistryState<O>>,
    compaction_threshold: usize,
    compact_on_snapshot: bool,
    pruned: AtomicU64,
}

impl<O> SubscriptionRegistry<O> {
    /// Creates an empty registry.
    ///
    /// A snapshot compacts a channel once it holds `compaction_threshold`
    /// expired entries, unless `compact_on_snapshot` is false.
    #[must_use]
    pub fn new(compaction_threshold: usize, compact_on_snapshot: bool) -> Self {
        Self {
            state: Mutex::new(RegistryState::new()),
            compaction_threshold: compaction_threshold.max(1),
            compact_on_snapshot,
            pruned: AtomicU64::new(0),
        }
    }

    // The guarded state is only ever mutated by short non-panicking sections,
    // so a poisoned lock still holds consistent data.
    fn lock(&self) -> MutexGuard<'_, RegistryState<O>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers interest and returns the token owning the subscription.
    pub fn subscribe(&self, entity: EntityName, callback: Callback<O>) -> ObserverToken<O> {
        let kind = callback.kind();
        let subscription = Arc::new(Subscription::new(entity.clone(), callback));
        let entry = Entry {
            id: subscription.id(),
            entity,
            subscription: Arc::downgrade(&subscription),
        };
        self.lock().channel_mut(kind).push(entry);
        ObserverToken::new(subscription)
    }

    /// Removes the token's entry now and drops the token.
    ///
    /// Returns false if the entry had already been compacted away.
    pub fn unsubscribe(&self, token: ObserverToken<O>) -> bool {
        let id = token.id();
        let kind = token.kind();
        let removed = {
            let mut state = self.lock();
            let channel = state.channel_mut(kind);
            let before = channel.len();
            channel.retain(|e| e.id != id);
            before != channel.len()
        };
        drop(token);
        removed
    }

    /// Live subscriptions on one channel, in registration order.
    #[must_use]
    pub fn live_subscriptions(&self, kind: SubscriptionKind) -> Vec<Arc<Subscription<O>>> {
        let state = self.lock();
        state
            .channel(kind)
            .iter()
            .filter_map(|e| e.subscription.upgrade())
            .collect()
    }

    /// Live aggregate subscriptions for one type, in registration order.
    #[must_use]
    pub fn aggregate_subscriptions(&self, entity: &EntityName) -> Vec<Arc<Subscription<O>>> {
        let state = self.lock();
        state
            .any
            .iter()
            .filter(|e| &e.entity == entity)
            .filter_map(|e| e.subscription.upgrade())
            .collect()
    }

    /// Distinct types observed by live delete, insert or update subscriptions.
    #[must_use]
    pub fn distinct_observed_types(&self) -> Vec<EntityName> {
        let state = self.lock();
        let mut out: Vec<EntityName> = Vec::new();
        for kind in [
            SubscriptionKind::Deleted,
            SubscriptionKind::Inserted,
            SubscriptionKind::Updated,
        ] {
            for entry in state.channel(kind).iter().filter(|e| e.is_live()) {
                if !out.contains(&entry.entity) {
                    out.push(entry.entity.clone());
                }
            }
        }
        out
    }

    /// Captures all four channels under one lock acquisition and groups the
    /// live entries by type.
    #[must_use]
    pub fn snapshot(&self) -> RegistrySnapshot<O> {
        let mut raw: Vec<(SubscriptionKind, Entry<O>)> = Vec::new();
        {
            let mut state = self.lock();
            if self.compact_on_snapshot {
                let pruned = state.compact(self.compaction_threshold);
                if pruned > 0 {
                    self.pruned.fetch_add(pruned as u64, Ordering::Relaxed);
                    debug!(pruned, "compacted expired subscriptions");
                }
            }
            for kind in SubscriptionKind::ALL {
                raw.extend(
                    state
                        .channel(kind)
                        .iter()
                        .filter(|e| e.is_live())
                        .map(|e| (kind, e.clone())),
                );
            }
        }

        let mut groups: Vec<TypeSubscriptions<O>> = Vec::new();
        let mut index: HashMap<EntityName, usize> = HashMap::new();
        for (kind, entry) in raw {
            let idx = *index.entry(entry.entity.clone()).or_insert_with(|| {
                groups.push(TypeSubscriptions::new(entry.entity.clone()));
                groups.len() - 1
            });
            groups[idx].channel_mut(kind).push(entry.subscription);
        }

        RegistrySnapshot { groups }
    }

    /// Removes every expired entry regardless of threshold.
    pub fn compact(&self) -> usize {
        let pruned = self.lock().compact(1);
        if pruned > 0 {
            self.pruned.fetch_add(pruned as u64, Ordering::Relaxed);
            debug!(pruned, "compacted expired subscriptions");
        }
        pruned
    }

    /// Number of stored entries, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        let state = self.lock();
        SubscriptionKind::ALL.iter().map(|k| state.channel(*k).len()).sum()
    }

    /// True when no entry is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries whose token is still alive.
    #[must_use]
    pub fn live_len(&self) -> usize {
        let state = self.lock();
        SubscriptionKind::ALL
            .iter()
            .map(|k| state.channel(*k).iter().filter(|e| e.is_live()).count())
            .sum()
    }

    /// Total expired entries removed by compaction so far.
    #[must_use]
    pub fn pruned(&self) -> u64 {
        self.pruned.load(Ordering::Relaxed)
    }
}

impl<O> Default for SubscriptionRegistry<O> {
    fn default() -> Self {
        Self::new(64, true)
    }
}

impl<O> std::fmt::Debug for SubscriptionRegistry<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("entries", &self.len())
            .field("compaction_threshold", &self.compaction_threshold)
            .field("compact_on_snapshot", &self.compact_on_snapshot)
            .finish_non_exhaustive()
    }
}
