//! Commit dispatcher.
//!
//! This module owns the subscription registry and turns each committed
//! [`ChangeBatch`] into per-type, per-kind callback invocations. A round runs
//! synchronously on the committing thread and finishes before `handle_commit`
//! returns. Callback failures abort the current dispatch round.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;

use tracing::{debug, trace, warn};

use crate::batch::{ChangeBatch, Changes};
use crate::entity::{ChangeKind, ChangedObject, Entity, EntityName};
use crate::error::{CallbackResult, ObserverError, ObserverResult};

use super::classifier::TypePartition;
use super::registry::SubscriptionRegistry;
use super::subscription::{Callback, ObserverToken, Subscription, SubscriptionKind};

#[allow(missing_docs)]
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Expired entries tolerated per channel before a round compacts it.
    pub compaction_threshold: usize,
    /// Whether dispatch rounds may compact the registry at all.
    pub compact_on_snapshot: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            compaction_threshold: 64,
            compact_on_snapshot: true,
        }
    }
}

/// Summary of one dispatch round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Observed types that had at least one changed object in the batch.
    pub types_processed: usize,
    /// Callbacks invoked.
    pub invocations: usize,
    /// Subscriptions skipped because their token was dropped mid-round.
    pub expired_skipped: usize,
}

/// Receiver of committed change batches.
///
/// Change sources hold one of these and call it once per committed unit of
/// work, on the committing thread.
pub trait ChangeListener<O>: Send + Sync {
    /// Processes one commit.
    fn handle_commit(&self, batch: &ChangeBatch<O>) -> ObserverResult<DispatchReport>;
}

/// Typed change dispatcher: the entry point for subscribing and for commits.
///
/// Construct one per process (or per store) and share it through `Arc`.
///
/// ```
/// use std::sync::{Arc, Mutex};
/// use entity_observer::{ChangeBatch, ChangedObject, Dispatcher, EntityName};
///
/// #[derive(Clone)]
/// struct Row(EntityName, u32);
/// impl ChangedObject for Row {
///     fn entity_name(&self) -> Option<&EntityName> {
///         Some(&self.0)
///     }
/// }
///
/// let dispatcher = Dispatcher::<Row>::default();
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let sink = Arc::clone(&seen);
/// let _token = dispatcher.observe_inserts("Rec", move |rows| {
///     sink.lock().unwrap().extend(rows.iter().map(|r| r.1));
/// });
///
/// let batch = ChangeBatch::new().with_inserted([
///     Row(EntityName::new("Rec"), 1),
///     Row(EntityName::new("User"), 2),
/// ]);
/// dispatcher.handle_commit(&batch).unwrap();
/// assert_eq!(*seen.lock().unwrap(), vec![1]);
/// ```
#[derive(Debug)]
pub struct Dispatcher<O> {
    cfg: DispatcherConfig,
    registry: SubscriptionRegistry<O>,
    rounds: AtomicU64,
    invocations: AtomicU64,
}

impl<O> Dispatcher<O> {
    /// Creates a dispatcher with an empty registry.
    #[must_use]
    pub fn new(cfg: DispatcherConfig) -> Self {
        let registry = SubscriptionRegistry::new(cfg.compaction_threshold, cfg.compact_on_snapshot);
        Self {
            cfg,
            registry,
            rounds: AtomicU64::new(0),
            invocations: AtomicU64::new(0),
        }
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &DispatcherConfig {
        &self.cfg
    }

    /// The underlying registry.
    #[must_use]
    pub const fn registry(&self) -> &SubscriptionRegistry<O> {
        &self.registry
    }

    /// Registers a raw callback for `entity`.
    pub fn subscribe(
        &self,
        entity: impl Into<EntityName>,
        callback: Callback<O>,
    ) -> ObserverToken<O> {
        self.registry.subscribe(entity.into(), callback)
    }

    /// Removes a subscription immediately instead of waiting for the token drop.
    pub fn unsubscribe(&self, token: ObserverToken<O>) -> bool {
        self.registry.unsubscribe(token)
    }

    /// Dispatch rounds run so far, including empty ones.
    #[must_use]
    pub fn rounds(&self) -> u64 {
        self.rounds.load(Ordering::Relaxed)
    }

    /// Total callbacks invoked across all rounds.
    #[must_use]
    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    /// Expired registry entries removed by compaction.
    #[must_use]
    pub fn pruned_subscriptions(&self) -> u64 {
        self.registry.pruned()
    }
}

impl<O: 'static> Dispatcher<O> {
    /// Fallible single-kind subscription.
    pub fn try_observe(
        &self,
        kind: ChangeKind,
        entity: impl Into<EntityName>,
        f: impl Fn(&[O]) -> CallbackResult + Send + Sync + 'static,
    ) -> ObserverToken<O> {
        self.subscribe(entity, Callback::slice(kind, f))
    }

    /// Single-kind subscription.
    pub fn observe(
        &self,
        kind: ChangeKind,
        entity: impl Into<EntityName>,
        f: impl Fn(&[O]) + Send + Sync + 'static,
    ) -> ObserverToken<O> {
        self.try_observe(kind, entity, move |objects| {
            f(objects);
            Ok(())
        })
    }

    /// Observe inserted objects of `entity`.
    pub fn observe_inserts(
        &self,
        entity: impl Into<EntityName>,
        f: impl Fn(&[O]) + Send + Sync + 'static,
    ) -> ObserverToken<O> {
        self.observe(ChangeKind::Inserted, entity, f)
    }

    /// Observe updated objects of `entity`.
    pub fn observe_updates(
        &self,
        entity: impl Into<EntityName>,
        f: impl Fn(&[O]) + Send + Sync + 'static,
    ) -> ObserverToken<O> {
        self.observe(ChangeKind::Updated, entity, f)
    }

    /// Observe deleted objects of `entity`.
    pub fn observe_deletes(
        &self,
        entity: impl Into<EntityName>,
        f: impl Fn(&[O]) + Send + Sync + 'static,
    ) -> ObserverToken<O> {
        self.observe(ChangeKind::Deleted, entity, f)
    }

    /// Fallible aggregate subscription.
    pub fn try_observe_all_changes(
        &self,
        entity: impl Into<EntityName>,
        f: impl Fn(&Changes<O>) -> CallbackResult + Send + Sync + 'static,
    ) -> ObserverToken<O> {
        self.subscribe(entity, Callback::changes(f))
    }

    /// Observe every change to `entity`, bundled per commit.
    pub fn observe_all_changes(
        &self,
        entity: impl Into<EntityName>,
        f: impl Fn(&Changes<O>) + Send + Sync + 'static,
    ) -> ObserverToken<O> {
        self.try_observe_all_changes(entity, move |changes| {
            f(changes);
            Ok(())
        })
    }

    /// Single-kind subscription keyed by a Rust entity type.
    pub fn observe_of<E: Entity + ?Sized>(
        &self,
        kind: ChangeKind,
        f: impl Fn(&[O]) + Send + Sync + 'static,
    ) -> ObserverToken<O> {
        self.observe(kind, EntityName::of::<E>(), f)
    }

    /// Aggregate subscription keyed by a Rust entity type.
    pub fn observe_all_changes_of<E: Entity + ?Sized>(
        &self,
        f: impl Fn(&Changes<O>) + Send + Sync + 'static,
    ) -> ObserverToken<O> {
        self.observe_all_changes(EntityName::of::<E>(), f)
    }
}

impl<O: ChangedObject + Clone> Dispatcher<O> {
    /// Runs one dispatch round for `batch`.
    ///
    /// The registry is snapshotted once; subscriptions added by a callback are
    /// first seen by the next round. For every observed type with changes in
    /// the batch, single-kind subscribers get their non-empty slice, then
    /// aggregate subscribers get the `(deletes, inserts, updates)` triple.
    ///
    /// # Errors
    ///
    /// Returns [`ObserverError::Callback`] for the first failing callback; no
    /// later subscriber in the round is notified.
    pub fn handle_commit(&self, batch: &ChangeBatch<O>) -> ObserverResult<DispatchReport> {
        self.rounds.fetch_add(1, Ordering::Relaxed);
        let mut report = DispatchReport::default();

        if batch.is_empty() {
            return Ok(report);
        }

        let snapshot = self.registry.snapshot();
        if snapshot.is_empty() {
            return Ok(report);
        }

        let mut partition = TypePartition::new(batch, snapshot.observed_types());
        let result = snapshot
            .groups()
            .iter()
            .enumerate()
            .try_for_each(|(i, group)| {
                let (deletes, inserts, updates) = partition.take(i);
                if deletes.is_empty() && inserts.is_empty() && updates.is_empty() {
                    return Ok(());
                }
                report.types_processed += 1;

                let entity = group.entity();
                for (kind, slice) in [
                    (SubscriptionKind::Deleted, &deletes),
                    (SubscriptionKind::Inserted, &inserts),
                    (SubscriptionKind::Updated, &updates),
                ] {
                    if slice.is_empty() {
                        continue;
                    }
                    self.notify(group.channel(kind), kind, entity, &mut report, |sub| {
                        sub.notify_slice(slice)
                    })?;
                }

                let changes = Changes::new(deletes, inserts, updates);
                self.notify(
                    group.channel(SubscriptionKind::Any),
                    SubscriptionKind::Any,
                    entity,
                    &mut report,
                    |sub| sub.notify_changes(&changes),
                )
            });

        self.invocations
            .fetch_add(report.invocations as u64, Ordering::Relaxed);
        debug!(
            deleted = batch.deleted.len(),
            inserted = batch.inserted.len(),
            updated = batch.updated.len(),
            types = report.types_processed,
            invocations = report.invocations,
            expired = report.expired_skipped,
            "dispatch round complete"
        );

        result.map(|()| report)
    }

    fn notify(
        &self,
        subscribers: &[Weak<Subscription<O>>],
        kind: SubscriptionKind,
        entity: &EntityName,
        report: &mut DispatchReport,
        call: impl Fn(&Subscription<O>) -> CallbackResult,
    ) -> ObserverResult<()> {
        for weak in subscribers {
            // Upgrade at call time: a token dropped earlier in this round must not fire.
            let Some(sub) = weak.upgrade() else {
                report.expired_skipped += 1;
                continue;
            };
            trace!(subscription = %sub.id(), %kind, %entity, "invoking subscriber");
            report.invocations += 1;
            call(sub.as_ref()).map_err(|source| {
                warn!(
                    subscription = %sub.id(),
                    %kind,
                    %entity,
                    error = %source,
                    "subscriber failed, aborting round"
                );
                ObserverError::Callback {
                    subscription: sub.id(),
                    kind,
                    entity: entity.clone(),
                    source,
                }
            })?;
        }
        Ok(())
    }
}

impl<O> Default for Dispatcher<O> {
    fn default() -> Self {
        Self::new(DispatcherConfig::default())
    }
}

impl<O: ChangedObject + Clone> ChangeListener<O> for Dispatcher<O> {
    fn handle_commit(&self, batch: &ChangeBatch<O>) -> ObserverResult<DispatchReport> {
        Dispatcher::handle_commit(self, batch)
    }
}
