//! Subscription records and the caller-held token that keeps them alive.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::batch::Changes;
use crate::entity::{ChangeKind, EntityName};
use crate::error::CallbackResult;

/// Unique identifier for a subscription.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new random subscription id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which channel a subscription listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionKind {
    /// Inserted objects only.
    Inserted,
    /// Updated objects only.
    Updated,
    /// Deleted objects only.
    Deleted,
    /// All three kinds bundled into one [`Changes`] triple.
    Any,
}

impl SubscriptionKind {
    /// All kinds, in registry order.
    pub const ALL: [Self; 4] = [Self::Deleted, Self::Inserted, Self::Updated, Self::Any];
}

impl From<ChangeKind> for SubscriptionKind {
    fn from(kind: ChangeKind) -> Self {
        match kind {
            ChangeKind::Inserted => Self::Inserted,
            ChangeKind::Updated => Self::Updated,
            ChangeKind::Deleted => Self::Deleted,
        }
    }
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inserted => write!(f, "inserted"),
            Self::Updated => write!(f, "updated"),
            Self::Deleted => write!(f, "deleted"),
            Self::Any => write!(f, "any"),
        }
    }
}

/// Callback receiving the type-filtered slice of one change kind.
pub type SliceFn<O> = dyn Fn(&[O]) -> CallbackResult + Send + Sync;

/// Callback receiving the type-filtered `(deletes, inserts, updates)` triple.
pub type ChangesFn<O> = dyn Fn(&Changes<O>) -> CallbackResult + Send + Sync;

/// A subscriber callback together with the channel it belongs to.
pub enum Callback<O> {
    /// Single-kind callback.
    Slice {
        /// The change kind this callback listens to.
        kind: ChangeKind,
        /// The callback.
        f: Box<SliceFn<O>>,
    },
    /// Aggregate callback.
    Changes(Box<ChangesFn<O>>),
}

impl<O> Callback<O> {
    /// Wraps a single-kind callback.
    pub fn slice(
        kind: ChangeKind,
        f: impl Fn(&[O]) -> CallbackResult + Send + Sync + 'static,
    ) -> Self {
        Self::Slice { kind, f: Box::new(f) }
    }

    /// Wraps an aggregate callback.
    pub fn changes(f: impl Fn(&Changes<O>) -> CallbackResult + Send + Sync + 'static) -> Self {
        Self::Changes(Box::new(f))
    }

    /// The registry channel this callback is stored in.
    #[must_use]
    pub fn kind(&self) -> SubscriptionKind {
        match self {
            Self::Slice { kind, .. } => (*kind).into(),
            Self::Changes(_) => SubscriptionKind::Any,
        }
    }
}

/// One registered interest in changes to an entity type.
///
/// The registry only ever holds a `Weak` reference to this record; the
/// [`ObserverToken`] returned at subscription time owns it.
pub struct Subscription<O> {
    id: SubscriptionId,
    entity: EntityName,
    callback: Callback<O>,
}

impl<O> Subscription<O> {
    pub(crate) fn new(entity: EntityName, callback: Callback<O>) -> Self {
        Self {
            id: SubscriptionId::new(),
            entity,
            callback,
        }
    }

    /// Subscription id.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Channel this subscription listens on.
    #[must_use]
    pub fn kind(&self) -> SubscriptionKind {
        self.callback.kind()
    }

    /// Observed entity type.
    #[must_use]
    pub const fn entity(&self) -> &EntityName {
        &self.entity
    }

    /// Calls a single-kind callback. Aggregate subscriptions ignore slices.
    pub(crate) fn notify_slice(&self, objects: &[O]) -> CallbackResult {
        match &self.callback {
            Callback::Slice { f, .. } => f(objects),
            Callback::Changes(_) => Ok(()),
        }
    }

    /// Calls an aggregate callback. Single-kind subscriptions ignore triples.
    pub(crate) fn notify_changes(&self, changes: &Changes<O>) -> CallbackResult {
        match &self.callback {
            Callback::Changes(f) => f(changes),
            Callback::Slice { .. } => Ok(()),
        }
    }
}

impl<O> fmt::Debug for Subscription<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .field("entity", &self.entity)
            .finish_non_exhaustive()
    }
}

/// Caller-held handle keeping a subscription alive.
///
/// Dropping the token is the de-registration mechanism: the next dispatch
/// round finds the registry's weak reference dead and skips it.
#[must_use = "dropping the token cancels the subscription immediately"]
pub struct ObserverToken<O> {
    subscription: Arc<Subscription<O>>,
}

impl<O> ObserverToken<O> {
    pub(crate) fn new(subscription: Arc<Subscription<O>>) -> Self {
        Self { subscription }
    }

    /// The subscription id backing this token.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.subscription.id()
    }

    /// Channel the subscription listens on.
    #[must_use]
    pub fn kind(&self) -> SubscriptionKind {
        self.subscription.kind()
    }

    /// Observed entity type.
    #[must_use]
    pub fn entity(&self) -> &EntityName {
        self.subscription.entity()
    }
}

impl<O> fmt::Debug for ObserverToken<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ObserverToken").field(&*self.subscription).finish()
    }
}
