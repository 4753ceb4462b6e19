//! Typed change observers.
//!
//! Subscribers register interest in one entity type and one change kind (or
//! all kinds bundled). Each committed [`ChangeBatch`](crate::ChangeBatch) is
//! partitioned by entity type and fanned out synchronously. The registry holds
//! weak references only, so dropping an [`ObserverToken`] is all it takes to
//! stop receiving callbacks.

/// Per-type partitioning of change batches.
pub mod classifier;
/// Commit dispatch.
pub mod dispatcher;
/// Weak subscription storage.
pub mod registry;
/// Subscription records and tokens.
pub mod subscription;

pub use dispatcher::{ChangeListener, DispatchReport, Dispatcher, DispatcherConfig};
pub use registry::{RegistrySnapshot, SubscriptionRegistry, TypeSubscriptions};
pub use subscription::{Callback, ObserverToken, Subscription, SubscriptionId, SubscriptionKind};
