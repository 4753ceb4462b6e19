//! # entity-observer - typed change observers for object-graph commits
//!
//! A persistence layer reports each committed unit of work as one coarse
//! batch of inserted, updated and deleted objects of many entity types.
//! entity-observer partitions that batch by entity type and fans it out to
//! subscribers that asked for one type and one change kind, or for every
//! change to one type bundled together.
//!
//! ## Core Concepts
//!
//! - **EntityName**: the stable type identity used as the dispatch key
//! - **ChangeBatch**: the deleted / inserted / updated sets of one commit
//! - **Dispatcher**: owns the subscription registry and runs one dispatch
//!   round per commit, synchronously
//! - **ObserverToken**: the caller-held handle; the registry keeps only a
//!   weak reference, so dropping the token ends the subscription
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use entity_observer::context::{ObjectContext, ObjectRef, ObjectStore};
//! use entity_observer::Dispatcher;
//!
//! let dispatcher: Arc<Dispatcher<ObjectRef>> = Arc::new(Dispatcher::default());
//! let context = ObjectContext::new(ObjectStore::new(), dispatcher.clone());
//!
//! let _inserts = dispatcher.observe_inserts("Rec", |recs| {
//!     println!("Rec inserts: {}", recs.len());
//! });
//! let _all = dispatcher.observe_all_changes("Rec", |changes| {
//!     println!(
//!         "Rec all changes: deletes: {}, inserts: {}, updates: {}",
//!         changes.deletes.len(),
//!         changes.inserts.len(),
//!         changes.updates.len()
//!     );
//! });
//!
//! context.insert("Rec", [("title", "hello")])?;
//! let report = context.save()?.expect("one commit");
//! assert_eq!(report.invocations, 2);
//! # Ok::<(), entity_observer::ObserverError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod batch;
pub mod entity;
pub mod error;

pub mod context;
pub mod observer;

// Re-export primary types at crate root for convenience
pub use batch::{ChangeBatch, Changes};
pub use entity::{ChangeKind, ChangedObject, Entity, EntityName, ObjectId};
pub use error::{CallbackError, CallbackResult, ContextError, ObserverError, ObserverResult};
pub use observer::{
    Callback, ChangeListener, DispatchReport, Dispatcher, DispatcherConfig, ObserverToken,
    SubscriptionId, SubscriptionKind, SubscriptionRegistry,
};
