//! In-memory change source.
//!
//! A small object-graph store whose units of work report their commits to a
//! [`ChangeListener`](crate::observer::ChangeListener), one batch per save.
//! Several contexts, on several threads, may share one store and one
//! dispatcher.

/// Managed object records.
pub mod object;
/// Units of work.
pub mod object_context;
/// Committed object storage.
pub mod store;

pub use object::{ManagedObject, ObjectRef};
pub use object_context::ObjectContext;
pub use store::ObjectStore;
