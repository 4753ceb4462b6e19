//! Error types for entity-observer.
//!
//! Dispatch itself cannot fail; the only error paths are subscriber callbacks
//! reporting failure and misuse of an [`ObjectContext`](crate::context::ObjectContext).
//! All errors are strongly typed using thiserror.

use thiserror::Error;

use crate::entity::{EntityName, ObjectId};
use crate::observer::{SubscriptionId, SubscriptionKind};

/// Failure reported by a fallible subscriber callback.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct CallbackError {
    /// Human readable reason.
    pub message: String,
}

impl CallbackError {
    /// Creates a callback error from any message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Result type returned by fallible subscriber callbacks.
pub type CallbackResult = Result<(), CallbackError>;

/// Errors raised while staging a unit of work.
#[allow(missing_docs)]
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("Object not found: {id}")]
    ObjectNotFound { id: ObjectId },

    #[error("Object already deleted in this unit of work: {id}")]
    AlreadyDeleted { id: ObjectId },

    #[error("Entity name cannot be empty")]
    EmptyEntityName,
}

/// Top-level error type for entity-observer.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum ObserverError {
    /// A subscriber callback failed; the rest of the dispatch round was skipped.
    #[error("Callback for {kind} subscription {subscription} on '{entity}' failed: {source}")]
    Callback {
        subscription: SubscriptionId,
        kind: SubscriptionKind,
        entity: EntityName,
        #[source]
        source: CallbackError,
    },

    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ObserverError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if a subscriber callback failed.
    #[must_use]
    pub const fn is_callback(&self) -> bool {
        matches!(self, Self::Callback { .. })
    }

    /// Returns true if this is a context error.
    #[must_use]
    pub const fn is_context(&self) -> bool {
        matches!(self, Self::Context(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }
}

/// Result type alias for entity-observer operations.
pub type ObserverResult<T> = Result<T, ObserverError>;
