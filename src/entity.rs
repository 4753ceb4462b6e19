//! Entity identity and change classification primitives.
//!
//! Every changed object carries an [`EntityName`]: the schema entity it is an
//! instance of. Dispatch partitions batches by that name, so two names are the
//! same type exactly when they spell the same string, no matter which context
//! or thread produced them.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ContextError;

/// Stable semantic identity of an entity type.
///
/// Cloning is a reference-count bump. Comparison and hashing use the string
/// value only.
///
/// # Examples
///
/// ```
/// use entity_observer::EntityName;
///
/// let a = EntityName::new("Rec");
/// let b = EntityName::new(String::from("Rec"));
/// assert_eq!(a, b);
/// assert_ne!(a, EntityName::new("Record"));
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityName(Arc<str>);

impl EntityName {
    /// Creates an entity name. Surrounding whitespace is trimmed.
    #[must_use]
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref().trim()))
    }

    /// Creates a validated entity name, rejecting blank input.
    pub fn parse(name: impl AsRef<str>) -> Result<Self, ContextError> {
        let name = Self::new(name);
        if name.0.is_empty() {
            return Err(ContextError::EmptyEntityName);
        }
        Ok(name)
    }

    /// The entity name of a Rust type implementing [`Entity`].
    #[must_use]
    pub fn of<E: Entity + ?Sized>() -> Self {
        Self::new(E::NAME)
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EntityName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityName({:?})", &*self.0)
    }
}

impl fmt::Display for EntityName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EntityName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for EntityName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for EntityName {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

impl PartialEq<&str> for EntityName {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}

impl From<&str> for EntityName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl TryFrom<String> for EntityName {
    type Error = ContextError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<EntityName> for String {
    fn from(value: EntityName) -> Self {
        value.0.to_string()
    }
}

/// A Rust type that stands for one schema entity.
///
/// Implementing this lets callers subscribe by type instead of by string:
///
/// ```
/// use entity_observer::{Entity, EntityName};
///
/// struct Rec;
/// impl Entity for Rec {
///     const NAME: &'static str = "Rec";
/// }
///
/// assert_eq!(EntityName::of::<Rec>(), "Rec");
/// ```
pub trait Entity {
    /// Schema entity name.
    const NAME: &'static str;
}

/// An object reported in a [`ChangeBatch`](crate::batch::ChangeBatch).
///
/// The dispatcher only ever looks at the entity name; everything else is
/// passed through to subscribers untouched.
pub trait ChangedObject {
    /// The concrete entity type of this object, or `None` when it cannot be
    /// resolved. Unresolvable objects are excluded from every slice.
    fn entity_name(&self) -> Option<&EntityName>;
}

impl<T: ChangedObject + ?Sized> ChangedObject for Arc<T> {
    fn entity_name(&self) -> Option<&EntityName> {
        (**self).entity_name()
    }
}

impl<T: ChangedObject + ?Sized> ChangedObject for Box<T> {
    fn entity_name(&self) -> Option<&EntityName> {
        (**self).entity_name()
    }
}

/// Kind of change a single object went through within one commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Object was created.
    Inserted,
    /// Object was modified.
    Updated,
    /// Object was removed.
    Deleted,
}

impl ChangeKind {
    /// All kinds, in dispatch order.
    pub const ALL: [Self; 3] = [Self::Deleted, Self::Inserted, Self::Updated];
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inserted => write!(f, "inserted"),
            Self::Updated => write!(f, "updated"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

/// Globally unique identifier of a managed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(Uuid);

impl ObjectId {
    /// Creates a new random object ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an object ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ObjectId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}
