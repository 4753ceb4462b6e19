//! Managed objects: the in-memory records a context stages and commits.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::{ChangedObject, EntityName, ObjectId};

/// Shared handle to a committed object snapshot.
pub type ObjectRef = Arc<ManagedObject>;

/// One instance of a schema entity with free-form attributes.
///
/// # Examples
///
/// ```
/// use entity_observer::context::ManagedObject;
/// use entity_observer::EntityName;
///
/// let mut rec = ManagedObject::new(EntityName::new("Rec"));
/// rec.set("title", "hello");
/// assert_eq!(rec.get_str("title"), Some("hello"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedObject {
    /// Stable identity.
    pub id: ObjectId,
    /// Schema entity this object is an instance of.
    pub entity: EntityName,
    /// Attribute values keyed by attribute name.
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    /// Commit counter: 1 after the inserting save, +1 per updating save.
    pub version: u64,
    /// Time of the last commit touching this object.
    pub updated_at: DateTime<Utc>,
}

impl ManagedObject {
    /// Creates an uncommitted object with no attributes.
    #[must_use]
    pub fn new(entity: EntityName) -> Self {
        Self {
            id: ObjectId::new(),
            entity,
            attributes: BTreeMap::new(),
            version: 0,
            updated_at: Utc::now(),
        }
    }

    /// Sets one attribute, returning the previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.attributes.insert(key.into(), value.into())
    }

    /// Attribute value by name.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// String attribute value by name.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }
}

impl ChangedObject for ManagedObject {
    fn entity_name(&self) -> Option<&EntityName> {
        Some(&self.entity)
    }
}
