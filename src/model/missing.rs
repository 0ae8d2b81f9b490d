//! Missing-data reports produced by reads.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{EntityId, StoreKey};

/// One piece of data a read wanted but the store did not have.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MissingField {
    pub entity: EntityId,
    /// `None` when the entity itself is absent.
    pub field: Option<StoreKey>,
    /// Path from the entity to the embedded object the field belongs to,
    /// e.g. `address` or `messages[3].meta`. `None` for the entity's own fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl MissingField {
    pub fn entity(entity: EntityId) -> Self {
        Self { entity, field: None, path: None }
    }

    pub fn field(entity: EntityId, field: StoreKey) -> Self {
        Self { entity, field: Some(field), path: None }
    }

    /// A field missing from an embedded object stored under `entity`.
    pub fn nested(entity: EntityId, path: impl Into<String>, field: StoreKey) -> Self {
        Self { entity, field: Some(field), path: Some(path.into()) }
    }
}

impl fmt::Display for MissingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.field, &self.path) {
            (Some(field), Some(path)) => write!(f, "missing field '{field}' on {}.{path}", self.entity),
            (Some(field), None) => write!(f, "missing field '{field}' on {}", self.entity),
            (None, _) => write!(f, "missing entity {}", self.entity),
        }
    }
}
