//! Normalized entities: identifiers and their field records.

use std::fmt;
use std::sync::Arc;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use super::{StoreKey, StoreValue};

/// Opaque entity identifier. Two entities are the same iff their ids are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(Arc<str>);

impl EntityId {
    /// Root of every query result.
    pub const ROOT_QUERY: &'static str = "ROOT_QUERY";
    /// Root of every mutation result.
    pub const ROOT_MUTATION: &'static str = "ROOT_MUTATION";
    /// Root of every subscription payload.
    pub const ROOT_SUBSCRIPTION: &'static str = "ROOT_SUBSCRIPTION";

    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn root_query() -> Self {
        Self::new(Self::ROOT_QUERY)
    }

    pub fn root_mutation() -> Self {
        Self::new(Self::ROOT_MUTATION)
    }

    pub fn root_subscription() -> Self {
        Self::new(Self::ROOT_SUBSCRIPTION)
    }

    /// The ids that are always GC roots.
    pub fn roots() -> [EntityId; 3] {
        [Self::root_query(), Self::root_mutation(), Self::root_subscription()]
    }

    pub fn is_root(&self) -> bool {
        matches!(
            self.as_str(),
            Self::ROOT_QUERY | Self::ROOT_MUTATION | Self::ROOT_SUBSCRIPTION
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(v: &str) -> Self { Self::new(v) }
}

impl From<String> for EntityId {
    fn from(v: String) -> Self { Self(Arc::from(v)) }
}

/// Field values of one normalized entity, keyed by storage key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub fields: HashMap<StoreKey, StoreValue>,
}

impl EntityRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, key: impl Into<StoreKey>, value: impl Into<StoreValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &StoreKey) -> Option<&StoreValue> {
        self.fields.get(key)
    }

    /// The stored `__typename`, if the record has one.
    pub fn typename(&self) -> Option<&str> {
        self.fields
            .get(&StoreKey::typename())
            .and_then(|v| v.as_scalar())
            .and_then(|v| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Every entity this record references, in any field, at any depth.
    pub fn references(&self) -> impl Iterator<Item = &EntityId> {
        self.fields.values().flat_map(|v| v.references())
    }
}
