//! Identity resolution: raw result object → entity id, or "embedded".
//!
//! The default policy needs a `__typename` and one of the configured key
//! fields (`id`, `_id`). Ids are rendered `Type:value` so objects of
//! different types never collide, and the same logical object always
//! resolves to the same id regardless of which response it arrived in.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value as Json};

use crate::config::CacheConfig;
use crate::model::{EntityId, StoreKey};

/// Custom identity function for one type. Receives the raw object and
/// returns the full entity id, or `None` to store the object inline.
pub type IdentityFn = Arc<dyn Fn(&Map<String, Json>) -> Option<String> + Send + Sync>;

/// Outcome of resolving one raw object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Entity(EntityId),
    Embedded,
}

impl Identity {
    pub fn entity_id(&self) -> Option<&EntityId> {
        match self {
            Identity::Entity(id) => Some(id),
            Identity::Embedded => None,
        }
    }
}

#[derive(Clone)]
enum TypeIdentity {
    KeyFields(Vec<String>),
    Embedded,
    Custom(IdentityFn),
}

/// Maps raw objects to entity ids.
#[derive(Clone)]
pub struct IdentityPolicy {
    key_fields: Vec<String>,
    types: HashMap<String, TypeIdentity>,
}

impl fmt::Debug for IdentityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.types.keys().collect();
        types.sort();
        f.debug_struct("IdentityPolicy")
            .field("key_fields", &self.key_fields)
            .field("types", &types)
            .finish()
    }
}

impl Default for IdentityPolicy {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

impl IdentityPolicy {
    pub fn from_config(config: &CacheConfig) -> Self {
        let types = config
            .type_policies
            .iter()
            .filter_map(|(typename, policy)| {
                let identity = if policy.embedded {
                    TypeIdentity::Embedded
                } else {
                    TypeIdentity::KeyFields(policy.key_fields.clone()?)
                };
                Some((typename.clone(), identity))
            })
            .collect();
        Self { key_fields: config.key_fields.clone(), types }
    }

    /// Register a custom identity function for `typename`.
    pub fn with_resolver<F>(mut self, typename: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Map<String, Json>) -> Option<String> + Send + Sync + 'static,
    {
        self.types.insert(typename.into(), TypeIdentity::Custom(Arc::new(f)));
        self
    }

    /// Resolve using the object's own `__typename`.
    pub fn resolve(&self, object: &Map<String, Json>) -> Identity {
        let typename = object.get(StoreKey::TYPENAME).and_then(Json::as_str);
        self.resolve_typed(typename, object)
    }

    pub fn resolve_typed(&self, typename: Option<&str>, object: &Map<String, Json>) -> Identity {
        let Some(typename) = typename else {
            return Identity::Embedded;
        };
        match self.types.get(typename) {
            Some(TypeIdentity::Embedded) => Identity::Embedded,
            Some(TypeIdentity::Custom(f)) => match f(object) {
                Some(id) => Identity::Entity(EntityId::from(id)),
                None => Identity::Embedded,
            },
            Some(TypeIdentity::KeyFields(fields)) => compound_id(typename, fields, object),
            None => self.default_id(typename, object),
        }
    }

    fn default_id(&self, typename: &str, object: &Map<String, Json>) -> Identity {
        self.key_fields
            .iter()
            .find_map(|field| object.get(field).filter(|v| !v.is_null()))
            .map(|value| Identity::Entity(EntityId::from(format!("{typename}:{}", render_key(value)))))
            .unwrap_or(Identity::Embedded)
    }
}

/// `Type:{"a":1,"b":2}`. Every key field must be present.
fn compound_id(typename: &str, fields: &[String], object: &Map<String, Json>) -> Identity {
    let mut key = Map::new();
    for field in fields {
        match object.get(field) {
            Some(v) if !v.is_null() => {
                key.insert(field.clone(), v.clone());
            }
            _ => return Identity::Embedded,
        }
    }
    if let [single] = fields {
        return Identity::Entity(EntityId::from(format!("{typename}:{}", render_key(&key[single]))));
    }
    Identity::Entity(EntityId::from(format!("{typename}:{}", Json::Object(key))))
}

fn render_key(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}
