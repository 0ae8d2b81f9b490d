//! Cache configuration.
//!
//! Everything here is plain data and can be loaded from JSON. Identity
//! closures that cannot be expressed as data are registered in code on
//! [`IdentityPolicy`](crate::identity::IdentityPolicy).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// What a read does when data is missing from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletenessPolicy {
    /// Any missing field or entity fails the whole read with `Error::CacheMiss`.
    #[default]
    Strict,
    /// Missing data is left out and reported on the result.
    Partial,
}

/// When recursive reference expansion is cut short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleGuard {
    /// Truncate only when the same entity is re-entered with the same
    /// selection set during one read.
    ///
    /// Selection sets are immutable trees built bottom-up, so no selection
    /// can contain itself and a finite query never re-enters one. Under
    /// this guard every read therefore expands exactly as deep as its
    /// selection, references that loop included, and no truncation occurs.
    /// Use [`CycleGuard::SameEntity`] to cut expansion at the first
    /// revisited entity instead.
    #[default]
    SameSelection,
    /// Truncate whenever an entity is re-entered during one read, whatever
    /// the selection.
    SameEntity,
}

/// Per-type identity override.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypePolicyConfig {
    /// Fields whose values together identify an object of this type.
    #[serde(default)]
    pub key_fields: Option<Vec<String>>,
    /// Never normalize objects of this type.
    #[serde(default)]
    pub embedded: bool,
}

/// Top-level cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Identity fields tried in order for types without a policy.
    #[serde(default = "default_key_fields")]
    pub key_fields: Vec<String>,
    #[serde(default)]
    pub type_policies: HashMap<String, TypePolicyConfig>,
    /// Supertype (interface or union) → subtypes.
    #[serde(default)]
    pub possible_types: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub completeness: CompletenessPolicy,
    /// Memoize reads. Off means every read recomputes from the store.
    #[serde(default = "default_true")]
    pub result_caching: bool,
    #[serde(default)]
    pub cycle_guard: CycleGuard,
    /// Store `__typename` on normalized records.
    #[serde(default = "default_true")]
    pub add_typename: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key_fields: default_key_fields(),
            type_policies: HashMap::new(),
            possible_types: HashMap::new(),
            completeness: CompletenessPolicy::default(),
            result_caching: true,
            cycle_guard: CycleGuard::default(),
            add_typename: true,
        }
    }
}

fn default_key_fields() -> Vec<String> {
    vec!["id".to_string(), "_id".to_string()]
}

fn default_true() -> bool {
    true
}

impl CacheConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let config: CacheConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (typename, policy) in &self.type_policies {
            if let Some(fields) = &policy.key_fields {
                if fields.is_empty() {
                    return Err(Error::Config(format!(
                        "type policy for {typename} has an empty key_fields list"
                    )));
                }
                if policy.embedded {
                    return Err(Error::Config(format!(
                        "type policy for {typename} sets both key_fields and embedded"
                    )));
                }
            }
        }
        Ok(())
    }
}
