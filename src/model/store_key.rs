//! Storage keys: field name plus the serialized argument set.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Key of one stored field.
///
/// The same field may be stored several times under different arguments,
/// so the key is `name` when there are no arguments and
/// `name(<canonical JSON of the sorted arguments>)` otherwise, e.g.
/// `chat({"id":1})`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreKey(Arc<str>);

impl StoreKey {
    pub const TYPENAME: &'static str = "__typename";

    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    pub fn typename() -> Self {
        Self::new(Self::TYPENAME)
    }

    /// Build a key from a field name and its bound arguments.
    pub fn with_args(name: &str, args: &BTreeMap<String, serde_json::Value>) -> Self {
        if args.is_empty() {
            return Self::new(name);
        }
        // BTreeMap serializes in key order, which makes the key canonical.
        let rendered = serde_json::to_string(args).unwrap_or_default();
        Self(Arc::from(format!("{name}({rendered})")))
    }

    /// The bare field name, without arguments.
    pub fn field_name(&self) -> &str {
        match self.0.find('(') {
            Some(i) => &self.0[..i],
            None => &self.0,
        }
    }

    pub fn has_args(&self) -> bool {
        self.0.len() != self.field_name().len()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StoreKey {
    fn from(v: &str) -> Self { Self::new(v) }
}

impl From<String> for StoreKey {
    fn from(v: String) -> Self { Self(Arc::from(v)) }
}
