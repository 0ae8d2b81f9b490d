//! Stored field values.

use std::fmt;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use super::{EntityId, StoreKey};

/// Key under which a reference is rendered in result trees and snapshots.
pub const REF_KEY: &str = "__ref";

/// A stored field value.
///
/// Closed set of shapes built at the normalization boundary:
/// - `Scalar`: any leaf JSON value (including null and custom JSON scalars)
/// - `List`: ordered values, which may themselves contain references
/// - `Reference`: look this entity up elsewhere in the store
/// - `Object`: a non-identified object stored inline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum StoreValue {
    Scalar(serde_json::Value),
    List(Vec<StoreValue>),
    Reference(EntityId),
    Object(EmbeddedObject),
}

/// An embedded (non-normalized) object. Its fields are stored inline in
/// the parent record and are invalidated together with the parent field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedObject {
    pub fields: HashMap<StoreKey, StoreValue>,
}

impl EmbeddedObject {
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

    pub fn typename(&self) -> Option<&str> {
        self.fields
            .get(&StoreKey::typename())
            .and_then(|v| v.as_scalar())
            .and_then(|v| v.as_str())
    }
}

/// What happened when a value was merged into an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Unchanged,
    Changed,
    /// The incoming value had a different shape and replaced the old one.
    Overwritten,
}

impl MergeOutcome {
    pub fn is_change(self) -> bool {
        !matches!(self, MergeOutcome::Unchanged)
    }
}

// ============================================================================
// Type checking
// ============================================================================

impl StoreValue {
    pub fn null() -> Self {
        StoreValue::Scalar(serde_json::Value::Null)
    }

    pub fn shape_name(&self) -> &'static str {
        match self {
            StoreValue::Scalar(_) => "SCALAR",
            StoreValue::List(_) => "LIST",
            StoreValue::Reference(_) => "REFERENCE",
            StoreValue::Object(_) => "OBJECT",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, StoreValue::Scalar(serde_json::Value::Null))
    }

    pub fn as_scalar(&self) -> Option<&serde_json::Value> {
        match self {
            StoreValue::Scalar(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&EntityId> {
        match self {
            StoreValue::Reference(id) => Some(id),
            _ => None,
        }
    }

    /// Every reference contained in this value, at any depth.
    pub fn references(&self) -> std::vec::IntoIter<&EntityId> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out.into_iter()
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a EntityId>) {
        match self {
            StoreValue::Scalar(_) => {}
            StoreValue::Reference(id) => out.push(id),
            StoreValue::List(items) => {
                for item in items {
                    item.collect_references(out);
                }
            }
            StoreValue::Object(obj) => {
                for v in obj.fields.values() {
                    v.collect_references(out);
                }
            }
        }
    }

    /// Render as JSON. References become `{"__ref": id}`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            StoreValue::Scalar(v) => v.clone(),
            StoreValue::List(items) => {
                serde_json::Value::Array(items.iter().map(StoreValue::to_json).collect())
            }
            StoreValue::Reference(id) => reference_json(id),
            StoreValue::Object(obj) => serde_json::Value::Object(
                obj.fields
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Merge `incoming` into `self`.
    ///
    /// Embedded objects merge field by field; every other shape replaces.
    /// A shape change (e.g. list written as scalar) overwrites.
    pub fn merge(&mut self, incoming: StoreValue) -> MergeOutcome {
        match (&mut *self, incoming) {
            (StoreValue::Object(existing), StoreValue::Object(incoming)) => {
                let mut outcome = MergeOutcome::Unchanged;
                for (key, value) in incoming.fields {
                    let field = match existing.fields.get_mut(&key) {
                        Some(old) => old.merge(value),
                        None => {
                            existing.fields.insert(key, value);
                            MergeOutcome::Changed
                        }
                    };
                    if field.is_change() && outcome == MergeOutcome::Unchanged {
                        outcome = MergeOutcome::Changed;
                    }
                }
                outcome
            }
            (existing, incoming) => {
                if *existing == incoming {
                    MergeOutcome::Unchanged
                } else if std::mem::discriminant(existing) != std::mem::discriminant(&incoming)
                    && !existing.is_null()
                    && !incoming.is_null()
                {
                    *existing = incoming;
                    MergeOutcome::Overwritten
                } else {
                    *existing = incoming;
                    MergeOutcome::Changed
                }
            }
        }
    }
}

pub(crate) fn reference_json(id: &EntityId) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    map.insert(REF_KEY.to_string(), serde_json::Value::String(id.to_string()));
    serde_json::Value::Object(map)
}

// ============================================================================
// Conversions (From impls)
// ============================================================================

impl From<bool> for StoreValue { fn from(v: bool) -> Self { StoreValue::Scalar(v.into()) } }
impl From<i32> for StoreValue { fn from(v: i32) -> Self { StoreValue::Scalar(v.into()) } }
impl From<i64> for StoreValue { fn from(v: i64) -> Self { StoreValue::Scalar(v.into()) } }
impl From<f64> for StoreValue { fn from(v: f64) -> Self { StoreValue::Scalar(v.into()) } }
impl From<String> for StoreValue { fn from(v: String) -> Self { StoreValue::Scalar(v.into()) } }
impl From<&str> for StoreValue { fn from(v: &str) -> Self { StoreValue::Scalar(v.into()) } }
impl From<serde_json::Value> for StoreValue { fn from(v: serde_json::Value) -> Self { StoreValue::Scalar(v) } }
impl From<EmbeddedObject> for StoreValue { fn from(v: EmbeddedObject) -> Self { StoreValue::Object(v) } }
impl<T: Into<StoreValue>> From<Vec<T>> for StoreValue {
    fn from(v: Vec<T>) -> Self { StoreValue::List(v.into_iter().map(Into::into).collect()) }
}

// ============================================================================
// Display
// ============================================================================

impl fmt::Display for StoreValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreValue::Scalar(v) => write!(f, "{v}"),
            StoreValue::Reference(id) => write!(f, "-> {id}"),
            StoreValue::List(l) => {
                write!(f, "[")?;
                for (i, v) in l.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            StoreValue::Object(obj) => {
                write!(f, "{{")?;
                for (i, (k, v)) in obj.fields.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}
