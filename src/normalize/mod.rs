//! # Normalization
//!
//! Flattens a raw nested response into per-entity field maps, then merges
//! them into the store.
//!
//! Two modes:
//! - **raw**: response keys are used as storage keys, every nested object
//!   is normalized or embedded.
//! - **selection-guided**: the selection decides storage keys (field name
//!   plus bound arguments; aliases are response keys only), which objects
//!   are nested selections and which are opaque JSON scalars, and which
//!   inline fragments apply.
//!
//! A raw object of the form `{"__ref": "<id>"}` is taken as a reference to
//! an existing entity in either mode.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::{Map, Value as Json};

use crate::identity::{Identity, IdentityPolicy};
use crate::model::*;
use crate::selection::{Selection, SelectionSet, Variables, fragment_matches};
use crate::storage::EntityStore;
use crate::{Error, Result};

// ============================================================================
// Outcomes
// ============================================================================

/// Two incompatible objects resolved to the same entity id. The later
/// write wins; this is a data-integrity warning, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityConflict {
    pub entity: EntityId,
    pub existing_typename: String,
    pub incoming_typename: String,
}

impl std::fmt::Display for IdentityConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} was a {} and is now written as a {}",
            self.entity, self.existing_typename, self.incoming_typename
        )
    }
}

/// What a write did to the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteOutcome {
    /// Changed `(entity, key)` pairs; `None` keys mark created entities.
    pub changed: DependencySet,
    pub conflicts: Vec<IdentityConflict>,
    /// Number of entity records the response touched.
    pub written: usize,
}

impl WriteOutcome {
    pub fn merge(&mut self, other: WriteOutcome) {
        self.changed.extend(&other.changed);
        self.conflicts.extend(other.conflicts);
        self.written += other.written;
    }
}

// ============================================================================
// Normalizer
// ============================================================================

type Fields = hashbrown::HashMap<StoreKey, StoreValue>;

/// Flattened response, ready to merge.
#[derive(Debug, Default)]
pub struct Normalized {
    pub records: Vec<(EntityId, Fields)>,
    pub conflicts: Vec<IdentityConflict>,
}

pub struct Normalizer<'a> {
    policy: &'a IdentityPolicy,
    possible_types: &'a HashMap<String, Vec<String>>,
    variables: &'a Variables,
    add_typename: bool,
    guided: bool,
    records: Vec<(EntityId, Fields)>,
    index: hashbrown::HashMap<EntityId, usize>,
    typenames: hashbrown::HashMap<EntityId, String>,
    conflicts: Vec<IdentityConflict>,
}

impl<'a> Normalizer<'a> {
    pub fn new(
        policy: &'a IdentityPolicy,
        possible_types: &'a HashMap<String, Vec<String>>,
        variables: &'a Variables,
        add_typename: bool,
    ) -> Self {
        Self {
            policy,
            possible_types,
            variables,
            add_typename,
            guided: false,
            records: Vec::new(),
            index: hashbrown::HashMap::new(),
            typenames: hashbrown::HashMap::new(),
            conflicts: Vec::new(),
        }
    }

    /// Normalize `data` as the fields of `root`.
    pub fn normalize(
        mut self,
        root: &EntityId,
        data: &Json,
        selection: Option<&SelectionSet>,
    ) -> Result<Normalized> {
        let Json::Object(object) = data else {
            return Err(Error::InvalidWrite(format!(
                "data written to {root} must be an object, got {}",
                json_kind(data)
            )));
        };
        self.guided = selection.is_some();
        let typename = object.get(StoreKey::TYPENAME).and_then(Json::as_str);
        let fields = self.object_fields(object, selection, typename);
        self.add_record(root.clone(), typename, fields);
        Ok(Normalized { records: self.records, conflicts: self.conflicts })
    }

    fn object_fields(
        &mut self,
        object: &Map<String, Json>,
        selection: Option<&SelectionSet>,
        typename: Option<&str>,
    ) -> Fields {
        let mut fields = Fields::new();
        match selection {
            Some(sel) => self.selected_fields(object, sel, typename, &mut fields),
            None => {
                for (key, raw) in object {
                    let value = self.value(raw, None);
                    merge_field(&mut fields, StoreKey::new(key), value);
                }
            }
        }
        if self.add_typename {
            if let Some(t) = typename {
                fields.insert(StoreKey::typename(), StoreValue::from(t));
            }
        }
        fields
    }

    fn selected_fields(
        &mut self,
        object: &Map<String, Json>,
        selection: &SelectionSet,
        typename: Option<&str>,
        fields: &mut Fields,
    ) {
        for item in selection.selections() {
            match item {
                Selection::Field(field) => {
                    let Some(raw) = object.get(field.response_key()) else {
                        tracing::trace!(field = field.response_key(), "field absent from written data");
                        continue;
                    };
                    let value = self.value(raw, field.selection().map(|s| &**s));
                    merge_field(fields, field.store_key(self.variables), value);
                }
                Selection::InlineFragment { type_condition, selection } => {
                    if fragment_matches(type_condition.as_deref(), typename, self.possible_types) {
                        self.selected_fields(object, selection, typename, fields);
                    }
                }
            }
        }
    }

    fn value(&mut self, raw: &Json, selection: Option<&SelectionSet>) -> StoreValue {
        match raw {
            Json::Array(items) => StoreValue::List(items.iter().map(|item| self.value(item, selection)).collect()),
            Json::Object(object) => {
                if let Some(id) = as_reference(object) {
                    return StoreValue::Reference(id);
                }
                if self.guided && selection.is_none() {
                    // Object-valued field without a sub-selection: an opaque scalar.
                    return StoreValue::Scalar(raw.clone());
                }
                self.object(object, selection)
            }
            scalar => StoreValue::Scalar(scalar.clone()),
        }
    }

    fn object(&mut self, object: &Map<String, Json>, selection: Option<&SelectionSet>) -> StoreValue {
        let typename = object.get(StoreKey::TYPENAME).and_then(Json::as_str);
        let fields = self.object_fields(object, selection, typename);
        match self.policy.resolve_typed(typename, object) {
            Identity::Entity(id) => {
                self.add_record(id.clone(), typename, fields);
                StoreValue::Reference(id)
            }
            Identity::Embedded => StoreValue::Object(EmbeddedObject { fields }),
        }
    }

    /// Same entity seen twice in one response merges field by field.
    fn add_record(&mut self, id: EntityId, typename: Option<&str>, fields: Fields) {
        if let Some(incoming) = typename {
            match self.typenames.get(&id) {
                Some(existing) if existing != incoming => {
                    self.conflicts.push(IdentityConflict {
                        entity: id.clone(),
                        existing_typename: existing.clone(),
                        incoming_typename: incoming.to_string(),
                    });
                    self.typenames.insert(id.clone(), incoming.to_string());
                }
                Some(_) => {}
                None => {
                    self.typenames.insert(id.clone(), incoming.to_string());
                }
            }
        }

        match self.index.get(&id) {
            Some(&i) => {
                let existing = &mut self.records[i].1;
                for (key, value) in fields {
                    merge_field(existing, key, value);
                }
            }
            None => {
                self.index.insert(id.clone(), self.records.len());
                self.records.push((id, fields));
            }
        }
    }
}

fn merge_field(fields: &mut Fields, key: StoreKey, value: StoreValue) {
    match fields.get_mut(&key) {
        Some(existing) => {
            existing.merge(value);
        }
        None => {
            fields.insert(key, value);
        }
    }
}

fn as_reference(object: &Map<String, Json>) -> Option<EntityId> {
    if object.len() != 1 {
        return None;
    }
    object.get(REF_KEY).and_then(Json::as_str).map(EntityId::from)
}

fn json_kind(v: &Json) -> &'static str {
    match v {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

// ============================================================================
// Merge into the store
// ============================================================================

/// Merge normalized records into `store`, field by field, and report what
/// changed. Invalidation of memoized reads is the caller's next step.
pub fn apply<S: EntityStore>(store: &mut S, normalized: Normalized) -> WriteOutcome {
    let mut outcome = WriteOutcome {
        conflicts: normalized.conflicts,
        written: normalized.records.len(),
        ..WriteOutcome::default()
    };

    for (id, fields) in normalized.records {
        let incoming = fields
            .get(&StoreKey::typename())
            .and_then(StoreValue::as_scalar)
            .and_then(Json::as_str);
        let existing = store.get(&id).and_then(EntityRecord::typename);
        if let (Some(existing), Some(incoming)) = (existing, incoming) {
            if existing != incoming {
                outcome.conflicts.push(IdentityConflict {
                    entity: id.clone(),
                    existing_typename: existing.to_string(),
                    incoming_typename: incoming.to_string(),
                });
            }
        }

        for (key, value) in fields {
            let effect = store.write(&id, key.clone(), value);
            if effect.created {
                outcome.changed.insert_entity(&id);
            }
            if effect.outcome == MergeOutcome::Overwritten {
                tracing::debug!(entity = %id, field = %key, "field overwritten with a different shape");
            }
            if effect.outcome.is_change() {
                outcome.changed.insert_field(&id, &key);
            }
        }
    }

    for conflict in &outcome.conflicts {
        tracing::warn!(%conflict, "identity conflict, later write wins");
    }
    outcome
}

// ============================================================================
// Tests
// ============================================================================
