//! In-memory entity store.
//!
//! This is the reference implementation of `EntityStore`: one hash map
//! from entity id to record. All operations are O(1) amortized apart from
//! `ids()`.

use hashbrown::HashMap;

use crate::model::*;
use super::{EntityStore, FieldWrite};

// ============================================================================
// MemoryStore
// ============================================================================

/// Hash-map entity store.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    records: HashMap<EntityId, EntityRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

// ============================================================================
// EntityStore impl
// ============================================================================

impl EntityStore for MemoryStore {
    fn get(&self, id: &EntityId) -> Option<&EntityRecord> {
        self.records.get(id)
    }

    fn has(&self, id: &EntityId) -> bool {
        self.records.contains_key(id)
    }

    fn delete(&mut self, id: &EntityId) -> Option<EntityRecord> {
        self.records.remove(id)
    }

    fn put(&mut self, id: EntityId, record: EntityRecord) {
        self.records.insert(id, record);
    }

    fn write(&mut self, id: &EntityId, key: StoreKey, value: StoreValue) -> FieldWrite {
        let created = !self.records.contains_key(id);
        let record = self.records.entry(id.clone()).or_default();

        let outcome = match record.fields.get_mut(&key) {
            Some(existing) => existing.merge(value),
            None => {
                record.fields.insert(key, value);
                MergeOutcome::Changed
            }
        };
        FieldWrite { created, outcome }
    }

    fn remove_field(&mut self, id: &EntityId, key: &StoreKey) -> Option<StoreValue> {
        self.records.get_mut(id)?.fields.remove(key)
    }

    fn ids(&self) -> Vec<EntityId> {
        self.records.keys().cloned().collect()
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn clear(&mut self) {
        self.records.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================
