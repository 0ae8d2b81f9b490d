//! Serializable copies of the whole store.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{EntityId, EntityRecord};
use crate::storage::EntityStore;
use crate::Result;

/// Every record of a store, ordered by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    pub records: BTreeMap<EntityId, EntityRecord>,
}

impl Snapshot {
    pub fn capture<S: EntityStore>(store: &S) -> Self {
        let records = store
            .ids()
            .into_iter()
            .filter_map(|id| store.get(&id).cloned().map(|record| (id, record)))
            .collect();
        Self { records }
    }

    pub fn restore_into<S: EntityStore>(self, store: &mut S) {
        for (id, record) in self.records {
            store.put(id, record);
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &EntityId) -> Option<&EntityRecord> {
        self.records.get(id)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
