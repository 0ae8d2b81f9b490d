//! # Entity Store Trait
//!
//! This is THE contract between the cache and whatever holds the
//! normalized records. The read executor, the normalizer and the garbage
//! collector only ever talk to a store through this trait.
//!
//! ## Implementations
//!
//! | Store | Module | Description |
//! |-------|--------|-------------|
//! | `MemoryStore` | `memory` | Hash-map store, the default |
//!
//! All operations are synchronous. Locking is the caller's concern: the
//! [`Cache`](crate::Cache) handle serializes access to its store.

pub mod memory;

use crate::model::*;

pub use memory::MemoryStore;

/// Result of writing one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldWrite {
    /// The record did not exist before this write.
    pub created: bool,
    pub outcome: MergeOutcome,
}

impl FieldWrite {
    pub fn changed(&self) -> bool {
        self.created || self.outcome.is_change()
    }
}

/// The normalized-store contract.
pub trait EntityStore: Send + 'static {
    // ========================================================================
    // Records
    // ========================================================================

    /// Get a whole record.
    fn get(&self, id: &EntityId) -> Option<&EntityRecord>;

    /// Whether a record exists for `id`.
    fn has(&self, id: &EntityId) -> bool {
        self.get(id).is_some()
    }

    /// Remove a record. Returns the removed record, if any.
    fn delete(&mut self, id: &EntityId) -> Option<EntityRecord>;

    /// Insert or replace a whole record (snapshot restore).
    fn put(&mut self, id: EntityId, record: EntityRecord);

    // ========================================================================
    // Fields
    // ========================================================================

    /// Read one field.
    fn read(&self, id: &EntityId, key: &StoreKey) -> Option<&StoreValue> {
        self.get(id).and_then(|r| r.get(key))
    }

    /// Merge `value` into the field. Creates the record on first write,
    /// which makes forward references legal.
    fn write(&mut self, id: &EntityId, key: StoreKey, value: StoreValue) -> FieldWrite;

    /// Remove one field. Returns the removed value.
    fn remove_field(&mut self, id: &EntityId, key: &StoreKey) -> Option<StoreValue>;

    // ========================================================================
    // Scan
    // ========================================================================

    /// All entity ids currently stored.
    fn ids(&self) -> Vec<EntityId>;

    /// Number of records.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every record.
    fn clear(&mut self);
}
