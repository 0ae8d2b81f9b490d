//! # Dependency Tracker
//!
//! Owns the two memo tables of the read executor and the reverse
//! dependency index that makes invalidation exact.
//!
//! - The **selection table** memoizes "evaluate one selection set against
//!   one object" (an entity or an embedded object).
//! - The **list table** memoizes "evaluate a selection against every
//!   element of a list field".
//!
//! Each entry records the full set of store locations it read, including
//! everything unioned in from the child entries it reused. Invalidation is
//! therefore a reverse lookup `(entity, field) → entries`; no upward walk is
//! needed, because ancestors already list their children's dependencies.
//!
//! Invalidated entries are only marked stale. They are never reused, and
//! are physically removed when a fresh result replaces them or when the
//! garbage collector purges them.

pub mod location;

use hashbrown::{HashMap, HashSet};
use serde_json::Value as Json;

use crate::model::{DependencySet, EntityId, MissingField, StoreKey};

pub use location::{Location, MemoKey, PathSegment};

/// Which memo table an entry lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoKind {
    Selection,
    List,
}

/// Handle to one memo entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoId {
    kind: MemoKind,
    seq: u64,
}

/// A computed sub-result together with what it read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Computed {
    pub value: Json,
    pub dependencies: DependencySet,
    pub missing: Vec<MissingField>,
}

#[derive(Debug)]
struct MemoEntry {
    key: MemoKey,
    computed: Computed,
    stale: bool,
}

#[derive(Debug, Default)]
struct MemoTable {
    by_key: HashMap<MemoKey, u64>,
    entries: HashMap<u64, MemoEntry>,
}

impl MemoTable {
    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Population counters, for tests and diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoStats {
    pub selection_entries: usize,
    pub list_entries: usize,
    pub stale_entries: usize,
    /// Total `(entity, field) → entry` links in the reverse index.
    pub indexed_dependencies: usize,
}

type ReverseIndex = HashMap<EntityId, HashMap<Option<StoreKey>, HashSet<MemoId>>>;

/// Memo tables plus the reverse dependency index.
#[derive(Debug, Default)]
pub struct DependencyTracker {
    selections: MemoTable,
    lists: MemoTable,
    reverse: ReverseIndex,
    next_seq: u64,
}

impl DependencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, kind: MemoKind) -> &MemoTable {
        match kind {
            MemoKind::Selection => &self.selections,
            MemoKind::List => &self.lists,
        }
    }

    fn table_mut(&mut self, kind: MemoKind) -> &mut MemoTable {
        match kind {
            MemoKind::Selection => &mut self.selections,
            MemoKind::List => &mut self.lists,
        }
    }

    // ========================================================================
    // Lookup / insert
    // ========================================================================

    /// A fresh (non-stale) memoized result for `key`.
    pub fn lookup(&self, kind: MemoKind, key: &MemoKey) -> Option<&Computed> {
        let table = self.table(kind);
        let seq = table.by_key.get(key)?;
        let entry = table.entries.get(seq)?;
        (!entry.stale).then_some(&entry.computed)
    }

    /// Store a result. Replaces (and unindexes) any previous entry under
    /// the same key.
    pub fn insert(&mut self, kind: MemoKind, key: MemoKey, computed: Computed) -> MemoId {
        debug_assert!(
            !computed.dependencies.is_empty(),
            "memo entry without dependencies could never be purged"
        );
        if let Some(&seq) = self.table(kind).by_key.get(&key) {
            self.purge(MemoId { kind, seq });
        }

        let id = MemoId { kind, seq: self.next_seq };
        self.next_seq += 1;

        for dep in computed.dependencies.iter() {
            self.reverse
                .entry(dep.entity)
                .or_default()
                .entry(dep.field)
                .or_default()
                .insert(id);
        }

        let table = self.table_mut(kind);
        table.by_key.insert(key.clone(), id.seq);
        table.entries.insert(id.seq, MemoEntry { key, computed, stale: false });
        id
    }

    // ========================================================================
    // Invalidation
    // ========================================================================

    /// Mark stale every entry that read `(entity, field)`, or anything of
    /// `entity` when `field` is `None`. Returns how many entries went stale.
    pub fn invalidate(&mut self, entity: &EntityId, field: Option<&StoreKey>) -> usize {
        let Self { selections, lists, reverse, .. } = self;
        let Some(fields) = reverse.get(entity) else {
            return 0;
        };

        let mut staled = 0;
        let mut mark = |id: &MemoId| {
            let table = match id.kind {
                MemoKind::Selection => &mut *selections,
                MemoKind::List => &mut *lists,
            };
            if let Some(entry) = table.entries.get_mut(&id.seq) {
                if !entry.stale {
                    entry.stale = true;
                    staled += 1;
                }
            }
        };

        match field {
            Some(key) => {
                if let Some(ids) = fields.get(&Some(key.clone())) {
                    ids.iter().for_each(&mut mark);
                }
            }
            None => fields.values().flatten().for_each(&mut mark),
        }
        staled
    }

    /// Invalidate everything a change set touches.
    pub fn invalidate_changes(&mut self, changes: &DependencySet) -> usize {
        changes
            .iter()
            .map(|dep| self.invalidate(&dep.entity, dep.field.as_ref()))
            .sum()
    }

    // ========================================================================
    // Purging
    // ========================================================================

    /// Physically remove one entry and its reverse-index links.
    fn purge(&mut self, id: MemoId) -> bool {
        let Some(entry) = self.table_mut(id.kind).entries.remove(&id.seq) else {
            return false;
        };
        self.table_mut(id.kind).by_key.remove(&entry.key);

        for dep in entry.computed.dependencies.iter() {
            let Some(fields) = self.reverse.get_mut(&dep.entity) else {
                debug_assert!(false, "reverse index lost entity {}", dep.entity);
                continue;
            };
            if let Some(ids) = fields.get_mut(&dep.field) {
                ids.remove(&id);
                if ids.is_empty() {
                    fields.remove(&dep.field);
                }
            }
            if fields.is_empty() {
                self.reverse.remove(&dep.entity);
            }
        }
        true
    }

    /// Remove every entry that read anything of `entity`.
    pub fn purge_entity(&mut self, entity: &EntityId) -> usize {
        let Some(fields) = self.reverse.get(entity) else {
            return 0;
        };
        let ids: Vec<MemoId> = fields.values().flatten().copied().collect();
        ids.into_iter().filter(|id| self.purge(*id)).count()
    }

    /// Remove every stale entry.
    pub fn purge_stale(&mut self) -> usize {
        let stale: Vec<MemoId> = [MemoKind::Selection, MemoKind::List]
            .into_iter()
            .flat_map(|kind| {
                self.table(kind)
                    .entries
                    .iter()
                    .filter(|(_, e)| e.stale)
                    .map(move |(seq, _)| MemoId { kind, seq: *seq })
            })
            .collect();
        stale.into_iter().filter(|id| self.purge(*id)).count()
    }

    /// Remove every entry that mentions an entity for which `exists`
    /// returns false.
    pub fn purge_absent(&mut self, exists: impl Fn(&EntityId) -> bool) -> usize {
        let absent: Vec<EntityId> = self.reverse.keys().filter(|id| !exists(id)).cloned().collect();
        absent.iter().map(|id| self.purge_entity(id)).sum()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.selections = MemoTable::default();
        self.lists = MemoTable::default();
        self.reverse.clear();
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    pub fn selection_len(&self) -> usize {
        self.selections.len()
    }

    pub fn list_len(&self) -> usize {
        self.lists.len()
    }

    pub fn stats(&self) -> MemoStats {
        let stale = self.selections.entries.values().chain(self.lists.entries.values())
            .filter(|e| e.stale)
            .count();
        MemoStats {
            selection_entries: self.selections.len(),
            list_entries: self.lists.len(),
            stale_entries: stale,
            indexed_dependencies: self.reverse.values().flat_map(|f| f.values()).map(HashSet::len).sum(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
