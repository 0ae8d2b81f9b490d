//! Transaction scopes.
//!
//! [`CacheState`] is everything the cache lock protects. Every mutation
//! goes through a [`CacheTx`], which couples the store change with memo
//! invalidation and accumulates one change set; watches are refreshed
//! once, when the transaction finishes.

use hashbrown::HashMap;
use serde_json::Value as Json;

use crate::config::CacheConfig;
use crate::execution::{self, ReadRequest, ReadResult};
use crate::gc::{self, GcReport};
use crate::identity::IdentityPolicy;
use crate::memo::DependencyTracker;
use crate::model::*;
use crate::normalize::{self, Normalizer, WriteOutcome};
use crate::selection::{SelectionSet, Variables};
use crate::snapshot::Snapshot;
use crate::storage::EntityStore;
use crate::watch::{Notification, WatchCallback, WatchId, WatchRegistry, WatchRequest};
use crate::Result;

/// State guarded by the cache lock.
pub struct CacheState<S: EntityStore> {
    pub(crate) store: S,
    pub(crate) memo: DependencyTracker,
    pub(crate) watches: WatchRegistry,
    pub(crate) retained: HashMap<EntityId, usize>,
    pub(crate) config: CacheConfig,
    pub(crate) identity: IdentityPolicy,
}

impl<S: EntityStore> CacheState<S> {
    pub fn new(store: S, config: CacheConfig, identity: IdentityPolicy) -> Self {
        Self {
            store,
            memo: DependencyTracker::new(),
            watches: WatchRegistry::new(),
            retained: HashMap::new(),
            config,
            identity,
        }
    }

    pub fn begin(&mut self) -> CacheTx<'_, S> {
        CacheTx { state: self, changes: DependencySet::new(), force: false }
    }

    pub fn read(&mut self, request: &ReadRequest) -> Result<ReadResult> {
        let policy = request.completeness.unwrap_or(self.config.completeness);
        execution::read(&self.store, &mut self.memo, &self.config, request).check(policy)
    }

    pub fn watch(&mut self, request: WatchRequest, callback: WatchCallback) -> (WatchId, Notification) {
        self.watches.register(&self.store, &mut self.memo, &self.config, request, callback)
    }

    pub fn retain(&mut self, id: EntityId) -> usize {
        let count = self.retained.entry(id).or_insert(0);
        *count += 1;
        *count
    }

    /// Drop one retain. Returns the remaining count.
    pub fn release(&mut self, id: &EntityId) -> usize {
        let Some(count) = self.retained.get_mut(id) else {
            return 0;
        };
        *count -= 1;
        let remaining = *count;
        if remaining == 0 {
            self.retained.remove(id);
        }
        remaining
    }

    /// Operation roots, retained ids and watch roots.
    pub fn roots(&self) -> Vec<EntityId> {
        let mut roots: Vec<EntityId> = EntityId::roots().into();
        roots.extend(self.retained.keys().cloned());
        roots.extend(self.watches.roots().cloned());
        roots
    }
}

// ============================================================================
// Transaction
// ============================================================================

/// A batch of mutations under one lock acquisition.
pub struct CacheTx<'a, S: EntityStore> {
    state: &'a mut CacheState<S>,
    changes: DependencySet,
    force: bool,
}

impl<'a, S: EntityStore> CacheTx<'a, S> {
    /// Write raw response data into `root`, using response keys as
    /// storage keys.
    pub fn write(&mut self, root: impl Into<EntityId>, data: &Json) -> Result<WriteOutcome> {
        self.write_with(root.into(), None, &Variables::new(), data)
    }

    /// Write response data shaped by `selection`: storage keys carry the
    /// bound arguments and aliases are resolved.
    pub fn write_query(
        &mut self,
        root: impl Into<EntityId>,
        selection: &SelectionSet,
        variables: &Variables,
        data: &Json,
    ) -> Result<WriteOutcome> {
        self.write_with(root.into(), Some(selection), variables, data)
    }

    fn write_with(
        &mut self,
        root: EntityId,
        selection: Option<&SelectionSet>,
        variables: &Variables,
        data: &Json,
    ) -> Result<WriteOutcome> {
        let state = &mut *self.state;
        let normalized = Normalizer::new(
            &state.identity,
            &state.config.possible_types,
            variables,
            state.config.add_typename,
        )
        .normalize(&root, data, selection)?;

        let outcome = normalize::apply(&mut state.store, normalized);
        let staled = state.memo.invalidate_changes(&outcome.changed);
        tracing::debug!(
            root = %root,
            entities = outcome.written,
            changed = outcome.changed.len(),
            staled,
            "write"
        );
        self.changes.extend(&outcome.changed);
        Ok(outcome)
    }

    /// Remove one entity and invalidate everything that read it. Returns
    /// false when the id was not stored.
    pub fn evict(&mut self, id: &EntityId) -> bool {
        let state = &mut *self.state;
        if state.store.delete(id).is_none() {
            return false;
        }
        let staled = state.memo.invalidate(id, None);
        tracing::debug!(entity = %id, staled, "evict");
        self.changes.insert_entity(id);
        true
    }

    /// Remove one field of an entity. With `args: None` every stored
    /// argument variant of `field_name` goes. Returns how many stored
    /// fields were removed.
    pub fn evict_field(&mut self, id: &EntityId, field_name: &str, args: Option<&Variables>) -> usize {
        let state = &mut *self.state;
        let keys: Vec<StoreKey> = match args {
            Some(args) => vec![StoreKey::with_args(field_name, args)],
            None => state
                .store
                .get(id)
                .map(|record| {
                    record
                        .fields
                        .keys()
                        .filter(|k| k.field_name() == field_name)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default(),
        };

        let mut removed = 0;
        for key in keys {
            if state.store.remove_field(id, &key).is_none() {
                continue;
            }
            removed += 1;
            let staled = state.memo.invalidate(id, Some(&key));
            tracing::debug!(entity = %id, field = %key, staled, "evict field");
            self.changes.insert_field(id, &key);
        }
        removed
    }

    pub fn read(&mut self, request: &ReadRequest) -> Result<ReadResult> {
        self.state.read(request)
    }

    /// Collect everything unreachable from the cache's roots.
    pub fn gc(&mut self) -> GcReport {
        self.gc_with(std::iter::empty(), |_| false)
    }

    /// Collect with extra roots and a liveness predicate.
    pub fn gc_with(
        &mut self,
        extra_roots: impl IntoIterator<Item = EntityId>,
        is_live: impl Fn(&EntityId) -> bool,
    ) -> GcReport {
        let state = &mut *self.state;
        let mut roots = state.roots();
        roots.extend(extra_roots);
        let report = gc::collect(&mut state.store, &mut state.memo, roots, is_live);
        for id in &report.removed {
            self.changes.insert_entity(id);
        }
        report
    }

    /// Replace the store contents with `snapshot`.
    pub fn restore(&mut self, snapshot: Snapshot) {
        let state = &mut *self.state;
        state.store.clear();
        state.memo.clear();
        let count = snapshot.len();
        snapshot.restore_into(&mut state.store);
        tracing::debug!(entities = count, "snapshot restored");
        self.force = true;
    }

    /// Everything changed so far in this transaction.
    pub fn changes(&self) -> &DependencySet {
        &self.changes
    }

    /// Refresh touched watches. Deliver the notifications after the cache
    /// lock is released.
    pub fn finish(self) -> Vec<Notification> {
        if self.changes.is_empty() && !self.force {
            return Vec::new();
        }
        let state = self.state;
        state.watches.refresh(&state.store, &mut state.memo, &state.config, &self.changes, self.force)
    }
}
