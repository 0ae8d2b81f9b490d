//! # Garbage Collection
//!
//! Mark and sweep over the reference graph. Roots are the operation root
//! entities, explicitly retained ids and the roots of active watches.
//! Everything not reachable from a root is deleted, and every memoized
//! result that could still mention a deleted entity is purged with it.
//! Stale memo entries go in the same pass.

use std::collections::VecDeque;

use hashbrown::HashSet;
use serde::Serialize;

use crate::memo::DependencyTracker;
use crate::model::EntityId;
use crate::storage::EntityStore;

/// What a collection removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GcReport {
    /// Deleted entity ids, sorted.
    pub removed: Vec<EntityId>,
    /// Memo entries dropped (stale, or depending on a removed entity).
    pub purged_entries: usize,
}

/// Every id reachable from `roots` by following references. Roots that are
/// not in the store are skipped; dangling references are not followed.
pub fn reachable<S: EntityStore>(store: &S, roots: impl IntoIterator<Item = EntityId>) -> HashSet<EntityId> {
    let mut seen = HashSet::new();
    let mut queue: VecDeque<EntityId> = roots.into_iter().collect();

    while let Some(id) = queue.pop_front() {
        let Some(record) = store.get(&id) else {
            continue;
        };
        if !seen.insert(id) {
            continue;
        }
        for next in record.references() {
            if !seen.contains(next) {
                queue.push_back(next.clone());
            }
        }
    }
    seen
}

/// Sweep the store. Ids for which `is_live` holds (e.g. ids a caller keeps
/// outside the cache) are extra roots: they survive along with everything
/// they reference.
pub fn collect<S: EntityStore>(
    store: &mut S,
    memo: &mut DependencyTracker,
    roots: impl IntoIterator<Item = EntityId>,
    is_live: impl Fn(&EntityId) -> bool,
) -> GcReport {
    let ids = store.ids();
    let pinned: Vec<EntityId> = ids.iter().filter(|id| is_live(*id)).cloned().collect();
    let live = reachable(store, roots.into_iter().chain(pinned));

    let mut removed: Vec<EntityId> = ids.into_iter().filter(|id| !live.contains(id)).collect();
    removed.sort();

    let mut purged = 0;
    for id in &removed {
        store.delete(id);
        purged += memo.purge_entity(id);
    }
    purged += memo.purge_stale();
    // Entries that read an id before it was ever written (a missing root,
    // a dangling reference) have nothing left to invalidate them.
    purged += memo.purge_absent(|id| store.has(id));

    if !removed.is_empty() || purged > 0 {
        tracing::debug!(removed = removed.len(), purged, remaining = store.len(), "gc pass");
    }
    GcReport { removed, purged_entries: purged }
}
