//! # normcache: Normalized Graph-Query Result Cache
//!
//! Flattens nested query results into a store of entities, rebuilds result
//! trees from that store on demand, and keeps repeated reads cheap by
//! memoizing sub-results against exactly the store locations they read.
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `EntityStore` is the contract between the cache and storage
//! 2. **Clean DTOs**: `EntityId`, `StoreKey`, `StoreValue` cross all boundaries
//! 3. **Writes and invalidation are one step**: no read ever sees a store
//!    change whose dependents are still memoized as fresh
//! 4. **Nothing leaks**: garbage collection purges memo entries together
//!    with the entities they depended on
//!
//! ## Quick Start
//!
//! ```rust
//! use normcache::{Cache, ReadRequest, SelectionSet};
//! use serde_json::json;
//!
//! # fn main() -> normcache::Result<()> {
//! let cache = Cache::open_memory();
//! cache.write("ROOT_QUERY", &json!({
//!     "me": { "__typename": "User", "id": 1, "name": "Ada" }
//! }))?;
//!
//! let user = SelectionSet::fields(["name"]);
//! let query = SelectionSet::builder().nested("me", user).build();
//! let result = cache.read(&ReadRequest::new(query))?;
//! assert_eq!(result.data, json!({ "me": { "name": "Ada" } }));
//! # Ok(())
//! # }
//! ```
//!
//! ## Storage Backends
//!
//! | Backend | Description |
//! |---------|-------------|
//! | `MemoryStore` | Hash-map store, the default |

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod selection;
pub mod config;
pub mod identity;
pub mod storage;
pub mod memo;
pub mod execution;
pub mod normalize;
pub mod gc;
pub mod watch;
pub mod tx;
pub mod reactive;
pub mod snapshot;

// ============================================================================
// Re-exports
// ============================================================================

pub use model::{
    EntityId, EntityRecord, StoreKey, StoreValue, EmbeddedObject,
    Dependency, DependencySet, MissingField,
};
pub use selection::{Argument, FieldSelection, Selection, SelectionId, SelectionSet, Variables};
pub use config::{CacheConfig, CompletenessPolicy, CycleGuard, TypePolicyConfig};
pub use identity::{Identity, IdentityPolicy};
pub use storage::{EntityStore, MemoryStore};
pub use memo::MemoStats;
pub use execution::{CycleNotice, ReadRequest, ReadResult};
pub use normalize::{IdentityConflict, WriteOutcome};
pub use gc::GcReport;
pub use watch::{WatchCallback, WatchId, WatchRequest};
pub use tx::CacheTx;
pub use reactive::{Mute, ReactiveVar};
pub use snapshot::Snapshot;

use parking_lot::Mutex;
use serde_json::Value as Json;

use tx::CacheState;
use watch::Notification;

// ============================================================================
// Top-level Cache handle
// ============================================================================

/// The primary entry point. A `Cache` owns a store, the memo tables and
/// the active watches behind one lock.
///
/// Every public operation is atomic: a write merges its records and
/// invalidates their dependents before any other operation can observe
/// the store. Watch callbacks run after the lock is released.
pub struct Cache<S: EntityStore = MemoryStore> {
    state: Mutex<CacheState<S>>,
}

impl<S: EntityStore> Cache<S> {
    /// Create a cache over the given store.
    pub fn with_store(store: S, config: CacheConfig) -> Self {
        let identity = IdentityPolicy::from_config(&config);
        Self { state: Mutex::new(CacheState::new(store, config, identity)) }
    }

    /// Replace the identity policy, e.g. to add custom resolvers.
    pub fn with_identity_policy(self, identity: IdentityPolicy) -> Self {
        let mut state = self.state.into_inner();
        state.identity = identity;
        Self { state: Mutex::new(state) }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Rebuild a result tree from the store.
    ///
    /// Fails with [`Error::CacheMiss`] under the strict completeness policy
    /// when any selected field is absent.
    pub fn read(&self, request: &ReadRequest) -> Result<ReadResult> {
        self.state.lock().read(request)
    }

    /// The entity id `object` would be stored under, if it has one.
    pub fn identify(&self, object: &Json) -> Option<EntityId> {
        let Json::Object(map) = object else {
            return None;
        };
        self.state.lock().identity.resolve(map).entity_id().cloned()
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Merge raw response data into `root`. Response keys are storage keys.
    pub fn write(&self, root: impl Into<EntityId>, data: &Json) -> Result<WriteOutcome> {
        self.transaction(|tx| tx.write(root, data))
    }

    /// Merge response data shaped by `selection` into `root`.
    pub fn write_query(
        &self,
        root: impl Into<EntityId>,
        selection: &SelectionSet,
        variables: &Variables,
        data: &Json,
    ) -> Result<WriteOutcome> {
        self.transaction(|tx| tx.write_query(root, selection, variables, data))
    }

    /// Delete one entity and invalidate its dependents now. Unreachable
    /// entities it leaves behind are swept by the next [`Cache::gc`].
    pub fn evict(&self, id: impl Into<EntityId>) -> bool {
        let id = id.into();
        self.mutate(|tx| tx.evict(&id))
    }

    /// Delete one field (every argument variant when `args` is `None`).
    pub fn evict_field(&self, id: impl Into<EntityId>, field_name: &str, args: Option<&Variables>) -> usize {
        let id = id.into();
        self.mutate(|tx| tx.evict_field(&id, field_name, args))
    }

    /// Run several mutations under one lock acquisition. Watches are
    /// refreshed once, after `f` returns, whether or not it failed;
    /// mutations already applied are not rolled back.
    pub fn transaction<R>(&self, f: impl FnOnce(&mut CacheTx<'_, S>) -> Result<R>) -> Result<R> {
        self.mutate(f)
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut CacheTx<'_, S>) -> R) -> R {
        let (result, notifications) = {
            let mut state = self.state.lock();
            let mut tx = state.begin();
            let result = f(&mut tx);
            (result, tx.finish())
        };
        deliver(notifications);
        result
    }

    // ========================================================================
    // Garbage collection
    // ========================================================================

    /// Remove every entity unreachable from the operation roots, retained
    /// ids and watch roots, and purge the memo entries that depended on
    /// them. Returns the number of entities removed.
    pub fn gc(&self) -> usize {
        self.mutate(|tx| tx.gc()).removed.len()
    }

    /// [`Cache::gc`] with extra roots and a liveness predicate.
    pub fn gc_with(
        &self,
        extra_roots: impl IntoIterator<Item = EntityId>,
        is_live: impl Fn(&EntityId) -> bool,
    ) -> GcReport {
        self.mutate(|tx| tx.gc_with(extra_roots, is_live))
    }

    /// Pin `id` as a GC root. Counted: each retain needs a release.
    pub fn retain(&self, id: impl Into<EntityId>) -> usize {
        self.state.lock().retain(id.into())
    }

    pub fn release(&self, id: impl Into<EntityId>) -> usize {
        self.state.lock().release(&id.into())
    }

    // ========================================================================
    // Watches
    // ========================================================================

    /// Register a standing read. `callback` receives the first result
    /// immediately and every changed result after that. The request's root
    /// stays a GC root until [`Cache::unwatch`].
    pub fn watch(
        &self,
        request: WatchRequest,
        callback: impl FnMut(&Result<ReadResult>) + Send + 'static,
    ) -> WatchId {
        let (id, first) = self.state.lock().watch(request, Box::new(callback));
        first.deliver();
        id
    }

    pub fn unwatch(&self, id: WatchId) -> bool {
        self.state.lock().watches.remove(id)
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    pub fn extract(&self) -> Snapshot {
        Snapshot::capture(&self.state.lock().store)
    }

    /// Replace the store contents. Every memo entry is dropped and every
    /// watch is re-read.
    pub fn restore(&self, snapshot: Snapshot) {
        self.mutate(|tx| tx.restore(snapshot))
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    pub fn memo_stats(&self) -> MemoStats {
        self.state.lock().memo.stats()
    }

    /// Entries in the per-object selection memo.
    pub fn selection_cache_size(&self) -> usize {
        self.state.lock().memo.selection_len()
    }

    /// Entries in the per-list memo.
    pub fn list_cache_size(&self) -> usize {
        self.state.lock().memo.list_len()
    }

    pub fn entity_count(&self) -> usize {
        self.state.lock().store.len()
    }

    /// Copy of one stored record.
    pub fn record(&self, id: impl Into<EntityId>) -> Option<EntityRecord> {
        self.state.lock().store.get(&id.into()).cloned()
    }

    pub fn config(&self) -> CacheConfig {
        self.state.lock().config.clone()
    }
}

/// In-memory cache.
impl Cache<MemoryStore> {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_store(MemoryStore::new(), config)
    }

    pub fn open_memory() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl Default for Cache<MemoryStore> {
    fn default() -> Self {
        Self::open_memory()
    }
}

fn deliver(notifications: Vec<Notification>) {
    for notification in notifications {
        notification.deliver();
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cache miss: {} field(s) missing, first {}", .missing.len(), first_missing(.missing))]
    CacheMiss { missing: Vec<MissingField> },

    #[error("identity conflict: {0}")]
    IdentityConflict(IdentityConflict),

    #[error("invalid write: {0}")]
    InvalidWrite(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn first_missing(missing: &[MissingField]) -> String {
    missing.first().map(ToString::to_string).unwrap_or_default()
}

impl From<IdentityConflict> for Error {
    fn from(conflict: IdentityConflict) -> Self { Error::IdentityConflict(conflict) }
}

pub type Result<T> = std::result::Result<T, Error>;
