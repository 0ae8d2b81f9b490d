//! # Watches
//!
//! A watch is a standing read. It remembers the dependency set of its last
//! result; when a mutation's change set touches that set the watch is
//! re-read and, if the result differs, its callback is queued.
//!
//! Callbacks never run under the cache lock. [`WatchRegistry::refresh`]
//! returns [`Notification`]s that the caller delivers after unlocking, so
//! a callback may freely read from or write to the cache. A result that
//! arrives while its callback is still running is parked and handed over
//! as soon as that call returns; only the latest parked result is kept.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::CacheConfig;
use crate::execution::{self, ReadRequest, ReadResult};
use crate::memo::DependencyTracker;
use crate::model::{DependencySet, EntityId};
use crate::storage::EntityStore;
use crate::Result;

/// A watch is a read request that stays registered.
pub type WatchRequest = ReadRequest;

/// Receives every changed result, or the cache miss that replaced it.
pub type WatchCallback = Box<dyn FnMut(&Result<ReadResult>) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WatchId(pub u64);

impl std::fmt::Display for WatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "watch#{}", self.0)
    }
}

/// A callback plus the result parked for it while it was busy.
struct Subscriber {
    callback: Mutex<WatchCallback>,
    pending: Mutex<Option<Result<ReadResult>>>,
}

struct Watch {
    request: WatchRequest,
    subscriber: Arc<Subscriber>,
    dependencies: DependencySet,
    last: Option<ReadResult>,
}

/// A result waiting to be handed to its callback.
pub struct Notification {
    pub watch: WatchId,
    subscriber: Arc<Subscriber>,
    result: Result<ReadResult>,
}

impl Notification {
    pub fn result(&self) -> &Result<ReadResult> {
        &self.result
    }

    /// Run the callback. Call only with the cache lock released.
    ///
    /// If the callback is already running (it mutated the cache and so
    /// re-triggered its own watch, or another thread is delivering), the
    /// result is parked and the running delivery picks it up when the
    /// current call returns.
    pub fn deliver(self) {
        let subscriber = self.subscriber;
        *subscriber.pending.lock() = Some(self.result);
        loop {
            let Some(mut callback) = subscriber.callback.try_lock() else {
                tracing::trace!(watch = %self.watch, "notification parked behind running callback");
                return;
            };
            let parked = subscriber.pending.lock().take();
            let Some(result) = parked else {
                drop(callback);
                // Parked after the take above but before the unlock.
                if subscriber.pending.lock().is_some() {
                    continue;
                }
                return;
            };
            let callback: &mut WatchCallback = &mut callback;
            callback(&result);
        }
    }
}

impl std::fmt::Debug for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notification")
            .field("watch", &self.watch)
            .field("ok", &self.result.is_ok())
            .finish()
    }
}

#[derive(Default)]
pub struct WatchRegistry {
    watches: BTreeMap<WatchId, Watch>,
    next_id: u64,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a watch and compute its first result. The returned
    /// notification carries that first result.
    pub fn register<S: EntityStore>(
        &mut self,
        store: &S,
        memo: &mut DependencyTracker,
        config: &CacheConfig,
        request: WatchRequest,
        callback: WatchCallback,
    ) -> (WatchId, Notification) {
        self.next_id += 1;
        let id = WatchId(self.next_id);
        let subscriber = Arc::new(Subscriber { callback: Mutex::new(callback), pending: Mutex::new(None) });
        let result = execution::read(store, memo, config, &request);
        let notification = Notification {
            watch: id,
            subscriber: subscriber.clone(),
            result: result.clone().check(request.completeness.unwrap_or(config.completeness)),
        };
        self.watches.insert(
            id,
            Watch { request, subscriber, dependencies: result.dependencies.clone(), last: Some(result) },
        );
        tracing::trace!(watch = %id, "watch registered");
        (id, notification)
    }

    pub fn remove(&mut self, id: WatchId) -> bool {
        self.watches.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.watches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }

    /// Root entities pinned by active watches.
    pub fn roots(&self) -> impl Iterator<Item = &EntityId> {
        self.watches.values().map(|w| &w.request.root)
    }

    /// Re-read every watch touched by `changes`. `force` re-reads all of
    /// them regardless (used after a snapshot restore).
    pub fn refresh<S: EntityStore>(
        &mut self,
        store: &S,
        memo: &mut DependencyTracker,
        config: &CacheConfig,
        changes: &DependencySet,
        force: bool,
    ) -> Vec<Notification> {
        let mut out = Vec::new();
        for (id, watch) in self.watches.iter_mut() {
            if !force && !watch.dependencies.touches(changes) {
                continue;
            }
            let result = execution::read(store, memo, config, &watch.request);
            watch.dependencies = result.dependencies.clone();
            let unchanged = watch
                .last
                .as_ref()
                .is_some_and(|last| last.data == result.data && last.missing == result.missing);
            if unchanged {
                continue;
            }
            let policy = watch.request.completeness.unwrap_or(config.completeness);
            out.push(Notification {
                watch: *id,
                subscriber: watch.subscriber.clone(),
                result: result.clone().check(policy),
            });
            watch.last = Some(result);
        }
        if !out.is_empty() {
            tracing::debug!(notified = out.len(), watches = self.watches.len(), "watch broadcast");
        }
        out
    }
}
