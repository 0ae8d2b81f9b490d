//! End-to-end tests for watches and reactive variables.

use std::sync::Arc;

use normcache::{Cache, EntityId, Error, ReactiveVar, ReadRequest, ReadResult, SelectionSet, Snapshot};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

type Log = Arc<Mutex<Vec<Result<Value, String>>>>;

fn recorder() -> (Log, impl FnMut(&normcache::Result<ReadResult>) + Send + 'static) {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let callback = move |result: &normcache::Result<ReadResult>| {
        let entry = match result {
            Ok(r) => Ok(r.data.clone()),
            Err(Error::CacheMiss { missing }) => Err(missing[0].to_string()),
            Err(e) => Err(e.to_string()),
        };
        sink.lock().push(entry);
    };
    (log, callback)
}

fn me_query() -> ReadRequest {
    ReadRequest::new(SelectionSet::builder().nested("me", SelectionSet::fields(["name"])).build())
}

fn seeded() -> Cache {
    let cache = Cache::open_memory();
    cache
        .write("ROOT_QUERY", &json!({ "me": { "__typename": "User", "id": 1, "name": "Ada" }, "count": 0 }))
        .unwrap();
    cache
}

// ============================================================================
// 1. First result, then only real changes
// ============================================================================

#[test]
fn test_watch_receives_changes_only() {
    let cache = seeded();
    let (log, callback) = recorder();
    cache.watch(me_query(), callback);
    assert_eq!(log.lock().len(), 1);

    // Same value: nothing changed, nothing delivered.
    cache.write("User:1", &json!({ "name": "Ada" })).unwrap();
    // Unrelated field.
    cache.write("ROOT_QUERY", &json!({ "count": 1 })).unwrap();
    assert_eq!(log.lock().len(), 1);

    cache.write("User:1", &json!({ "name": "Grace" })).unwrap();
    assert_eq!(
        *log.lock(),
        vec![Ok(json!({ "me": { "name": "Ada" } })), Ok(json!({ "me": { "name": "Grace" } }))]
    );
}

// ============================================================================
// 2. One broadcast per transaction
// ============================================================================

#[test]
fn test_transaction_broadcasts_once() {
    let cache = seeded();
    let (log, callback) = recorder();
    cache.watch(me_query(), callback);

    cache
        .transaction(|tx| {
            tx.write("User:1", &json!({ "name": "B" }))?;
            tx.write("User:1", &json!({ "name": "C" }))?;
            Ok(())
        })
        .unwrap();

    let log = log.lock();
    assert_eq!(log.len(), 2);
    assert_eq!(log[1], Ok(json!({ "me": { "name": "C" } })));
}

// ============================================================================
// 3. Evicting watched data delivers the miss
// ============================================================================

#[test]
fn test_evicted_dependency_delivers_cache_miss() {
    let cache = seeded();
    let (log, callback) = recorder();
    cache.watch(me_query(), callback);

    cache.evict("User:1");
    let log = log.lock();
    assert_eq!(log.len(), 2);
    assert_eq!(log[1], Err("missing entity User:1".to_string()));
}

// ============================================================================
// 4. Unwatch stops delivery
// ============================================================================

#[test]
fn test_unwatch_stops_notifications() {
    let cache = seeded();
    let (log, callback) = recorder();
    let id = cache.watch(me_query(), callback);

    assert!(cache.unwatch(id));
    assert!(!cache.unwatch(id));
    cache.write("User:1", &json!({ "name": "Grace" })).unwrap();
    assert_eq!(log.lock().len(), 1);
}

// ============================================================================
// 5. Callbacks may use the cache
// ============================================================================

#[test]
fn test_callback_can_write_to_cache() {
    let cache = Arc::new(seeded());
    let inner = cache.clone();
    let calls = Arc::new(Mutex::new(0));
    let counter = calls.clone();

    cache.watch(me_query(), move |result| {
        *counter.lock() += 1;
        if let Ok(r) = result {
            // Mirror the name somewhere the watch does not read.
            let name = r.data["me"]["name"].clone();
            inner.write("ROOT_QUERY", &json!({ "lastSeen": name })).unwrap();
        }
    });
    cache.write("User:1", &json!({ "name": "Grace" })).unwrap();

    assert_eq!(*calls.lock(), 2);
    let root = cache.record(EntityId::root_query()).unwrap();
    assert_eq!(root.get(&"lastSeen".into()), Some(&normcache::StoreValue::from("Grace")));
}

#[test]
fn test_callback_write_to_watched_field_is_delivered() {
    let cache = Arc::new(seeded());
    let inner = cache.clone();
    let (log, mut record) = recorder();

    cache.watch(me_query(), move |result| {
        record(result);
        if let Ok(r) = result {
            if r.data["me"]["name"] == "Grace" {
                inner.write("User:1", &json!({ "name": "Hopper" })).unwrap();
            }
        }
    });
    cache.write("User:1", &json!({ "name": "Grace" })).unwrap();

    assert_eq!(
        *log.lock(),
        vec![
            Ok(json!({ "me": { "name": "Ada" } })),
            Ok(json!({ "me": { "name": "Grace" } })),
            Ok(json!({ "me": { "name": "Hopper" } })),
        ]
    );
}

// ============================================================================
// 6. Restore re-reads every watch
// ============================================================================

#[test]
fn test_restore_refreshes_watches() {
    let cache = seeded();
    let (log, callback) = recorder();
    cache.watch(me_query(), callback);

    let other = Cache::open_memory();
    other
        .write("ROOT_QUERY", &json!({ "me": { "__typename": "User", "id": 2, "name": "Edsger" } }))
        .unwrap();
    cache.restore(other.extract());

    assert_eq!(log.lock().last(), Some(&Ok(json!({ "me": { "name": "Edsger" } }))));

    cache.restore(Snapshot::default());
    assert_eq!(log.lock().last(), Some(&Err("missing entity ROOT_QUERY".to_string())));
}

// ============================================================================
// 7. Reactive variables
// ============================================================================

#[test]
fn test_reactive_var_feeds_cache_writes() {
    let cache = Arc::new(seeded());
    let filter = ReactiveVar::new("all".to_string());

    let sink = cache.clone();
    let mute = filter.on_next_change(move |value| {
        sink.write("ROOT_QUERY", &json!({ "filter": value })).unwrap();
    });

    assert!(filter.set("done".to_string()));
    assert_eq!(filter.get(), "done");
    let root = cache.record(EntityId::root_query()).unwrap();
    assert_eq!(root.get(&"filter".into()), Some(&normcache::StoreValue::from("done")));

    // Already fired, so there is nothing left to mute.
    assert!(!mute.mute());
    assert_eq!(filter.listener_count(), 0);
}
