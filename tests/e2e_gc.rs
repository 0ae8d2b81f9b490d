//! End-to-end tests for eviction and garbage collection.
//!
//! The central scenario loads a chat with ten messages, each carrying an
//! author, ten reactions and ten viewers, reads it back so both memo tables
//! fill up, then evicts the query root and collects. Nothing may survive:
//! not the entities, and not a single memo entry.

use std::sync::Arc;

use normcache::{Cache, EntityId, ReadRequest, Selection, SelectionSet, Variables};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

// ============================================================================
// Fixtures
// ============================================================================

fn user_fields() -> Arc<SelectionSet> {
    SelectionSet::fields(["id", "name"])
}

fn chat_query() -> Arc<SelectionSet> {
    let user = SelectionSet::new(vec![Selection::on("User", user_fields())]);
    let reaction = SelectionSet::builder()
        .field("id")
        .field("type")
        .nested("author", user.clone())
        .build();
    let message = SelectionSet::builder()
        .field("id")
        .nested("author", user.clone())
        .nested("reactions", reaction)
        .nested("viewedBy", user.clone())
        .build();
    let chat = SelectionSet::builder()
        .field("id")
        .field("name")
        .nested("members", user)
        .nested("messages", message)
        .build();
    SelectionSet::builder()
        .push(Selection::field("chat").var("id", "id").select(chat))
        .build()
}

struct Ids(usize);

impl Ids {
    fn next(&mut self, label: &str) -> String {
        self.0 += 1;
        format!("{label}-{}", self.0)
    }

    fn user(&mut self) -> Value {
        let id = self.next("User");
        json!({ "__typename": "User", "id": id, "name": format!("{id}.name") })
    }
}

fn chat_response() -> Value {
    let mut ids = Ids(0);
    let members: Vec<Value> = (0..10).map(|_| ids.user()).collect();
    let messages: Vec<Value> = (0..10)
        .map(|_| {
            let reactions: Vec<Value> = (0..10)
                .map(|_| {
                    json!({
                        "__typename": "Reaction",
                        "id": ids.next("Reaction"),
                        "type": ids.next("Reaction.type"),
                        "author": ids.user(),
                    })
                })
                .collect();
            let viewed_by: Vec<Value> = (0..10).map(|_| ids.user()).collect();
            json!({
                "__typename": "Message",
                "id": ids.next("Message"),
                "author": ids.user(),
                "reactions": reactions,
                "viewedBy": viewed_by,
            })
        })
        .collect();

    json!({
        "chat": {
            "__typename": "Chat",
            "id": "1",
            "name": "1",
            "members": members,
            "messages": messages,
        }
    })
}

fn loaded_cache() -> (Cache, ReadRequest) {
    let cache = Cache::open_memory();
    let query = chat_query();
    let mut vars = Variables::new();
    vars.insert("id".into(), json!("1"));

    cache
        .write_query("ROOT_QUERY", &query, &vars, &chat_response())
        .unwrap();
    let request = ReadRequest::new(query).variables(vars);
    (cache, request)
}

// ============================================================================
// 1. Evicting the root and collecting empties both memo tables
// ============================================================================

#[test]
fn test_evict_root_then_gc_empties_memo_caches() {
    let (cache, request) = loaded_cache();

    let result = cache.read(&request).unwrap();
    assert_eq!(result.data["chat"]["messages"].as_array().unwrap().len(), 10);
    assert!(cache.selection_cache_size() > 0);
    assert!(cache.list_cache_size() > 0);

    assert!(cache.evict(EntityId::root_query()));
    let removed = cache.gc();

    assert!(removed > 0);
    assert_eq!(cache.entity_count(), 0);
    assert_eq!(cache.selection_cache_size(), 0);
    assert_eq!(cache.list_cache_size(), 0);
    assert_eq!(cache.memo_stats().indexed_dependencies, 0);
}

// ============================================================================
// 2. Evicting only marks stale; the memory goes at the next collection
// ============================================================================

#[test]
fn test_evict_marks_stale_until_gc() {
    let (cache, request) = loaded_cache();
    cache.read(&request).unwrap();
    let before = cache.memo_stats();
    assert_eq!(before.stale_entries, 0);

    cache.evict(EntityId::root_query());
    let after = cache.memo_stats();
    assert!(after.stale_entries > 0);
    assert_eq!(
        after.selection_entries + after.list_entries,
        before.selection_entries + before.list_entries
    );

    cache.gc();
    assert_eq!(cache.memo_stats().stale_entries, 0);
}

// ============================================================================
// 3. Re-reading after eviction of one entity
// ============================================================================

#[test]
fn test_read_after_evicting_nested_entity_is_a_miss() {
    let (cache, request) = loaded_cache();
    let result = cache.read(&request).unwrap();
    let third = format!("Message:{}", result.data["chat"]["messages"][3]["id"].as_str().unwrap());

    assert!(cache.evict(third.as_str()));
    assert!(!cache.evict(third.as_str()));
    let err = cache.read(&request).unwrap_err();
    assert!(matches!(err, normcache::Error::CacheMiss { .. }));

    // Partial reads still produce every other message.
    let partial = cache
        .read(&request.clone().completeness(normcache::CompletenessPolicy::Partial))
        .unwrap();
    let messages = partial.data["chat"]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 10);
    assert_eq!(partial.missing, vec![normcache::MissingField::entity(third.into())]);
}

// ============================================================================
// 4. Entities only referenced by an evicted one are collected
// ============================================================================

#[test]
fn test_gc_collects_entities_orphaned_by_eviction() {
    let cache = Cache::open_memory();
    cache
        .write(
            "ROOT_QUERY",
            &json!({
                "post": {
                    "__typename": "Post",
                    "id": 1,
                    "author": { "__typename": "User", "id": 7, "name": "Ada" }
                },
                "me": { "__typename": "User", "id": 8, "name": "Grace" }
            }),
        )
        .unwrap();
    assert_eq!(cache.entity_count(), 4);

    cache.evict("Post:1");
    assert_eq!(cache.entity_count(), 3);

    let report = cache.gc_with(std::iter::empty(), |_| false);
    assert_eq!(report.removed, vec![EntityId::from("User:7")]);
    assert!(cache.record("User:8").is_some());
}

// ============================================================================
// 5. Retained ids and watch roots survive collection
// ============================================================================

#[test]
fn test_retained_and_watched_roots_survive_gc() {
    let cache = Cache::open_memory();
    cache.write("User:1", &json!({ "__typename": "User", "name": "Ada" })).unwrap();
    cache.write("User:2", &json!({ "__typename": "User", "name": "Grace" })).unwrap();
    cache.write("User:3", &json!({ "__typename": "User", "name": "Edsger" })).unwrap();

    cache.retain("User:1");
    let watch = cache.watch(
        ReadRequest::new(SelectionSet::fields(["name"])).root("User:2"),
        |_| {},
    );

    assert_eq!(cache.gc(), 1);
    assert!(cache.record("User:1").is_some());
    assert!(cache.record("User:2").is_some());
    assert!(cache.record("User:3").is_none());

    cache.release("User:1");
    cache.unwatch(watch);
    assert_eq!(cache.gc(), 2);
    assert_eq!(cache.entity_count(), 0);
}

// ============================================================================
// 6. Liveness predicate
// ============================================================================

#[test]
fn test_gc_with_liveness_predicate() {
    let cache = Cache::open_memory();
    cache.write("Draft:1", &json!({ "body": "a" })).unwrap();
    cache.write("Draft:2", &json!({ "body": "b" })).unwrap();

    let report = cache.gc_with(std::iter::empty(), |id| id.as_str() == "Draft:2");
    assert_eq!(report.removed, vec![EntityId::from("Draft:1")]);

    let report = cache.gc_with([EntityId::from("Draft:2")], |_| false);
    assert!(report.removed.is_empty());
}

#[test]
fn test_live_ids_keep_what_they_reference() {
    let cache = Cache::open_memory();
    cache
        .write("Draft:1", &json!({ "author": { "__typename": "User", "id": 1, "name": "Ada" } }))
        .unwrap();
    cache.write("User:2", &json!({ "__typename": "User", "name": "Grace" })).unwrap();

    let report = cache.gc_with(std::iter::empty(), |id| id.as_str() == "Draft:1");
    assert_eq!(report.removed, vec![EntityId::from("User:2")]);
    assert!(cache.record("Draft:1").is_some());
    assert!(cache.record("User:1").is_some());
}

// ============================================================================
// 7. Field eviction
// ============================================================================

#[test]
fn test_evict_field_invalidates_readers() {
    let cache = Cache::open_memory();
    cache
        .write("ROOT_QUERY", &json!({ "me": { "__typename": "User", "id": 1, "name": "Ada", "age": 36 } }))
        .unwrap();
    let query = SelectionSet::builder().nested("me", SelectionSet::fields(["name"])).build();
    let request = ReadRequest::new(query);
    cache.read(&request).unwrap();

    assert_eq!(cache.evict_field("User:1", "age", None), 1);
    assert_eq!(cache.memo_stats().stale_entries, 0);

    assert_eq!(cache.evict_field("User:1", "name", None), 1);
    assert!(cache.read(&request).is_err());
}
