//! # Read Executor
//!
//! Rebuilds a result tree from the normalized store for one root entity and
//! one selection set, reusing memoized sub-results wherever their inputs
//! are unchanged.
//!
//! Two computations are memoized independently:
//!
//! 1. **Selection set against one object**: keyed by the object's store
//!    location (an entity, or an embedded object's path inside one), the
//!    selection id and the variables.
//! 2. **Selection against a list field**: keyed by the list's location,
//!    the element selection id and the variables.
//!
//! A reused child's dependency set is unioned into its parent, so every
//! entry lists everything it transitively read.

use std::collections::HashMap;
use std::sync::Arc;

use hashbrown::HashSet;
use serde::Serialize;
use serde_json::{Map, Value as Json};

use crate::config::{CacheConfig, CompletenessPolicy, CycleGuard};
use crate::memo::{Computed, DependencyTracker, Location, MemoKey, MemoKind};
use crate::model::value::reference_json;
use crate::model::*;
use crate::selection::{Selection, SelectionId, SelectionSet, Variables, fragment_matches, variables_key};
use crate::storage::EntityStore;
use crate::{Error, Result};

// ============================================================================
// Requests and results
// ============================================================================

/// What to read.
#[derive(Debug, Clone)]
pub struct ReadRequest {
    pub root: EntityId,
    pub selection: Arc<SelectionSet>,
    pub variables: Variables,
    /// Overrides the cache's configured policy when set.
    pub completeness: Option<CompletenessPolicy>,
}

impl ReadRequest {
    /// Read `selection` against `ROOT_QUERY`.
    pub fn new(selection: Arc<SelectionSet>) -> Self {
        Self {
            root: EntityId::root_query(),
            selection,
            variables: Variables::new(),
            completeness: None,
        }
    }

    pub fn root(mut self, root: impl Into<EntityId>) -> Self {
        self.root = root.into();
        self
    }

    pub fn variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    pub fn var(mut self, name: impl Into<String>, value: impl Into<Json>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn completeness(mut self, policy: CompletenessPolicy) -> Self {
        self.completeness = Some(policy);
        self
    }
}

/// Reference expansion cut short because the entity was already being
/// expanded higher up in the same read. The result holds `{"__ref": id}`
/// at that position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleNotice {
    pub entity: EntityId,
    pub selection: SelectionId,
}

/// A reconstructed result tree plus everything it read.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadResult {
    pub data: Json,
    pub dependencies: DependencySet,
    /// Data the store did not have. Empty for complete results.
    pub missing: Vec<MissingField>,
    pub cycles: Vec<CycleNotice>,
}

impl ReadResult {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// Apply a completeness policy: strict reads fail on any missing data.
    pub fn check(self, policy: CompletenessPolicy) -> Result<Self> {
        match policy {
            CompletenessPolicy::Strict if !self.is_complete() => {
                Err(Error::CacheMiss { missing: self.missing })
            }
            _ => Ok(self),
        }
    }
}

/// Run `request` against `store`, memoizing into `memo`. Never fails on
/// missing data; apply [`ReadResult::check`] for the completeness policy.
pub fn read<S: EntityStore>(
    store: &S,
    memo: &mut DependencyTracker,
    config: &CacheConfig,
    request: &ReadRequest,
) -> ReadResult {
    ReadExecutor::new(store, memo, config, &request.variables).run(&request.root, &request.selection)
}

// ============================================================================
// Executor
// ============================================================================

/// One top-level read. The in-progress set lives only as long as the read.
pub struct ReadExecutor<'a, S: EntityStore> {
    store: &'a S,
    memo: &'a mut DependencyTracker,
    variables: &'a Variables,
    vars_key: Arc<str>,
    caching: bool,
    cycle_guard: CycleGuard,
    possible_types: &'a HashMap<String, Vec<String>>,
    in_progress: HashSet<(EntityId, Option<SelectionId>)>,
    cycles: Vec<CycleNotice>,
}

impl<'a, S: EntityStore> ReadExecutor<'a, S> {
    pub fn new(
        store: &'a S,
        memo: &'a mut DependencyTracker,
        config: &'a CacheConfig,
        variables: &'a Variables,
    ) -> Self {
        Self {
            store,
            memo,
            variables,
            vars_key: variables_key(variables),
            caching: config.result_caching,
            cycle_guard: config.cycle_guard,
            possible_types: &config.possible_types,
            in_progress: HashSet::new(),
            cycles: Vec::new(),
        }
    }

    pub fn run(mut self, root: &EntityId, selection: &Arc<SelectionSet>) -> ReadResult {
        let computed = self.execute_entity(root, selection);
        let mut seen = HashSet::new();
        let missing = computed.missing.into_iter().filter(|m| seen.insert(m.clone())).collect();
        ReadResult {
            data: computed.value,
            dependencies: computed.dependencies,
            missing,
            cycles: self.cycles,
        }
    }

    /// Selection set against one normalized entity.
    fn execute_entity(&mut self, id: &EntityId, selection: &Arc<SelectionSet>) -> Computed {
        let guard = match self.cycle_guard {
            CycleGuard::SameSelection => (id.clone(), Some(selection.id())),
            CycleGuard::SameEntity => (id.clone(), None),
        };
        if self.in_progress.contains(&guard) {
            tracing::trace!(entity = %id, selection = %selection.id(), "cycle truncated to reference");
            self.cycles.push(CycleNotice { entity: id.clone(), selection: selection.id() });
            let mut dependencies = DependencySet::new();
            dependencies.insert_entity(id);
            return Computed { value: reference_json(id), dependencies, missing: Vec::new() };
        }

        let key = MemoKey::new(Location::entity(id.clone()), selection.id(), self.vars_key.clone());
        if let Some(hit) = self.reuse(MemoKind::Selection, &key) {
            return hit;
        }

        let cycles_before = self.cycles.len();
        self.in_progress.insert(guard.clone());

        let mut computed = Computed::default();
        computed.dependencies.insert_entity(id);
        let store = self.store;
        match store.get(id) {
            Some(record) => {
                let mut out = Map::new();
                self.execute_fields(
                    &record.fields,
                    record.typename(),
                    &Location::entity(id.clone()),
                    selection,
                    &mut out,
                    &mut computed,
                );
                computed.value = Json::Object(out);
            }
            None => {
                computed.missing.push(MissingField::entity(id.clone()));
                computed.value = Json::Null;
            }
        }

        self.in_progress.remove(&guard);
        self.remember(MemoKind::Selection, key, &computed, cycles_before);
        computed
    }

    /// Selection set against an embedded object. Its only dependency of its
    /// own is the top-level field it is stored under.
    fn execute_embedded(
        &mut self,
        object: &'a EmbeddedObject,
        selection: &Arc<SelectionSet>,
        location: Location,
    ) -> Computed {
        let key = MemoKey::new(location.clone(), selection.id(), self.vars_key.clone());
        if let Some(hit) = self.reuse(MemoKind::Selection, &key) {
            return hit;
        }
        let cycles_before = self.cycles.len();

        let mut computed = Computed::default();
        computed.dependencies.insert(location.owner_dependency());
        let mut out = Map::new();
        self.execute_fields(&object.fields, object.typename(), &location, selection, &mut out, &mut computed);
        computed.value = Json::Object(out);

        self.remember(MemoKind::Selection, key, &computed, cycles_before);
        computed
    }

    /// Element selection against every item of a list field.
    fn execute_list(
        &mut self,
        items: &'a [StoreValue],
        selection: &Arc<SelectionSet>,
        location: Location,
    ) -> Computed {
        let key = MemoKey::new(location.clone(), selection.id(), self.vars_key.clone());
        if let Some(hit) = self.reuse(MemoKind::List, &key) {
            return hit;
        }
        let cycles_before = self.cycles.len();

        let mut computed = Computed::default();
        computed.dependencies.insert(location.owner_dependency());
        let mut values = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            values.push(self.resolve_value(item, Some(selection), location.index(i), &mut computed));
        }
        computed.value = Json::Array(values);

        self.remember(MemoKind::List, key, &computed, cycles_before);
        computed
    }

    fn execute_fields(
        &mut self,
        fields: &'a hashbrown::HashMap<StoreKey, StoreValue>,
        typename: Option<&str>,
        location: &Location,
        selection: &SelectionSet,
        out: &mut Map<String, Json>,
        acc: &mut Computed,
    ) {
        for item in selection.selections() {
            match item {
                Selection::Field(field) => {
                    let key = field.store_key(self.variables);
                    if location.is_entity() {
                        acc.dependencies.insert_field(&location.entity, &key);
                    }
                    match fields.get(&key) {
                        Some(value) => {
                            let resolved = self.resolve_value(
                                value,
                                field.selection(),
                                location.field(key),
                                acc,
                            );
                            out.insert(field.response_key().to_string(), resolved);
                        }
                        None if location.is_entity() => {
                            acc.missing.push(MissingField::field(location.entity.clone(), key));
                        }
                        None => acc.missing.push(MissingField::nested(
                            location.entity.clone(),
                            location.path_string(),
                            key,
                        )),
                    }
                }
                Selection::InlineFragment { type_condition, selection } => {
                    if fragment_matches(type_condition.as_deref(), typename, self.possible_types) {
                        self.execute_fields(fields, typename, location, selection, out, acc);
                    }
                }
            }
        }
    }

    fn resolve_value(
        &mut self,
        value: &'a StoreValue,
        selection: Option<&Arc<SelectionSet>>,
        location: Location,
        acc: &mut Computed,
    ) -> Json {
        let child = match (value, selection) {
            (StoreValue::Scalar(v), _) => return v.clone(),
            (StoreValue::Reference(id), Some(sel)) => self.execute_entity(id, sel),
            (StoreValue::List(items), Some(sel)) => self.execute_list(items, sel, location),
            (StoreValue::Object(object), Some(sel)) => self.execute_embedded(object, sel, location),
            (other, None) => {
                // Bare references still pin their targets, so the result is
                // invalidated if a referenced entity goes away.
                for id in other.references() {
                    acc.dependencies.insert_entity(id);
                }
                return other.to_json();
            }
        };
        acc.dependencies.extend(&child.dependencies);
        acc.missing.extend(child.missing.iter().cloned());
        child.value
    }

    /// A memoized result, if one may stand in for recomputing here.
    ///
    /// Under [`CycleGuard::SameEntity`] an entry that expanded any entity
    /// now in progress was built from a different starting point; a fresh
    /// computation would truncate at that entity, so the entry is skipped
    /// and cold and warm reads agree.
    fn reuse(&self, kind: MemoKind, key: &MemoKey) -> Option<Computed> {
        if !self.caching {
            return None;
        }
        let hit = self.memo.lookup(kind, key)?;
        let crosses_read_path = self.cycle_guard == CycleGuard::SameEntity
            && self.in_progress.iter().any(|(entity, _)| hit.dependencies.mentions(entity));
        (!crosses_read_path).then(|| hit.clone())
    }

    /// Memoize unless a cycle was truncated underneath: such results depend
    /// on where the read started and must not be reused elsewhere.
    fn remember(&mut self, kind: MemoKind, key: MemoKey, computed: &Computed, cycles_before: usize) {
        if self.caching && self.cycles.len() == cycles_before {
            self.memo.insert(kind, key, computed.clone());
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::FieldSelection;
    use crate::storage::MemoryStore;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn store_with_chat() -> MemoryStore {
        let mut store = MemoryStore::new();
        let root = EntityId::root_query();
        store.write(&root, r#"chat({"id":1})"#.into(), StoreValue::Reference("Chat:1".into()));
        let chat = EntityId::from("Chat:1");
        store.write(&chat, "__typename".into(), "Chat".into());
        store.write(&chat, "name".into(), "general".into());
        store.write(
            &chat,
            "members".into(),
            StoreValue::List(vec![
                StoreValue::Reference("User:1".into()),
                StoreValue::Reference("User:2".into()),
            ]),
        );
        for (id, name) in [("User:1", "Ada"), ("User:2", "Grace")] {
            let user = EntityId::from(id);
            store.write(&user, "__typename".into(), "User".into());
            store.write(&user, "name".into(), name.into());
        }
        store
    }

    fn chat_query() -> Arc<SelectionSet> {
        let user = SelectionSet::fields(["name"]);
        let chat = SelectionSet::builder().field("name").nested("members", user).build();
        SelectionSet::builder()
            .push(FieldSelection::new("chat").var("id", "id").select(chat))
            .build()
    }

    fn request(selection: Arc<SelectionSet>) -> ReadRequest {
        ReadRequest::new(selection).var("id", 1)
    }

    #[test]
    fn test_reads_nested_result() {
        let store = store_with_chat();
        let mut memo = DependencyTracker::new();
        let result = read(&store, &mut memo, &CacheConfig::default(), &request(chat_query()));

        assert_eq!(
            result.data,
            json!({ "chat": { "name": "general", "members": [{ "name": "Ada" }, { "name": "Grace" }] } })
        );
        assert!(result.is_complete());
        assert!(result.dependencies.contains(&Dependency::field("User:2".into(), "name".into())));
        assert!(memo.selection_len() > 0);
        assert_eq!(memo.list_len(), 1);
    }

    #[test]
    fn test_second_read_reuses_memo() {
        let store = store_with_chat();
        let mut memo = DependencyTracker::new();
        let query = chat_query();
        let config = CacheConfig::default();

        let first = read(&store, &mut memo, &config, &request(query.clone()));
        let stats = memo.stats();
        let second = read(&store, &mut memo, &config, &request(query));

        assert_eq!(first, second);
        assert_eq!(memo.stats(), stats);
    }

    #[test]
    fn test_missing_field_reported_and_strict_fails() {
        let store = store_with_chat();
        let mut memo = DependencyTracker::new();
        let user = SelectionSet::fields(["name", "email"]);
        let chat = SelectionSet::builder().nested("members", user).build();
        let query = SelectionSet::builder()
            .push(FieldSelection::new("chat").arg("id", 1).select(chat))
            .build();

        let result = read(&store, &mut memo, &CacheConfig::default(), &ReadRequest::new(query));
        assert_eq!(result.missing.len(), 2);
        assert_eq!(result.data["chat"]["members"][0], json!({ "name": "Ada" }));

        assert!(result.clone().check(CompletenessPolicy::Partial).is_ok());
        assert!(matches!(
            result.check(CompletenessPolicy::Strict),
            Err(Error::CacheMiss { missing }) if missing.len() == 2
        ));
    }

    #[test]
    fn test_missing_root_entity() {
        let store = MemoryStore::new();
        let mut memo = DependencyTracker::new();
        let result = read(&store, &mut memo, &CacheConfig::default(), &ReadRequest::new(SelectionSet::fields(["x"])));
        assert_eq!(result.data, Json::Null);
        assert_eq!(result.missing, vec![MissingField::entity(EntityId::root_query())]);
    }

    #[test]
    fn test_cycle_truncated_with_same_entity_guard() {
        let mut store = MemoryStore::new();
        let a = EntityId::from("Node:a");
        let b = EntityId::from("Node:b");
        store.write(&a, "next".into(), StoreValue::Reference(b.clone()));
        store.write(&b, "next".into(), StoreValue::Reference(a.clone()));
        store.write(&EntityId::root_query(), "head".into(), StoreValue::Reference(a.clone()));

        let leaf = SelectionSet::fields(["next"]);
        let mid = SelectionSet::builder().nested("next", leaf).build();
        let inner = SelectionSet::builder().nested("next", mid).build();
        let query = SelectionSet::builder().nested("head", inner).build();

        let config = CacheConfig { cycle_guard: CycleGuard::SameEntity, ..CacheConfig::default() };
        let mut memo = DependencyTracker::new();
        let result = read(&store, &mut memo, &config, &ReadRequest::new(query));

        assert_eq!(result.data, json!({ "head": { "next": { "next": { "__ref": "Node:a" } } } }));
        assert_eq!(result.cycles.len(), 1);
        assert_eq!(result.cycles[0].entity, a);
        // Results built around a truncation are not memoized.
        assert_eq!(memo.selection_len(), 0);
    }

    #[test]
    fn test_same_entity_truncation_does_not_depend_on_warm_memo() {
        let mut store = MemoryStore::new();
        let a = EntityId::from("Node:a");
        let b = EntityId::from("Node:b");
        store.write(&a, "name".into(), "A".into());
        store.write(&b, "name".into(), "B".into());
        store.write(&a, "next".into(), StoreValue::Reference(b.clone()));
        store.write(&b, "next".into(), StoreValue::Reference(a.clone()));
        store.write(&EntityId::root_query(), "head".into(), StoreValue::Reference(a.clone()));

        let leaf = SelectionSet::fields(["name"]);
        let inner = SelectionSet::builder().nested("next", leaf).build();
        let outer = SelectionSet::builder().nested("next", inner.clone()).build();
        let query = SelectionSet::builder().nested("head", outer).build();
        let config = CacheConfig { cycle_guard: CycleGuard::SameEntity, ..CacheConfig::default() };

        let mut cold_memo = DependencyTracker::new();
        let cold = read(&store, &mut cold_memo, &config, &ReadRequest::new(query.clone()));
        assert_eq!(cold.data, json!({ "head": { "next": { "next": { "__ref": "Node:a" } } } }));

        // Memoize Node:b under the inner selection from a different root.
        let mut warm_memo = DependencyTracker::new();
        let from_b = read(&store, &mut warm_memo, &config, &ReadRequest::new(inner).root(b));
        assert_eq!(from_b.data, json!({ "next": { "name": "A" } }));

        let warm = read(&store, &mut warm_memo, &config, &ReadRequest::new(query));
        assert_eq!(warm.data, cold.data);
        assert_eq!(warm.cycles, cold.cycles);
    }

    #[test]
    fn test_embedded_objects_depend_on_parent_field() {
        let mut store = MemoryStore::new();
        let user = EntityId::from("User:1");
        store.write(
            &user,
            "address".into(),
            StoreValue::Object(EmbeddedObject::new().with_field("city", "Paris")),
        );
        store.write(&EntityId::root_query(), "me".into(), StoreValue::Reference(user.clone()));

        let query = SelectionSet::builder()
            .nested("me", SelectionSet::builder().nested("address", SelectionSet::fields(["city"])).build())
            .build();
        let mut memo = DependencyTracker::new();
        let result = read(&store, &mut memo, &CacheConfig::default(), &ReadRequest::new(query));

        assert_eq!(result.data, json!({ "me": { "address": { "city": "Paris" } } }));
        assert!(result.dependencies.contains(&Dependency::field(user, "address".into())));
    }

    #[test]
    fn test_missing_field_in_embedded_object_names_its_path() {
        let mut store = MemoryStore::new();
        let user = EntityId::from("User:1");
        store.write(
            &user,
            "address".into(),
            StoreValue::Object(EmbeddedObject::new().with_field("city", "Paris")),
        );
        store.write(&EntityId::root_query(), "me".into(), StoreValue::Reference(user.clone()));

        let address = SelectionSet::fields(["city", "zip"]);
        let query = SelectionSet::builder()
            .nested("me", SelectionSet::builder().field("email").nested("address", address).build())
            .build();
        let mut memo = DependencyTracker::new();
        let result = read(&store, &mut memo, &CacheConfig::default(), &ReadRequest::new(query));

        assert_eq!(
            result.missing,
            vec![
                MissingField::field(user.clone(), "email".into()),
                MissingField::nested(user, "address", "zip".into()),
            ]
        );
        assert_eq!(result.missing[1].to_string(), "missing field 'zip' on User:1.address");
    }

    #[test]
    fn test_inline_fragment_by_typename() {
        let store = store_with_chat();
        let mut memo = DependencyTracker::new();
        let member = SelectionSet::builder()
            .on("User", SelectionSet::fields(["name"]))
            .on("Bot", SelectionSet::fields(["model"]))
            .build();
        let query = SelectionSet::builder()
            .push(FieldSelection::new("chat").arg("id", 1).select(SelectionSet::builder().nested("members", member).build()))
            .build();

        let result = read(&store, &mut memo, &CacheConfig::default(), &ReadRequest::new(query));
        assert!(result.is_complete());
        assert_eq!(result.data["chat"]["members"][1], json!({ "name": "Grace" }));
    }

    #[test]
    fn test_result_caching_disabled() {
        let store = store_with_chat();
        let mut memo = DependencyTracker::new();
        let config = CacheConfig { result_caching: false, ..CacheConfig::default() };
        read(&store, &mut memo, &config, &request(chat_query()));
        assert_eq!(memo.selection_len(), 0);
        assert_eq!(memo.list_len(), 0);
    }
}
