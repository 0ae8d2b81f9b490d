//! # Selection Trees
//!
//! The parsed query shape the cache reads and writes against. Producing
//! these trees from query text belongs to the query-language layer; the
//! cache only needs field names, arguments, aliases, nested selections and
//! type conditions.
//!
//! Every `SelectionSet` gets a process-unique [`SelectionId`] when it is
//! built. Memo keys use that id, so callers must keep the `Arc` around and
//! pass the same tree on repeated reads for memoization to be effective.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::model::StoreKey;

static NEXT_SELECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Variable bindings for one operation. Ordered so that the serialized
/// form is canonical.
pub type Variables = BTreeMap<String, serde_json::Value>;

/// Canonical serialization of a variable map, used inside memo keys.
pub fn variables_key(vars: &Variables) -> Arc<str> {
    Arc::from(serde_json::to_string(vars).unwrap_or_default())
}

/// Identity of one selection set node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SelectionId(pub u64);

impl std::fmt::Display for SelectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A set of selections against one object.
#[derive(Debug)]
pub struct SelectionSet {
    id: SelectionId,
    selections: Vec<Selection>,
}

/// One entry of a selection set.
#[derive(Debug, Clone)]
pub enum Selection {
    Field(FieldSelection),
    /// `... on Type { ... }`; no condition means "always applies".
    InlineFragment {
        type_condition: Option<String>,
        selection: Arc<SelectionSet>,
    },
}

/// A field argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Literal(serde_json::Value),
    /// Bound from the operation variables. Unbound variables omit the argument.
    Variable(String),
}

/// A selected field.
#[derive(Debug, Clone)]
pub struct FieldSelection {
    name: String,
    alias: Option<String>,
    arguments: Vec<(String, Argument)>,
    selection: Option<Arc<SelectionSet>>,
    /// Precomputed storage key when no argument depends on variables.
    fixed_key: Option<StoreKey>,
}

impl SelectionSet {
    pub fn new(selections: Vec<Selection>) -> Arc<Self> {
        let id = SelectionId(NEXT_SELECTION_ID.fetch_add(1, Ordering::Relaxed));
        Arc::new(Self { id, selections })
    }

    pub fn builder() -> SelectionSetBuilder {
        SelectionSetBuilder::default()
    }

    /// Shorthand for a set of plain scalar fields.
    pub fn fields<'a>(names: impl IntoIterator<Item = &'a str>) -> Arc<Self> {
        Self::new(names.into_iter().map(|n| Selection::Field(FieldSelection::new(n))).collect())
    }

    pub fn id(&self) -> SelectionId {
        self.id
    }

    pub fn selections(&self) -> &[Selection] {
        &self.selections
    }

    pub fn is_empty(&self) -> bool {
        self.selections.is_empty()
    }
}

impl FieldSelection {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let fixed_key = Some(StoreKey::new(&name));
        Self { name, alias: None, arguments: Vec::new(), selection: None, fixed_key }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn arg(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.arguments.push((name.into(), Argument::Literal(value.into())));
        self.refresh_fixed_key();
        self
    }

    pub fn var(mut self, name: impl Into<String>, variable: impl Into<String>) -> Self {
        self.arguments.push((name.into(), Argument::Variable(variable.into())));
        self.refresh_fixed_key();
        self
    }

    pub fn select(mut self, selection: Arc<SelectionSet>) -> Self {
        self.selection = Some(selection);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key of this field in the result tree (alias if present).
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn arguments(&self) -> &[(String, Argument)] {
        &self.arguments
    }

    pub fn selection(&self) -> Option<&Arc<SelectionSet>> {
        self.selection.as_ref()
    }

    /// Storage key for this field under the given variables.
    pub fn store_key(&self, vars: &Variables) -> StoreKey {
        if let Some(key) = &self.fixed_key {
            return key.clone();
        }
        StoreKey::with_args(&self.name, &self.bind_arguments(vars))
    }

    /// Resolve arguments against `vars`. Unbound variables are left out.
    pub fn bind_arguments(&self, vars: &Variables) -> BTreeMap<String, serde_json::Value> {
        let mut bound = BTreeMap::new();
        for (name, arg) in &self.arguments {
            match arg {
                Argument::Literal(v) => {
                    bound.insert(name.clone(), v.clone());
                }
                Argument::Variable(var) => {
                    if let Some(v) = vars.get(var) {
                        bound.insert(name.clone(), v.clone());
                    }
                }
            }
        }
        bound
    }

    fn refresh_fixed_key(&mut self) {
        let all_literal = self.arguments.iter().all(|(_, a)| matches!(a, Argument::Literal(_)));
        self.fixed_key = all_literal.then(|| StoreKey::with_args(&self.name, &self.bind_arguments(&Variables::new())));
    }
}

impl Selection {
    pub fn field(name: impl Into<String>) -> FieldSelection {
        FieldSelection::new(name)
    }

    pub fn on(type_condition: impl Into<String>, selection: Arc<SelectionSet>) -> Self {
        Selection::InlineFragment { type_condition: Some(type_condition.into()), selection }
    }
}

impl From<FieldSelection> for Selection {
    fn from(f: FieldSelection) -> Self { Selection::Field(f) }
}

// ============================================================================
// Builder
// ============================================================================

#[derive(Debug, Default)]
pub struct SelectionSetBuilder {
    selections: Vec<Selection>,
}

impl SelectionSetBuilder {
    /// A plain scalar field.
    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.selections.push(Selection::Field(FieldSelection::new(name)));
        self
    }

    /// A field with a nested selection.
    pub fn nested(mut self, name: impl Into<String>, selection: Arc<SelectionSet>) -> Self {
        self.selections.push(Selection::Field(FieldSelection::new(name).select(selection)));
        self
    }

    pub fn push(mut self, selection: impl Into<Selection>) -> Self {
        self.selections.push(selection.into());
        self
    }

    pub fn on(mut self, type_condition: impl Into<String>, selection: Arc<SelectionSet>) -> Self {
        self.selections.push(Selection::on(type_condition, selection));
        self
    }

    pub fn build(self) -> Arc<SelectionSet> {
        SelectionSet::new(self.selections)
    }
}

// ============================================================================
// Type conditions
// ============================================================================

/// Whether a fragment with `type_condition` applies to an object of
/// `typename`. `possible_types` maps supertypes to their subtypes.
pub fn fragment_matches(
    type_condition: Option<&str>,
    typename: Option<&str>,
    possible_types: &HashMap<String, Vec<String>>,
) -> bool {
    let Some(cond) = type_condition else { return true };
    let Some(typename) = typename else { return false };
    if cond == typename {
        return true;
    }
    let mut stack = vec![cond];
    let mut seen = Vec::new();
    while let Some(supertype) = stack.pop() {
        if seen.contains(&supertype) {
            continue;
        }
        seen.push(supertype);
        if let Some(subtypes) = possible_types.get(supertype) {
            for sub in subtypes {
                if sub == typename {
                    return true;
                }
                stack.push(sub.as_str());
            }
        }
    }
    false
}
