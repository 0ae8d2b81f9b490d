//! Dependency sets: the store locations a computed result has read.

use hashbrown::{HashMap, HashSet};

use super::{EntityId, StoreKey};

/// One store location. `field: None` stands for the entity as a whole
/// (its existence), so whole-entity changes touch it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dependency {
    pub entity: EntityId,
    pub field: Option<StoreKey>,
}

impl Dependency {
    pub fn entity(entity: EntityId) -> Self {
        Self { entity, field: None }
    }

    pub fn field(entity: EntityId, field: StoreKey) -> Self {
        Self { entity, field: Some(field) }
    }
}

/// A set of dependencies, grouped by entity.
///
/// Also used as a change set: the `(EntityId, key)` pairs a write changed,
/// with `None` keys marking entities that were created or removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencySet {
    by_entity: HashMap<EntityId, HashSet<Option<StoreKey>>>,
}

impl DependencySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, dep: Dependency) -> bool {
        self.by_entity.entry(dep.entity).or_default().insert(dep.field)
    }

    pub fn insert_entity(&mut self, entity: &EntityId) -> bool {
        self.by_entity.entry(entity.clone()).or_default().insert(None)
    }

    pub fn insert_field(&mut self, entity: &EntityId, field: &StoreKey) -> bool {
        self.by_entity.entry(entity.clone()).or_default().insert(Some(field.clone()))
    }

    /// Union another set into this one.
    pub fn extend(&mut self, other: &DependencySet) {
        for (entity, fields) in &other.by_entity {
            let mine = self.by_entity.entry(entity.clone()).or_default();
            mine.extend(fields.iter().cloned());
        }
    }

    pub fn contains(&self, dep: &Dependency) -> bool {
        self.by_entity
            .get(&dep.entity)
            .is_some_and(|fields| fields.contains(&dep.field))
    }

    pub fn mentions(&self, entity: &EntityId) -> bool {
        self.by_entity.contains_key(entity)
    }

    /// Whether the changes in `changes` affect anything this set read.
    ///
    /// An entity-level change touches every dependency on that entity; a
    /// field-level change touches only that field.
    pub fn touches(&self, changes: &DependencySet) -> bool {
        changes.by_entity.iter().any(|(entity, changed)| {
            let Some(mine) = self.by_entity.get(entity) else {
                return false;
            };
            changed.contains(&None) || changed.iter().any(|f| mine.contains(f))
        })
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityId> {
        self.by_entity.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = Dependency> + '_ {
        self.by_entity.iter().flat_map(|(entity, fields)| {
            fields.iter().map(move |field| Dependency {
                entity: entity.clone(),
                field: field.clone(),
            })
        })
    }

    /// Number of `(entity, field)` pairs.
    pub fn len(&self) -> usize {
        self.by_entity.values().map(HashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_entity.is_empty()
    }
}

impl FromIterator<Dependency> for DependencySet {
    fn from_iter<I: IntoIterator<Item = Dependency>>(iter: I) -> Self {
        let mut set = DependencySet::new();
        for dep in iter {
            set.insert(dep);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dep(e: &str, f: Option<&str>) -> Dependency {
        Dependency { entity: e.into(), field: f.map(StoreKey::from) }
    }

    #[test]
    fn test_field_change_touches_only_that_field() {
        let deps: DependencySet = [dep("A", Some("name")), dep("A", None)].into_iter().collect();
        let name_change: DependencySet = [dep("A", Some("name"))].into_iter().collect();
        let age_change: DependencySet = [dep("A", Some("age"))].into_iter().collect();

        assert!(deps.touches(&name_change));
        assert!(!deps.touches(&age_change));
    }

    #[test]
    fn test_entity_change_touches_any_field() {
        let deps: DependencySet = [dep("A", Some("name"))].into_iter().collect();
        let removed: DependencySet = [dep("A", None)].into_iter().collect();
        let other: DependencySet = [dep("B", None)].into_iter().collect();

        assert!(deps.touches(&removed));
        assert!(!deps.touches(&other));
    }

    #[test]
    fn test_extend_unions() {
        let mut a: DependencySet = [dep("A", Some("x"))].into_iter().collect();
        let b: DependencySet = [dep("A", Some("x")), dep("B", Some("y"))].into_iter().collect();
        a.extend(&b);
        assert_eq!(a.len(), 2);
        assert!(a.contains(&dep("B", Some("y"))));
    }
}
