//! Memo keys: where a memoized object or list lives in the store.

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::model::{Dependency, EntityId, StoreKey};
use crate::selection::SelectionId;

/// One step from an entity into its inline data.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Field(StoreKey),
    Index(usize),
}

/// Position of an object or list in the store: an entity plus a path
/// through its inline fields and list indices. An empty path is the
/// entity itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    pub entity: EntityId,
    pub path: SmallVec<[PathSegment; 2]>,
}

impl Location {
    pub fn entity(entity: EntityId) -> Self {
        Self { entity, path: SmallVec::new() }
    }

    pub fn child(&self, segment: PathSegment) -> Self {
        let mut path = self.path.clone();
        path.push(segment);
        Self { entity: self.entity.clone(), path }
    }

    pub fn field(&self, key: StoreKey) -> Self {
        self.child(PathSegment::Field(key))
    }

    pub fn index(&self, i: usize) -> Self {
        self.child(PathSegment::Index(i))
    }

    pub fn is_entity(&self) -> bool {
        self.path.is_empty()
    }

    /// The path below the entity, rendered as `field[index].field`. Empty
    /// for the entity itself.
    pub fn path_string(&self) -> String {
        let mut out = String::new();
        for seg in &self.path {
            match seg {
                PathSegment::Field(k) if out.is_empty() => out.push_str(k.as_str()),
                PathSegment::Field(k) => {
                    out.push('.');
                    out.push_str(k.as_str());
                }
                PathSegment::Index(i) => out.push_str(&format!("[{i}]")),
            }
        }
        out
    }

    /// The store location whose change invalidates everything at this
    /// position: the top-level field it is nested in, or the entity itself.
    pub fn owner_dependency(&self) -> Dependency {
        match self.path.first() {
            Some(PathSegment::Field(key)) => Dependency::field(self.entity.clone(), key.clone()),
            _ => Dependency::entity(self.entity.clone()),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.entity)?;
        for seg in &self.path {
            match seg {
                PathSegment::Field(k) => write!(f, ".{k}")?,
                PathSegment::Index(i) => write!(f, "[{i}]")?,
            }
        }
        Ok(())
    }
}

/// Key of one memoized computation: where, which selection, which variables.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemoKey {
    pub location: Location,
    pub selection: SelectionId,
    pub variables: Arc<str>,
}

impl MemoKey {
    pub fn new(location: Location, selection: SelectionId, variables: Arc<str>) -> Self {
        Self { location, selection, variables }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_dependency() {
        let root = Location::entity("Chat:1".into());
        assert_eq!(root.owner_dependency(), Dependency::entity("Chat:1".into()));

        let nested = root.field("messages".into()).index(3).field("meta".into());
        assert_eq!(nested.owner_dependency(), Dependency::field("Chat:1".into(), "messages".into()));
        assert_eq!(nested.to_string(), "Chat:1.messages[3].meta");
        assert_eq!(nested.path_string(), "messages[3].meta");
        assert_eq!(root.path_string(), "");
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_large_list_indices_stay_distinct() {
        let list = Location::entity("Feed:1".into()).field("items".into());
        let low = list.index(1);
        let high = list.index((u32::MAX as usize) + 2);
        assert_ne!(low, high);
    }
}
