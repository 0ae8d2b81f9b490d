//! # Normalized Store Model
//!
//! Clean DTOs shared by the store, the read executor, the dependency
//! tracker and the garbage collector.
//!
//! Design rule: this module is pure data. No locking, no memo state.

pub mod entity;
pub mod store_key;
pub mod value;
pub mod dependency;
pub mod missing;

pub use entity::{EntityId, EntityRecord};
pub use store_key::StoreKey;
pub use value::{EmbeddedObject, MergeOutcome, StoreValue, REF_KEY};
pub use dependency::{Dependency, DependencySet};
pub use missing::MissingField;
