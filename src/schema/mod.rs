//! Schema overview
//!
//! Read-only description of collections, their fields and the relations
//! between them. Shared behind an `Arc` for the lifetime of the process and
//! never mutated by the engine; a schema change replaces the whole value.

mod loader;
mod relations;
mod types;

pub use loader::SchemaLoader;
pub use relations::{JunctionDescriptor, RelationInfo, RelationKind};
pub use types::{
    CollectionOverview, FieldOverview, FieldType, Relation, RelationMeta, SchemaOverview,
};
