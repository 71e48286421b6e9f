//! Data Models
//!
//! This module contains the value types shared by every layer:
//!
//! - `SchemaNode` - closed schema description tree and its builders
//! - `DocumentId` - UUID identifiers stored under `_id`
//! - `HydratedValue` - validated values, possibly holding document references

mod document_id;
mod hydrated;
pub mod schema_node;


pub use document_id::{DocumentId, ID_FIELD};
pub use hydrated::{HydratedMap, HydratedValue};
pub use schema_node::{
    DeferredSchema, DiscriminatedUnion, FieldMask, LeafKind, ObjectSchema, ReferenceMarker,
    SchemaNode, WrapperKind,
};
