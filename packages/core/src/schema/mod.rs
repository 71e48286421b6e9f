//! Schema Layer
//!
//! Collection and partial definitions, reference marker builders and the
//! walkers that traverse [`SchemaNode`](crate::models::SchemaNode) trees.

mod collection_definition;
mod error;
mod partial_definition;
pub mod reference;
pub mod walker;

pub use collection_definition::CollectionDefinition;
pub use error::SchemaError;
pub use partial_definition::PartialDefinition;
pub use walker::{ReferenceSite, ARRAY_SEGMENT};
