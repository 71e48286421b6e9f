//! Services
//!
//! Schema-aware operations on top of the store:
//!
//! - `Database` - registration, create/replace/update and reference propagation
//! - `DocumentReference` - parsed embedding point with its known-field cache
//! - `LazyDocument` - on-demand, batched field loading
//! - `ReferenceGraph` - where each collection is embedded
//!
//! Services coordinate between the database layer and the schema layer; all of
//! them report failures as [`DocumentError`].

pub mod database;
mod document_reference;
pub mod error;
mod lazy_document;
pub mod propagator;
pub mod reference_graph;
mod transaction;

pub use database::{Database, UpdateInput, UpdateOptions, WriteOptions};
pub use document_reference::DocumentReference;
pub use error::DocumentError;
pub use lazy_document::LazyDocument;
pub use propagator::{LocationUpdate, PropagationReport};
pub use reference_graph::{index_references_to, ReferenceGraph, ReferenceLocation};
pub use transaction::with_transaction;
