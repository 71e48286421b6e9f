//! Denormalized document references over a schema-described document store
//!
//! Documents routinely embed a cached copy (whole or masked) of other
//! documents: a post carries its author's name next to the author's `_id`.
//! This crate keeps those copies honest.
//!
//! # Architecture
//!
//! - **Closed schema tree**: shapes are [`models::SchemaNode`] values; walkers
//!   find every embedding path, including inside arrays, unions and recursive
//!   schemas
//! - **References**: embedding points parse into [`services::DocumentReference`]
//!   values that know part of the target and can load the rest
//! - **Lazy loading**: [`services::LazyDocument`] coalesces concurrent field
//!   requests into a single projected read
//! - **Propagation**: updating a document patches every embedded copy of it
//!   inside one transaction
//!
//! # Modules
//!
//! - [`models`] - Schema nodes, identifiers, hydrated values
//! - [`schema`] - Collection definitions, reference markers, schema walkers
//! - [`validation`] - Async schema parsing
//! - [`services`] - Database orchestrator, references, lazy documents, propagation
//! - [`db`] - Storage trait, in-memory store, domain events
//! - [`config`] / [`logging`] - Runtime configuration and tracing setup

pub mod config;
pub mod db;
pub mod logging;
pub mod models;
pub mod schema;
pub mod services;
pub mod validation;

// Re-export commonly used types
pub use config::DatabaseConfig;
pub use db::{DocumentStore, DomainEvent, InMemoryStore, Session};
pub use models::*;
pub use schema::{reference, CollectionDefinition, PartialDefinition, SchemaError};
pub use services::*;
pub use validation::{ValidationError, Validator};
