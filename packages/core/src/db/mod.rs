//! Database Layer
//!
//! Everything below the schema-aware services:
//!
//! - `DocumentStore` - async storage trait with sessions and transactions
//! - `Filter` / `Projection` / `SetUpdate` - the query vocabulary of that trait
//! - `InMemoryStore` - process-local implementation with snapshot transactions
//! - `DomainEvent` - change notifications broadcast by the database

mod document_store;
mod error;
pub mod events;
mod filter;
mod memory_store;

pub use document_store::{DocumentStore, RawDocument, Session};
pub use error::StoreError;
pub use events::DomainEvent;
pub use filter::{Filter, Projection, SetUpdate};
pub use memory_store::{InMemoryStore, ReadRecord};
