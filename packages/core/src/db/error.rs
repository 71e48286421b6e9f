//! Store Error Types
//!
//! Errors raised by [`DocumentStore`](super::DocumentStore) implementations.
//! They describe transport and session failures only; "document not found" is
//! an ordinary `Ok(None)` at this layer and becomes an error in the services.

use thiserror::Error;
use uuid::Uuid;

/// Storage operation errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// The session was never started or has already been ended
    #[error("Session not found: {id}")]
    SessionNotFound { id: Uuid },

    /// The session exists but its transaction was committed or aborted
    #[error("No active transaction in session {id}")]
    TransactionNotActive { id: Uuid },

    /// A document with the same `_id` already exists in the collection
    #[error("Duplicate key in '{collection}': {id}")]
    DuplicateKey { collection: String, id: String },

    /// A document without a usable `_id` was written
    #[error("Document in '{collection}' has no `_id`")]
    MissingId { collection: String },

    /// Any other backend failure
    #[error("Store backend failed: {0}")]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    pub fn session_not_found(id: Uuid) -> Self {
        Self::SessionNotFound { id }
    }

    pub fn transaction_not_active(id: Uuid) -> Self {
        Self::TransactionNotActive { id }
    }

    pub fn duplicate_key(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::DuplicateKey {
            collection: collection.into(),
            id: id.into(),
        }
    }

    pub fn missing_id(collection: impl Into<String>) -> Self {
        Self::MissingId {
            collection: collection.into(),
        }
    }
}
