//! Service Layer Error Types
//!
//! [`DocumentError`] is what every public operation returns. It wraps the
//! lower layers' errors (`SchemaError`, `ValidationError`, `StoreError`) and
//! adds the lookup failures of the database itself.
//!
//! The type is `Clone` because lazy field batches share one result between
//! every request that joined them; store errors are kept behind an `Arc` for
//! that reason.

use crate::db::StoreError;
use crate::models::DocumentId;
use crate::schema::SchemaError;
use crate::validation::ValidationError;
use std::sync::Arc;
use thiserror::Error;

/// Document operation errors
#[derive(Error, Debug, Clone)]
pub enum DocumentError {
    /// A schema broke a structural invariant
    #[error("Schema invariant violated: {0}")]
    SchemaInvariantViolation(#[from] SchemaError),

    /// No document with this id exists in the collection
    #[error("Document not found in '{collection}': {id}")]
    DocumentNotFound { collection: String, id: DocumentId },

    /// Input or stored data does not match the schema
    #[error("Validation failed: {0}")]
    ValidationFailure(#[from] ValidationError),

    /// Storage operation failed
    #[error("Store operation failed: {0}")]
    Store(#[source] Arc<StoreError>),

    /// A definition was used before being added to a database
    #[error("'{model}' is not registered with a database")]
    Unregistered { model: String },

    /// No definition with this name is registered
    #[error("Unknown collection: {name}")]
    UnknownCollection { name: String },

    /// The name (or the definition itself) is already registered
    #[error("'{name}' is already registered")]
    AlreadyRegistered { name: String },
}

impl From<StoreError> for DocumentError {
    fn from(error: StoreError) -> Self {
        Self::Store(Arc::new(error))
    }
}

impl DocumentError {
    /// Create a document not found error
    pub fn not_found(collection: impl Into<String>, id: DocumentId) -> Self {
        Self::DocumentNotFound {
            collection: collection.into(),
            id,
        }
    }

    /// Create a validation failure at `path`
    pub fn validation(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationFailure(ValidationError::new(path, message))
    }

    pub fn unregistered(model: impl Into<String>) -> Self {
        Self::Unregistered {
            model: model.into(),
        }
    }

    pub fn unknown_collection(name: impl Into<String>) -> Self {
        Self::UnknownCollection { name: name.into() }
    }

    pub fn already_registered(name: impl Into<String>) -> Self {
        Self::AlreadyRegistered { name: name.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::DocumentNotFound { .. })
    }
}
