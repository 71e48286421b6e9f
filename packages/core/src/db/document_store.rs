//! DocumentStore Trait - Storage Abstraction Layer
//!
//! The storage primitive every service talks to. A backend has to offer
//! single-document reads with projection, multi-document field updates under a
//! filter, and sessions carrying an atomic multi-document transaction.
//!
//! # Design Decisions
//!
//! 1. **Async-First**: every method is async so that networked backends fit
//!    behind the same trait as the in-memory one
//! 2. **Raw documents**: the store only sees flattened JSON maps; schema
//!    knowledge lives in the services
//! 3. **Explicit sessions**: a `Session` is passed to every call that should
//!    run inside a transaction; `None` means "autocommit"
//!
//! # Examples
//!
//! ```rust
//! use denorm_core::db::{DocumentStore, Filter, InMemoryStore};
//! use denorm_core::models::DocumentId;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = InMemoryStore::new();
//!     let id = DocumentId::new();
//!     let doc = json!({"_id": id, "url": "a.png"});
//!     store
//!         .insert_one("Photo", doc.as_object().cloned().unwrap_or_default(), None)
//!         .await?;
//!
//!     let found = store.find_one("Photo", &Filter::id(id), None, None).await?;
//!     assert!(found.is_some());
//!     Ok(())
//! }
//! ```

use crate::db::{Filter, Projection, SetUpdate, StoreError};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Flattened document as stored
pub type RawDocument = Map<String, Value>;

/// Handle of a store session with an open transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Session {
    id: Uuid,
}

impl Session {
    pub fn new() -> Self {
        Self { id: Uuid::new_v4() }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session:{}", self.id)
    }
}

/// Abstraction over a document-oriented backend
///
/// Implementations must be `Send + Sync`: the store handle is shared by the
/// database and every lazy document.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// First document of `collection` matching `filter`, projected when a
    /// projection is given. `Ok(None)` when nothing matches.
    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
        projection: Option<&Projection>,
        session: Option<&Session>,
    ) -> Result<Option<RawDocument>, StoreError>;

    /// Every document of `collection` matching `filter`, in insertion order
    async fn find_many(
        &self,
        collection: &str,
        filter: &Filter,
        projection: Option<&Projection>,
        session: Option<&Session>,
    ) -> Result<Vec<RawDocument>, StoreError>;

    /// Insert a document; its `_id` must be unique within the collection
    async fn insert_one(
        &self,
        collection: &str,
        document: RawDocument,
        session: Option<&Session>,
    ) -> Result<(), StoreError>;

    /// Replace the first document matching `filter`; `false` when none matched
    async fn replace_one(
        &self,
        collection: &str,
        filter: &Filter,
        document: RawDocument,
        session: Option<&Session>,
    ) -> Result<bool, StoreError>;

    /// Apply `update` to every matching document, returning how many changed.
    ///
    /// A `$` segment in a set path addresses the array elements matched by the
    /// filter's element match on the same array (every element when the filter
    /// has none).
    async fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        update: &SetUpdate,
        session: Option<&Session>,
    ) -> Result<u64, StoreError>;

    /// Open a session and start a transaction in it
    async fn start_session(&self) -> Result<Session, StoreError>;

    async fn commit_transaction(&self, session: &Session) -> Result<(), StoreError>;

    async fn abort_transaction(&self, session: &Session) -> Result<(), StoreError>;

    /// Release the session; an open transaction is discarded
    async fn end_session(&self, session: &Session) -> Result<(), StoreError>;
}
