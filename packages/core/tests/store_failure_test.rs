//! Store Failure Tests
//!
//! Tests for how `Database` operations behave when the backend itself fails,
//! using a store that delegates to `InMemoryStore` but can be told to fail.
//!
//! ## Test Coverage
//!
//! - A failed commit surfaces as `DocumentError::Store` and writes nothing
//! - A failed propagation write rolls back the source update
//! - Every managed session is ended after a backend failure

#[cfg(test)]
mod store_failure_tests {
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use denorm_core::db::{
        DocumentStore, Filter, InMemoryStore, Projection, RawDocument, Session, SetUpdate,
        StoreError,
    };
    use denorm_core::logging::init_tracing;
    use denorm_core::models::schema_node::{id, object, string};
    use denorm_core::models::DocumentId;
    use denorm_core::schema::{reference, CollectionDefinition};
    use denorm_core::services::{Database, DocumentError, UpdateInput};
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// In-memory store with switchable backend failures
    #[derive(Default)]
    struct FailingStore {
        inner: InMemoryStore,
        fail_commit: AtomicBool,
        fail_updates_in: Mutex<Option<String>>,
    }

    impl FailingStore {
        fn backend_error(operation: &str) -> StoreError {
            StoreError::from(anyhow!("connection reset during {}", operation))
        }
    }

    #[async_trait]
    impl DocumentStore for FailingStore {
        async fn find_one(
            &self,
            collection: &str,
            filter: &Filter,
            projection: Option<&Projection>,
            session: Option<&Session>,
        ) -> Result<Option<RawDocument>, StoreError> {
            self.inner.find_one(collection, filter, projection, session).await
        }

        async fn find_many(
            &self,
            collection: &str,
            filter: &Filter,
            projection: Option<&Projection>,
            session: Option<&Session>,
        ) -> Result<Vec<RawDocument>, StoreError> {
            self.inner.find_many(collection, filter, projection, session).await
        }

        async fn insert_one(
            &self,
            collection: &str,
            document: RawDocument,
            session: Option<&Session>,
        ) -> Result<(), StoreError> {
            self.inner.insert_one(collection, document, session).await
        }

        async fn replace_one(
            &self,
            collection: &str,
            filter: &Filter,
            document: RawDocument,
            session: Option<&Session>,
        ) -> Result<bool, StoreError> {
            self.inner.replace_one(collection, filter, document, session).await
        }

        async fn update_many(
            &self,
            collection: &str,
            filter: &Filter,
            update: &SetUpdate,
            session: Option<&Session>,
        ) -> Result<u64, StoreError> {
            if self.fail_updates_in.lock().as_deref() == Some(collection) {
                return Err(Self::backend_error("update_many"));
            }
            self.inner.update_many(collection, filter, update, session).await
        }

        async fn start_session(&self) -> Result<Session, StoreError> {
            self.inner.start_session().await
        }

        async fn commit_transaction(&self, session: &Session) -> Result<(), StoreError> {
            if self.fail_commit.load(Ordering::SeqCst) {
                return Err(Self::backend_error("commit"));
            }
            self.inner.commit_transaction(session).await
        }

        async fn abort_transaction(&self, session: &Session) -> Result<(), StoreError> {
            self.inner.abort_transaction(session).await
        }

        async fn end_session(&self, session: &Session) -> Result<(), StoreError> {
            self.inner.end_session(session).await
        }
    }

    async fn create_test_db() -> Result<(Database, Arc<FailingStore>)> {
        init_tracing();

        let store = Arc::new(FailingStore::default());
        let database = Database::new(store.clone());

        database.add_definitions([
            CollectionDefinition::new(
                "Photo",
                object().field("_id", id()).field("url", string()),
            )?,
            CollectionDefinition::new(
                "User",
                object()
                    .field("_id", id())
                    .field("name", string())
                    .field("photo", reference::partial("Photo", ["url"])),
            )?,
        ])?;

        Ok((database, store))
    }

    fn assert_backend_failure<T: std::fmt::Debug>(result: Result<T, DocumentError>) {
        match result {
            Err(DocumentError::Store(error)) => {
                assert!(matches!(error.as_ref(), StoreError::Backend(_)), "got {:?}", error)
            }
            other => panic!("Expected backend failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failed_commit_writes_nothing() -> Result<()> {
        let (database, store) = create_test_db().await?;
        store.fail_commit.store(true, Ordering::SeqCst);

        assert_backend_failure(database.create("Photo", json!({"url": "a.png"})).await);

        assert!(store.inner.documents("Photo").is_empty());
        assert_eq!(store.inner.open_sessions(), 0);

        store.fail_commit.store(false, Ordering::SeqCst);
        database.create("Photo", json!({"url": "a.png"})).await?;
        assert_eq!(store.inner.documents("Photo").len(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_failed_propagation_rolls_back_update() -> Result<()> {
        let (database, store) = create_test_db().await?;

        let photo = database.create("Photo", json!({"url": "a.png"})).await?;
        let photo_id = DocumentId::from_value(&photo.to_raw()["_id"]).expect("generated id");
        database
            .create("User", json!({"name": "Ada", "photo": photo_id.to_string()}))
            .await?;

        *store.fail_updates_in.lock() = Some("User".to_string());
        assert_backend_failure(
            database
                .update("Photo", photo_id, UpdateInput::patch(json!({"url": "b.png"})))
                .await,
        );

        assert_eq!(
            Value::Object(store.inner.documents("Photo")[0].clone()),
            json!({"_id": photo_id, "url": "a.png"})
        );
        assert_eq!(
            store.inner.documents("User")[0]["photo"],
            json!({"_id": photo_id, "url": "a.png"})
        );
        assert_eq!(store.inner.open_sessions(), 0);

        Ok(())
    }
}
