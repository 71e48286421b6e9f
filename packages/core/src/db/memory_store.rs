//! In-Memory Document Store
//!
//! A [`DocumentStore`] keeping every collection in process memory. Sessions
//! work on a private snapshot taken at `start_session`; their writes are
//! logged and replayed onto the shared state on commit, so a transaction is
//! either applied entirely or not at all.
//!
//! Every read is recorded in a read log, which is how tests count storage
//! round trips and inspect the projections that were requested.

use crate::db::{DocumentStore, Filter, Projection, RawDocument, Session, SetUpdate, StoreError};
use crate::models::ID_FIELD;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

type Collections = HashMap<String, Vec<RawDocument>>;

/// One recorded read
#[derive(Debug, Clone, PartialEq)]
pub struct ReadRecord {
    pub collection: String,
    pub filter: Filter,
    pub projection: Option<Projection>,
    pub session: Option<Uuid>,
}

#[derive(Debug, Clone)]
enum WriteOp {
    Insert {
        collection: String,
        document: RawDocument,
    },
    Replace {
        collection: String,
        filter: Filter,
        document: RawDocument,
    },
    Update {
        collection: String,
        filter: Filter,
        update: SetUpdate,
    },
}

struct SessionState {
    snapshot: Collections,
    log: Vec<WriteOp>,
    active: bool,
}

/// Process-local store with snapshot transactions
#[derive(Default)]
pub struct InMemoryStore {
    collections: RwLock<Collections>,
    sessions: Mutex<HashMap<Uuid, SessionState>>,
    reads: Mutex<Vec<ReadRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads performed so far, oldest first
    pub fn reads(&self) -> Vec<ReadRecord> {
        self.reads.lock().clone()
    }

    pub fn read_count(&self) -> usize {
        self.reads.lock().len()
    }

    pub fn clear_read_log(&self) {
        self.reads.lock().clear();
    }

    /// Committed contents of `collection`, bypassing the read log
    pub fn documents(&self, collection: &str) -> Vec<RawDocument> {
        self.collections
            .read()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of sessions not yet ended
    pub fn open_sessions(&self) -> usize {
        self.sessions.lock().len()
    }

    fn record_read(
        &self,
        collection: &str,
        filter: &Filter,
        projection: Option<&Projection>,
        session: Option<&Session>,
    ) {
        self.reads.lock().push(ReadRecord {
            collection: collection.to_string(),
            filter: filter.clone(),
            projection: projection.cloned(),
            session: session.map(Session::id),
        });
    }

    fn read<R>(
        &self,
        session: Option<&Session>,
        f: impl FnOnce(&Collections) -> R,
    ) -> Result<R, StoreError> {
        match session {
            None => Ok(f(&self.collections.read())),
            Some(session) => {
                let sessions = self.sessions.lock();
                let state = active_session(&sessions, session)?;
                Ok(f(&state.snapshot))
            }
        }
    }

    fn write(&self, session: Option<&Session>, op: WriteOp) -> Result<u64, StoreError> {
        match session {
            None => apply(&mut self.collections.write(), &op),
            Some(session) => {
                let mut sessions = self.sessions.lock();
                active_session(&sessions, session)?;
                let state = sessions
                    .get_mut(&session.id())
                    .ok_or_else(|| StoreError::session_not_found(session.id()))?;
                let outcome = apply(&mut state.snapshot, &op)?;
                state.log.push(op);
                Ok(outcome)
            }
        }
    }

    fn finish(&self, session: &Session, commit: bool) -> Result<(), StoreError> {
        let mut sessions = self.sessions.lock();
        active_session(&sessions, session)?;
        let state = sessions
            .get_mut(&session.id())
            .ok_or_else(|| StoreError::session_not_found(session.id()))?;
        let log = std::mem::take(&mut state.log);
        state.active = false;

        if commit {
            let mut collections = self.collections.write();
            let mut next = collections.clone();
            for op in &log {
                apply(&mut next, op)?;
            }
            *collections = next;
        }
        Ok(())
    }
}

fn active_session<'a>(
    sessions: &'a HashMap<Uuid, SessionState>,
    session: &Session,
) -> Result<&'a SessionState, StoreError> {
    let state = sessions
        .get(&session.id())
        .ok_or_else(|| StoreError::session_not_found(session.id()))?;
    if !state.active {
        return Err(StoreError::transaction_not_active(session.id()));
    }
    Ok(state)
}

fn apply(collections: &mut Collections, op: &WriteOp) -> Result<u64, StoreError> {
    match op {
        WriteOp::Insert {
            collection,
            document,
        } => {
            let id = document
                .get(ID_FIELD)
                .filter(|id| !id.is_null())
                .ok_or_else(|| StoreError::missing_id(collection))?;
            let documents = collections.entry(collection.clone()).or_default();
            if documents.iter().any(|doc| doc.get(ID_FIELD) == Some(id)) {
                return Err(StoreError::duplicate_key(collection, display_id(id)));
            }
            documents.push(document.clone());
            Ok(1)
        }
        WriteOp::Replace {
            collection,
            filter,
            document,
        } => {
            let Some(documents) = collections.get_mut(collection) else {
                return Ok(0);
            };
            match documents.iter_mut().find(|doc| filter.matches(doc)) {
                Some(slot) => {
                    *slot = document.clone();
                    Ok(1)
                }
                None => Ok(0),
            }
        }
        WriteOp::Update {
            collection,
            filter,
            update,
        } => {
            let Some(documents) = collections.get_mut(collection) else {
                return Ok(0);
            };
            let mut modified = 0;
            for document in documents.iter_mut().filter(|doc| filter.matches(doc)) {
                if update.apply(document, filter) {
                    modified += 1;
                }
            }
            Ok(modified)
        }
    }
}

fn display_id(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
        projection: Option<&Projection>,
        session: Option<&Session>,
    ) -> Result<Option<RawDocument>, StoreError> {
        self.record_read(collection, filter, projection, session);
        self.read(session, |collections| {
            collections
                .get(collection)
                .and_then(|documents| documents.iter().find(|doc| filter.matches(doc)))
                .map(|doc| match projection {
                    Some(projection) => projection.apply(doc),
                    None => doc.clone(),
                })
        })
    }

    async fn find_many(
        &self,
        collection: &str,
        filter: &Filter,
        projection: Option<&Projection>,
        session: Option<&Session>,
    ) -> Result<Vec<RawDocument>, StoreError> {
        self.record_read(collection, filter, projection, session);
        self.read(session, |collections| {
            collections
                .get(collection)
                .map(|documents| {
                    documents
                        .iter()
                        .filter(|doc| filter.matches(doc))
                        .map(|doc| match projection {
                            Some(projection) => projection.apply(doc),
                            None => doc.clone(),
                        })
                        .collect()
                })
                .unwrap_or_default()
        })
    }

    async fn insert_one(
        &self,
        collection: &str,
        document: RawDocument,
        session: Option<&Session>,
    ) -> Result<(), StoreError> {
        self.write(
            session,
            WriteOp::Insert {
                collection: collection.to_string(),
                document,
            },
        )?;
        Ok(())
    }

    async fn replace_one(
        &self,
        collection: &str,
        filter: &Filter,
        document: RawDocument,
        session: Option<&Session>,
    ) -> Result<bool, StoreError> {
        let replaced = self.write(
            session,
            WriteOp::Replace {
                collection: collection.to_string(),
                filter: filter.clone(),
                document,
            },
        )?;
        Ok(replaced > 0)
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        update: &SetUpdate,
        session: Option<&Session>,
    ) -> Result<u64, StoreError> {
        self.write(
            session,
            WriteOp::Update {
                collection: collection.to_string(),
                filter: filter.clone(),
                update: update.clone(),
            },
        )
    }

    async fn start_session(&self) -> Result<Session, StoreError> {
        let session = Session::new();
        let snapshot = self.collections.read().clone();
        self.sessions.lock().insert(
            session.id(),
            SessionState {
                snapshot,
                log: Vec::new(),
                active: true,
            },
        );
        tracing::debug!("Started {}", session);
        Ok(session)
    }

    async fn commit_transaction(&self, session: &Session) -> Result<(), StoreError> {
        self.finish(session, true)
    }

    async fn abort_transaction(&self, session: &Session) -> Result<(), StoreError> {
        self.finish(session, false)
    }

    async fn end_session(&self, session: &Session) -> Result<(), StoreError> {
        self.sessions
            .lock()
            .remove(&session.id())
            .map(|_| ())
            .ok_or_else(|| StoreError::session_not_found(session.id()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> RawDocument {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let store = InMemoryStore::new();
        store
            .insert_one("Photo", doc(json!({"_id": "a", "url": "u"})), None)
            .await
            .unwrap();

        let found = store
            .find_one("Photo", &Filter::eq("_id", "a"), None, None)
            .await
            .unwrap();
        assert_eq!(found, Some(doc(json!({"_id": "a", "url": "u"}))));

        let missing = store
            .find_one("Photo", &Filter::eq("_id", "b"), None, None)
            .await
            .unwrap();
        assert!(missing.is_none());
        assert_eq!(store.read_count(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_and_missing_ids_rejected() {
        let store = InMemoryStore::new();
        store
            .insert_one("Photo", doc(json!({"_id": "a"})), None)
            .await
            .unwrap();

        let duplicate = store.insert_one("Photo", doc(json!({"_id": "a"})), None).await;
        assert!(matches!(duplicate, Err(StoreError::DuplicateKey { .. })));

        let anonymous = store.insert_one("Photo", doc(json!({"url": "x"})), None).await;
        assert!(matches!(anonymous, Err(StoreError::MissingId { .. })));
    }

    #[tokio::test]
    async fn test_projection_is_recorded() {
        let store = InMemoryStore::new();
        store
            .insert_one("Photo", doc(json!({"_id": "a", "url": "u", "w": 1})), None)
            .await
            .unwrap();

        let projection = Projection::include(["url"]);
        let found = store
            .find_one("Photo", &Filter::eq("_id", "a"), Some(&projection), None)
            .await
            .unwrap();
        assert_eq!(found, Some(doc(json!({"url": "u"}))));
        assert_eq!(store.reads()[0].projection, Some(projection));
    }

    #[tokio::test]
    async fn test_transaction_commit_applies_all_writes() {
        let store = InMemoryStore::new();
        let session = store.start_session().await.unwrap();

        store
            .insert_one("Photo", doc(json!({"_id": "a", "url": "1"})), Some(&session))
            .await
            .unwrap();
        let update = SetUpdate::new().set("url", "2");
        let modified = store
            .update_many("Photo", &Filter::eq("_id", "a"), &update, Some(&session))
            .await
            .unwrap();
        assert_eq!(modified, 1);

        // Not visible outside the session before commit
        assert!(store.documents("Photo").is_empty());
        let inside = store
            .find_one("Photo", &Filter::All, None, Some(&session))
            .await
            .unwrap();
        assert_eq!(inside, Some(doc(json!({"_id": "a", "url": "2"}))));

        store.commit_transaction(&session).await.unwrap();
        store.end_session(&session).await.unwrap();

        assert_eq!(store.documents("Photo"), vec![doc(json!({"_id": "a", "url": "2"}))]);
        assert_eq!(store.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_transaction_abort_discards_writes() {
        let store = InMemoryStore::new();
        let session = store.start_session().await.unwrap();
        store
            .insert_one("Photo", doc(json!({"_id": "a"})), Some(&session))
            .await
            .unwrap();
        store.abort_transaction(&session).await.unwrap();

        let after_abort = store
            .find_one("Photo", &Filter::All, None, Some(&session))
            .await;
        assert!(matches!(after_abort, Err(StoreError::TransactionNotActive { .. })));

        store.end_session(&session).await.unwrap();
        assert!(store.documents("Photo").is_empty());
        assert!(matches!(
            store.end_session(&session).await,
            Err(StoreError::SessionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_replace_reports_match() {
        let store = InMemoryStore::new();
        store
            .insert_one("User", doc(json!({"_id": "u", "name": "a"})), None)
            .await
            .unwrap();

        let replaced = store
            .replace_one("User", &Filter::eq("_id", "u"), doc(json!({"_id": "u", "name": "b"})), None)
            .await
            .unwrap();
        assert!(replaced);

        let missed = store
            .replace_one("User", &Filter::eq("_id", "z"), doc(json!({"_id": "z"})), None)
            .await
            .unwrap();
        assert!(!missed);
        assert_eq!(store.documents("User")[0]["name"], "b");
    }
}
