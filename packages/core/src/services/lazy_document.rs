//! Lazy Document Engine
//!
//! A [`LazyDocument`] is a live view over one stored document. Fields are
//! loaded on first access and memoized for the lifetime of the handle (and of
//! its clones, which share state).
//!
//! # Batching
//!
//! Requesting a field that is not memoized registers it in the open batch, or
//! opens one. A batch is a shared future that yields one scheduler turn before
//! reading, so every field requested synchronously before the caller awaits
//! lands in the same projected `find_one`:
//!
//! ```text
//! get_raw("a") ──┐
//! get_raw("b") ──┼── batch#1: yield_now ─ find_one(_id, {a, b, c}) ─┬─ a
//! get_raw("c") ──┘                                                  ├─ b
//!                                                                   └─ c
//! ```
//!
//! Fields requested after a batch collected its field list open the next
//! batch. At most one read is in flight per document: batches queue on a read
//! gate. A missing document fails every request of the batch; nothing is
//! retried.
//!
//! # Validation
//!
//! [`LazyDocument::get`] validates against the definition's schema, picked
//! down to the fields known so far. [`LazyDocument::get_raw`] skips
//! validation and is what discriminated-union resolution uses.

use crate::db::{DocumentStore, Filter, Projection, RawDocument};
use crate::models::{DocumentId, HydratedMap, HydratedValue, ObjectSchema, SchemaNode, ID_FIELD};
use crate::schema::CollectionDefinition;
use crate::services::DocumentError;
use crate::validation::Validator;
use futures::future::{join_all, BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

type BatchResult = Result<Arc<RawDocument>, DocumentError>;
type BatchFuture = Shared<BoxFuture<'static, BatchResult>>;

/// Handle on one document, loading fields on demand
#[derive(Clone)]
pub struct LazyDocument {
    inner: Arc<LazyInner>,
}

struct LazyInner {
    id: DocumentId,
    definition: Arc<CollectionDefinition>,
    store: Arc<dyn DocumentStore>,
    strict: bool,
    state: Mutex<LazyState>,
    read_gate: Arc<tokio::sync::Mutex<()>>,
    batches_issued: Arc<AtomicUsize>,
    shape: tokio::sync::OnceCell<ObjectSchema>,
}

#[derive(Default)]
struct LazyState {
    /// Field name → where its value comes from, in request order
    memo: Vec<(String, FieldSource)>,
    pending: Option<PendingBatch>,
}

#[derive(Clone)]
enum FieldSource {
    Known(Arc<RawDocument>),
    Batch(BatchFuture),
}

impl FieldSource {
    fn future(&self) -> BatchFuture {
        match self {
            FieldSource::Known(document) => ready_batch(document.clone()),
            FieldSource::Batch(batch) => batch.clone(),
        }
    }

    fn settled(&self) -> Option<&RawDocument> {
        match self {
            FieldSource::Known(document) => Some(document),
            FieldSource::Batch(batch) => match batch.peek() {
                Some(Ok(document)) => Some(document),
                _ => None,
            },
        }
    }
}

struct PendingBatch {
    /// `None` once the batch has fired
    fields: Arc<Mutex<Option<Vec<String>>>>,
    future: BatchFuture,
}

impl LazyDocument {
    pub(crate) fn new(
        definition: Arc<CollectionDefinition>,
        id: DocumentId,
        store: Arc<dyn DocumentStore>,
        strict: bool,
    ) -> Self {
        Self {
            inner: Arc::new(LazyInner {
                id,
                definition,
                store,
                strict,
                state: Mutex::new(LazyState::default()),
                read_gate: Arc::new(tokio::sync::Mutex::new(())),
                batches_issued: Arc::new(AtomicUsize::new(0)),
                shape: tokio::sync::OnceCell::new(),
            }),
        }
    }

    /// Seed the memo with already known raw values (never read again)
    pub fn with_known(self, known: RawDocument) -> Self {
        let known = Arc::new(known);
        {
            let mut state = self.inner.state.lock();
            for key in known.keys().filter(|key| *key != ID_FIELD) {
                if !state.memo.iter().any(|(name, _)| name == key) {
                    state
                        .memo
                        .push((key.clone(), FieldSource::Known(known.clone())));
                }
            }
        }
        self
    }

    pub fn id(&self) -> DocumentId {
        self.inner.id
    }

    pub fn definition(&self) -> &Arc<CollectionDefinition> {
        &self.inner.definition
    }

    pub fn collection(&self) -> &str {
        self.inner.definition.collection()
    }

    /// Number of storage reads this document (and its clones) performed
    pub fn batches_issued(&self) -> usize {
        self.inner.batches_issued.load(Ordering::SeqCst)
    }

    /// Raw stored value of `field`, `None` when the document lacks it.
    ///
    /// The field is registered immediately; the returned future only waits
    /// for the batch carrying it.
    pub fn get_raw(
        &self,
        field: &str,
    ) -> impl Future<Output = Result<Option<Value>, DocumentError>> + Send + 'static {
        let batch = self.inner.request(field);
        let field = field.to_string();
        async move {
            let document = batch.await?;
            Ok(document.get(&field).cloned())
        }
    }

    /// Validated value of `field`, `None` when the document lacks it
    pub async fn get(&self, field: &str) -> Result<Option<HydratedValue>, DocumentError> {
        if field == ID_FIELD {
            return Ok(Some(HydratedValue::from(self.inner.id)));
        }
        self.get_raw(field).await?;
        let mut parsed = self.validate_known(&[field]).await?;
        Ok(parsed.remove(field))
    }

    /// Validated values of several fields, loaded in one batch.
    /// Fields the document lacks are left out.
    pub async fn collect(&self, fields: &[&str]) -> Result<HydratedMap, DocumentError> {
        let loads: Vec<_> = fields.iter().map(|field| self.get_raw(field)).collect();
        for result in join_all(loads).await {
            result?;
        }
        let parsed = self.validate_known(fields).await?;
        Ok(fields
            .iter()
            .filter_map(|field| parsed.get(field).map(|value| (field.to_string(), value.clone())))
            .collect())
    }

    /// Every raw value loaded so far, `_id` first
    pub fn loaded(&self) -> RawDocument {
        self.inner.settled_fields()
    }

    /// Validate the document-so-far against the schema picked down to its keys
    /// plus `requested`.
    async fn validate_known(&self, requested: &[&str]) -> Result<HydratedMap, DocumentError> {
        let known = self.inner.settled_fields();
        let shape = self.shape().await?;

        let mut keys: Vec<&str> = known.keys().map(String::as_str).collect();
        keys.extend(requested.iter().copied().filter(|f| !known.contains_key(*f)));
        let schema = SchemaNode::Object(shape.pick(keys));

        let input = HydratedValue::from(known);
        let database = self.inner.definition.database()?;
        Validator::new(&database)
            .strict(self.inner.strict)
            .parse_document(&schema, &input)
            .await
    }

    async fn shape(&self) -> Result<&ObjectSchema, DocumentError> {
        self.inner
            .shape
            .get_or_try_init(|| async {
                self.inner
                    .definition
                    .field_shape(|field| self.get_raw(&field))
                    .await
            })
            .await
    }
}

impl LazyInner {
    /// Memoized batch for `field`, registering it in the open batch if needed
    fn request(&self, field: &str) -> BatchFuture {
        if field == ID_FIELD {
            let mut document = RawDocument::new();
            document.insert(ID_FIELD.to_string(), self.id.to_value());
            return ready_batch(Arc::new(document));
        }

        let mut state = self.state.lock();
        if let Some((_, source)) = state.memo.iter().find(|(name, _)| name == field) {
            return source.future();
        }

        // Join the open batch unless it already collected its field list
        let joined = state.pending.as_ref().and_then(|pending| {
            pending.fields.lock().as_mut().map(|fields| {
                fields.push(field.to_string());
                pending.future.clone()
            })
        });
        let batch = match joined {
            Some(batch) => batch,
            None => {
                let pending = self.open_batch(field);
                let future = pending.future.clone();
                state.pending = Some(pending);
                future
            }
        };

        state
            .memo
            .push((field.to_string(), FieldSource::Batch(batch.clone())));
        batch
    }

    fn open_batch(&self, first: &str) -> PendingBatch {
        let fields = Arc::new(Mutex::new(Some(vec![first.to_string()])));

        let requested = fields.clone();
        let store = self.store.clone();
        let gate = self.read_gate.clone();
        let issued = self.batches_issued.clone();
        let collection = self.definition.collection().to_string();
        let id = self.id;

        let future = async move {
            tokio::task::yield_now().await;
            let _guard = gate.lock().await;

            let names = requested.lock().take().unwrap_or_default();
            issued.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(
                "Loading {} field(s) of {}/{}: {:?}",
                names.len(),
                collection,
                id,
                names
            );

            let projection = Projection::Include(names);
            match store
                .find_one(&collection, &Filter::id(id), Some(&projection), None)
                .await?
            {
                Some(document) => Ok(Arc::new(document)),
                None => Err(DocumentError::not_found(collection, id)),
            }
        }
        .boxed()
        .shared();

        PendingBatch { fields, future }
    }

    /// `_id` plus every field whose batch has settled successfully
    fn settled_fields(&self) -> RawDocument {
        let mut document = RawDocument::new();
        document.insert(ID_FIELD.to_string(), self.id.to_value());

        let state = self.state.lock();
        for (name, source) in &state.memo {
            if let Some(value) = source.settled().and_then(|loaded| loaded.get(name)) {
                document.insert(name.clone(), value.clone());
            }
        }
        document
    }
}

fn ready_batch(document: Arc<RawDocument>) -> BatchFuture {
    futures::future::ready(Ok(document)).boxed().shared()
}

impl fmt::Debug for LazyDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyDocument")
            .field("collection", &self.collection())
            .field("id", &self.inner.id)
            .field("batches_issued", &self.batches_issued())
            .finish_non_exhaustive()
    }
}
