//! Database Orchestrator
//!
//! [`Database`] owns the registered definitions and the store handle, and
//! glues validation, flattening, writes and reference propagation together:
//!
//! - `create` / `replace`: validate, flatten, write
//! - `update`: read current, merge or apply, validate, replace, then refresh
//!   embedded copies elsewhere, all inside one transaction
//! - `get_references` / `update_references`: the indexer and the propagator
//!   as standalone operations
//!
//! Every write accepts a caller session; without one, multi-step operations
//! manage their own transaction. Validation always runs before the first
//! write, so a `ValidationFailure` never leaves partial data behind.
//!
//! # Examples
//!
//! ```rust
//! use denorm_core::db::InMemoryStore;
//! use denorm_core::models::schema_node::{id, object, string};
//! use denorm_core::schema::{reference, CollectionDefinition};
//! use denorm_core::services::Database;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let database = Database::new(Arc::new(InMemoryStore::new()));
//!     database.add_definition(CollectionDefinition::new(
//!         "User",
//!         object().field("_id", id()).field("name", string()),
//!     )?)?;
//!     database.add_definition(CollectionDefinition::new(
//!         "Post",
//!         object()
//!             .field("_id", id())
//!             .field("author", reference::partial("User", ["name"])),
//!     )?)?;
//!
//!     let user = database.create("User", json!({"name": "Ada"})).await?;
//!     let post = database
//!         .create("Post", json!({"author": user.to_raw()}))
//!         .await?;
//!     assert_eq!(post.to_raw()["author"]["name"], "Ada");
//!     Ok(())
//! }
//! ```

use crate::config::DatabaseConfig;
use crate::db::{DocumentStore, DomainEvent, Filter, RawDocument, Session};
use crate::models::{DocumentId, HydratedMap, HydratedValue, ID_FIELD};
use crate::schema::{CollectionDefinition, PartialDefinition};
use crate::services::propagator::{self, PropagationReport};
use crate::services::reference_graph::{index_references_to, ReferenceGraph};
use crate::services::transaction::with_transaction;
use crate::services::{DocumentError, LazyDocument};
use crate::validation::{ValidationError, Validator};
use futures::future::try_join_all;
use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Options for `create` / `replace` / `update_references`
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Run inside this session instead of autocommitting
    pub session: Option<Session>,
}

/// Options for `update`
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    pub session: Option<Session>,
    /// Refresh embedded copies afterwards; `None` uses the database config
    pub update_references: Option<bool>,
}

type ApplyFn = Box<dyn FnOnce(RawDocument) -> HydratedValue + Send>;

/// New content for `update`
pub enum UpdateInput {
    /// Shallow merge over the current stored document
    Patch(HydratedValue),
    /// Compute the new document from the current stored one
    Apply(ApplyFn),
}

impl UpdateInput {
    pub fn patch(fields: impl Into<HydratedValue>) -> Self {
        Self::Patch(fields.into())
    }

    pub fn apply<F>(f: F) -> Self
    where
        F: FnOnce(RawDocument) -> HydratedValue + Send + 'static,
    {
        Self::Apply(Box::new(f))
    }
}

impl fmt::Debug for UpdateInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateInput::Patch(value) => f.debug_tuple("Patch").field(value).finish(),
            UpdateInput::Apply(_) => f.write_str("Apply(..)"),
        }
    }
}

/// Registry of definitions over one document store
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

pub(crate) struct DatabaseInner {
    store: Arc<dyn DocumentStore>,
    config: DatabaseConfig,
    definitions: RwLock<Vec<Arc<CollectionDefinition>>>,
    partials: RwLock<Vec<Arc<PartialDefinition>>>,
    events: broadcast::Sender<DomainEvent>,
}

impl Database {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self::with_config(store, DatabaseConfig::default())
    }

    pub fn with_config(store: Arc<dyn DocumentStore>, config: DatabaseConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(DatabaseInner {
                store,
                config,
                definitions: RwLock::new(Vec::new()),
                partials: RwLock::new(Vec::new()),
                events,
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<DatabaseInner>) -> Self {
        Self { inner }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.inner.store
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.inner.config
    }

    /// Receive every domain event sent after this call
    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.inner.events.subscribe()
    }

    fn emit(&self, event: DomainEvent) {
        let _ = self.inner.events.send(event);
    }

    //
    // REGISTRATION
    //

    /// Register a collection definition; its model name must be unused and the
    /// definition must not belong to another database.
    pub fn add_definition(&self, definition: Arc<CollectionDefinition>) -> Result<(), DocumentError> {
        let mut definitions = self.inner.definitions.write();
        if definitions
            .iter()
            .any(|existing| existing.model_name() == definition.model_name())
        {
            return Err(DocumentError::already_registered(definition.model_name()));
        }
        definition.attach(&self.inner)?;
        tracing::debug!("Registered collection '{}'", definition.model_name());
        definitions.push(definition);
        Ok(())
    }

    pub fn add_definitions<I>(&self, definitions: I) -> Result<(), DocumentError>
    where
        I: IntoIterator<Item = Arc<CollectionDefinition>>,
    {
        for definition in definitions {
            self.add_definition(definition)?;
        }
        Ok(())
    }

    pub fn add_partial(&self, partial: Arc<PartialDefinition>) -> Result<(), DocumentError> {
        let mut partials = self.inner.partials.write();
        if partials.iter().any(|existing| existing.name() == partial.name()) {
            return Err(DocumentError::already_registered(partial.name()));
        }
        partial.attach(&self.inner)?;
        tracing::debug!("Registered partial '{}'", partial.name());
        partials.push(partial);
        Ok(())
    }

    pub fn definition(&self, name: &str) -> Result<Arc<CollectionDefinition>, DocumentError> {
        self.inner
            .definitions
            .read()
            .iter()
            .find(|definition| definition.model_name() == name)
            .cloned()
            .ok_or_else(|| DocumentError::unknown_collection(name))
    }

    pub fn partial(&self, name: &str) -> Result<Arc<PartialDefinition>, DocumentError> {
        self.inner
            .partials
            .read()
            .iter()
            .find(|partial| partial.name() == name)
            .cloned()
            .ok_or_else(|| DocumentError::unknown_collection(name))
    }

    /// Registered model names, in registration order
    pub fn definition_names(&self) -> Vec<String> {
        self.inner
            .definitions
            .read()
            .iter()
            .map(|definition| definition.model_name().to_string())
            .collect()
    }

    pub fn partial_names(&self) -> Vec<String> {
        self.inner
            .partials
            .read()
            .iter()
            .map(|partial| partial.name().to_string())
            .collect()
    }

    fn validator(&self) -> Validator {
        Validator::new(self)
    }

    //
    // WRITES
    //

    /// Validate and insert a new document. A missing `_id` is generated.
    pub async fn create(
        &self,
        collection: &str,
        input: impl Into<HydratedValue>,
    ) -> Result<HydratedMap, DocumentError> {
        self.create_with(collection, input, WriteOptions::default())
            .await
    }

    pub async fn create_with(
        &self,
        collection: &str,
        input: impl Into<HydratedValue>,
        options: WriteOptions,
    ) -> Result<HydratedMap, DocumentError> {
        let definition = self.definition(collection)?;

        let mut input = input.into();
        if let HydratedValue::Object(fields) = &mut input {
            if !fields.contains_key(ID_FIELD) {
                fields.insert(ID_FIELD, HydratedValue::from(DocumentId::new()));
            }
        }

        let document = self
            .validator()
            .parse_document(definition.schema(), &input)
            .await?;
        let id = document_id(&document)?;

        self.inner
            .store
            .insert_one(collection, document.to_raw(), options.session.as_ref())
            .await?;

        tracing::info!("Created {}/{}", collection, id);
        self.emit(DomainEvent::DocumentCreated {
            collection: collection.to_string(),
            id,
        });
        Ok(document)
    }

    /// Validate and replace the stored document with the same `_id`
    pub async fn replace(
        &self,
        collection: &str,
        input: impl Into<HydratedValue>,
    ) -> Result<HydratedMap, DocumentError> {
        self.replace_with(collection, input, WriteOptions::default())
            .await
    }

    pub async fn replace_with(
        &self,
        collection: &str,
        input: impl Into<HydratedValue>,
        options: WriteOptions,
    ) -> Result<HydratedMap, DocumentError> {
        let definition = self.definition(collection)?;
        let document = self
            .validator()
            .parse_document(definition.schema(), &input.into())
            .await?;
        let id = document_id(&document)?;

        let replaced = self
            .inner
            .store
            .replace_one(
                collection,
                &Filter::id(id),
                document.to_raw(),
                options.session.as_ref(),
            )
            .await?;
        if !replaced {
            return Err(DocumentError::not_found(collection, id));
        }

        tracing::info!("Replaced {}/{}", collection, id);
        self.emit(DomainEvent::DocumentReplaced {
            collection: collection.to_string(),
            id,
        });
        Ok(document)
    }

    /// Update a stored document and, unless disabled, every embedded copy of it
    pub async fn update(
        &self,
        collection: &str,
        id: DocumentId,
        input: UpdateInput,
    ) -> Result<HydratedMap, DocumentError> {
        self.update_with(collection, id, input, UpdateOptions::default())
            .await
    }

    pub async fn update_with(
        &self,
        collection: &str,
        id: DocumentId,
        input: UpdateInput,
        options: UpdateOptions,
    ) -> Result<HydratedMap, DocumentError> {
        let definition = &self.definition(collection)?;
        let propagate = options
            .update_references
            .unwrap_or(self.inner.config.propagate_on_update);
        let store = self.inner.store.as_ref();

        let (document, report) =
            with_transaction(store, options.session.as_ref(), "update", |session| {
                async move {
                    let current = store
                        .find_one(collection, &Filter::id(id), None, Some(&session))
                        .await?
                        .ok_or_else(|| DocumentError::not_found(collection, id))?;

                    let next = match input {
                        UpdateInput::Patch(patch) => merge_patch(current, patch)?,
                        UpdateInput::Apply(apply) => apply(current),
                    };

                    let document = self
                        .validator()
                        .parse_document(definition.schema(), &next)
                        .await?;
                    if document_id(&document)? != id {
                        return Err(ValidationError::new(ID_FIELD, "cannot change `_id`").into());
                    }

                    store
                        .replace_one(collection, &Filter::id(id), document.to_raw(), Some(&session))
                        .await?;

                    let report = if propagate {
                        Some(propagator::propagate_update(self, definition, id, session).await?)
                    } else {
                        None
                    };
                    Ok::<_, DocumentError>((document, report))
                }
                .boxed()
            })
            .await?;

        tracing::info!("Updated {}/{}", collection, id);
        self.emit(DomainEvent::DocumentUpdated {
            collection: collection.to_string(),
            id,
        });
        if let Some(report) = report {
            self.emit_propagated(&report);
        }
        Ok(document)
    }

    //
    // REFERENCES
    //

    /// Every place another collection embeds documents of `collection`
    pub fn get_references(&self, collection: &str) -> Result<ReferenceGraph, DocumentError> {
        self.definition(collection)?;
        let definitions = self.inner.definitions.read().clone();
        Ok(index_references_to(&definitions, collection)?)
    }

    /// Refresh every embedded copy of `collection/id` from the stored document
    pub async fn update_references(
        &self,
        collection: &str,
        id: DocumentId,
    ) -> Result<PropagationReport, DocumentError> {
        self.update_references_with(collection, id, WriteOptions::default())
            .await
    }

    pub async fn update_references_with(
        &self,
        collection: &str,
        id: DocumentId,
        options: WriteOptions,
    ) -> Result<PropagationReport, DocumentError> {
        let definition = &self.definition(collection)?;
        let store = self.inner.store.as_ref();

        let report = with_transaction(store, options.session.as_ref(), "propagate", |session| {
            propagator::propagate_update(self, definition, id, session).boxed()
        })
        .await?;

        self.emit_propagated(&report);
        Ok(report)
    }

    fn emit_propagated(&self, report: &PropagationReport) {
        tracing::info!(
            "Propagated {}/{} to {} document(s)",
            report.collection,
            report.id,
            report.total_modified()
        );
        self.emit(DomainEvent::ReferencesPropagated {
            collection: report.collection.clone(),
            id: report.id,
            documents: report.total_modified(),
        });
    }

    //
    // READS
    //

    /// Lazy handle on `collection/id`; nothing is read until a field is requested
    pub fn find_one_lazy(&self, collection: &str, id: DocumentId) -> Result<LazyDocument, DocumentError> {
        Ok(self.lazy_document(self.definition(collection)?, id))
    }

    pub(crate) fn lazy_document(
        &self,
        definition: Arc<CollectionDefinition>,
        id: DocumentId,
    ) -> LazyDocument {
        LazyDocument::new(
            definition,
            id,
            self.inner.store.clone(),
            self.inner.config.strict_lazy_validation,
        )
    }

    /// Validate a raw (or partially hydrated) document of `collection`
    pub async fn hydrate(
        &self,
        collection: &str,
        document: impl Into<HydratedValue>,
    ) -> Result<HydratedMap, DocumentError> {
        let definition = self.definition(collection)?;
        self.validator()
            .parse_document(definition.schema(), &document.into())
            .await
    }

    pub async fn hydrate_many<I, D>(
        &self,
        collection: &str,
        documents: I,
    ) -> Result<Vec<HydratedMap>, DocumentError>
    where
        I: IntoIterator<Item = D>,
        D: Into<HydratedValue>,
    {
        let definition = self.definition(collection)?;
        let inputs: Vec<HydratedValue> = documents.into_iter().map(Into::into).collect();
        let validator = self.validator();
        try_join_all(
            inputs
                .iter()
                .map(|input| validator.parse_document(definition.schema(), input)),
        )
        .await
    }

    /// Validate `input` against a registered partial
    pub async fn hydrate_partial(
        &self,
        name: &str,
        input: impl Into<HydratedValue>,
    ) -> Result<HydratedValue, DocumentError> {
        let partial = self.partial(name)?;
        self.validator().parse(partial.schema(), &input.into()).await
    }

    /// Flatten a hydrated value to its storable form
    pub fn get_raw_document(&self, value: &HydratedValue) -> Value {
        value.to_raw()
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("definitions", &self.definition_names())
            .field("partials", &self.partial_names())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

fn document_id(document: &HydratedMap) -> Result<DocumentId, DocumentError> {
    document
        .get(ID_FIELD)
        .and_then(HydratedValue::as_str)
        .and_then(DocumentId::parse)
        .ok_or_else(|| ValidationError::new(ID_FIELD, "missing document id").into())
}

fn merge_patch(current: RawDocument, patch: HydratedValue) -> Result<HydratedValue, DocumentError> {
    let patch = match patch {
        HydratedValue::Object(fields) => fields,
        other => return Err(ValidationError::expected("", "object patch", other.kind()).into()),
    };
    let mut merged = match HydratedValue::from(current) {
        HydratedValue::Object(fields) => fields,
        _ => HydratedMap::new(),
    };
    for (key, value) in patch {
        merged.insert(key, value);
    }
    Ok(HydratedValue::Object(merged))
}
