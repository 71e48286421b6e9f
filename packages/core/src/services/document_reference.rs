//! Document References
//!
//! A [`DocumentReference`] is the parsed form of an embedding point: "document
//! `id` of collection C, with these fields known". The known-value cache always
//! holds `_id` first and is what gets written to storage when the owning
//! document is flattened.

use crate::db::{Filter, Projection, RawDocument};
use crate::models::{DocumentId, FieldMask, HydratedMap, HydratedValue, ID_FIELD};
use crate::schema::CollectionDefinition;
use crate::services::{DocumentError, LazyDocument};
use crate::validation::Validator;
use std::fmt;
use std::sync::Arc;

/// Immutable pointer to a document plus a cache of its known raw fields
#[derive(Clone)]
pub struct DocumentReference {
    id: DocumentId,
    definition: Arc<CollectionDefinition>,
    mask: Option<FieldMask>,
    known: RawDocument,
}

impl DocumentReference {
    pub fn new(
        definition: Arc<CollectionDefinition>,
        id: DocumentId,
        mask: Option<FieldMask>,
        known: RawDocument,
    ) -> Self {
        let mut cache = RawDocument::new();
        cache.insert(ID_FIELD.to_string(), id.to_value());
        for (key, value) in known {
            if key != ID_FIELD {
                cache.insert(key, value);
            }
        }

        Self {
            id,
            definition,
            mask,
            known: cache,
        }
    }

    pub fn id(&self) -> DocumentId {
        self.id
    }

    pub fn definition(&self) -> &Arc<CollectionDefinition> {
        &self.definition
    }

    pub fn collection(&self) -> &str {
        self.definition.collection()
    }

    /// `None` for a full reference
    pub fn mask(&self) -> Option<&FieldMask> {
        self.mask.as_ref()
    }

    pub fn is_full(&self) -> bool {
        self.mask.is_none()
    }

    /// Known raw fields, `_id` included. Never touches storage.
    pub fn get_existing(&self) -> &RawDocument {
        &self.known
    }

    /// Copy with `fields` merged over the cache
    pub fn with_known(&self, fields: RawDocument) -> Self {
        let mut known = self.known.clone();
        for (key, value) in fields {
            if key != ID_FIELD {
                known.insert(key, value);
            }
        }
        Self {
            id: self.id,
            definition: self.definition.clone(),
            mask: self.mask.clone(),
            known,
        }
    }

    /// Lazy view of the referenced document, seeded with the cache
    pub fn resolve(&self) -> Result<LazyDocument, DocumentError> {
        let database = self.definition.database()?;
        Ok(database
            .lazy_document(self.definition.clone(), self.id)
            .with_known(self.known.clone()))
    }

    /// The whole referenced document, validated.
    ///
    /// A full reference refetches the document; a masked one fetches only the
    /// fields it does not know yet and merges them with the cache. Either way
    /// this is one read.
    pub async fn resolve_full(&self) -> Result<HydratedMap, DocumentError> {
        let database = self.definition.database()?;
        let filter = Filter::id(self.id);

        let document = match &self.mask {
            None => database
                .store()
                .find_one(self.collection(), &filter, None, None)
                .await?
                .ok_or_else(|| DocumentError::not_found(self.collection(), self.id))?,
            Some(_) => {
                let projection = Projection::exclude(self.known.keys().cloned());
                let rest = database
                    .store()
                    .find_one(self.collection(), &filter, Some(&projection), None)
                    .await?
                    .ok_or_else(|| DocumentError::not_found(self.collection(), self.id))?;
                let mut merged = self.known.clone();
                merged.extend(rest);
                merged
            }
        };

        Validator::new(&database)
            .parse_document(self.definition.schema(), &HydratedValue::from(document))
            .await
    }
}

impl PartialEq for DocumentReference {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.collection() == other.collection()
            && self.mask == other.mask
            && self.known == other.known
    }
}

impl fmt::Debug for DocumentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentReference")
            .field("collection", &self.collection())
            .field("id", &self.id)
            .field("mask", &self.mask)
            .field("known", &self.known)
            .finish()
    }
}
