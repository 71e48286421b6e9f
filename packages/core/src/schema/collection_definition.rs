//! Collection Definitions
//!
//! A [`CollectionDefinition`] binds a model name to its schema tree. The root
//! invariant is checked once at construction; afterwards the definition is
//! registered into exactly one [`Database`], which it reaches through a weak
//! back-reference so that the database stays the single owner.

use crate::models::{ObjectSchema, SchemaNode};
use crate::schema::walker::{self, ReferenceSite};
use crate::schema::SchemaError;
use crate::services::database::DatabaseInner;
use crate::services::{Database, DocumentError};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock, Weak};

/// Model name plus schema for one collection
pub struct CollectionDefinition {
    model_name: String,
    schema: SchemaNode,
    database: OnceLock<Weak<DatabaseInner>>,
}

impl CollectionDefinition {
    /// Build a definition, checking that the schema root reaches an object
    /// declaring `_id`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use denorm_core::models::schema_node::{id, object, string};
    /// use denorm_core::schema::CollectionDefinition;
    ///
    /// let photo = CollectionDefinition::new(
    ///     "Photo",
    ///     object().field("_id", id()).field("url", string()),
    /// )
    /// .unwrap();
    /// assert_eq!(photo.model_name(), "Photo");
    /// assert!(!photo.is_registered());
    /// ```
    pub fn new(
        model_name: impl Into<String>,
        schema: impl Into<SchemaNode>,
    ) -> Result<Arc<Self>, SchemaError> {
        let model_name = model_name.into();
        let schema = schema.into();
        walker::validate_root(&model_name, &schema)?;

        Ok(Arc::new(Self {
            model_name,
            schema,
            database: OnceLock::new(),
        }))
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Storage collection name (the model name)
    pub fn collection(&self) -> &str {
        &self.model_name
    }

    pub fn schema(&self) -> &SchemaNode {
        &self.schema
    }

    /// Field map for one concrete document; `resolver` yields raw field values
    /// when a discriminated union has to be resolved.
    pub async fn field_shape<F, Fut>(&self, resolver: F) -> Result<ObjectSchema, DocumentError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<Option<Value>, DocumentError>>,
    {
        walker::field_shape(&self.model_name, &self.schema, resolver).await
    }

    /// Every reference marker this schema embeds
    pub fn reference_sites(&self) -> Result<Vec<ReferenceSite>, SchemaError> {
        walker::reference_sites(&self.model_name, &self.schema)
    }

    /// Owning database, `Unregistered` until [`Database::add_definition`] ran
    pub fn database(&self) -> Result<Database, DocumentError> {
        self.database
            .get()
            .and_then(Weak::upgrade)
            .map(Database::from_inner)
            .ok_or_else(|| DocumentError::unregistered(&self.model_name))
    }

    pub fn is_registered(&self) -> bool {
        self.database().is_ok()
    }

    pub(crate) fn attach(&self, database: &Arc<DatabaseInner>) -> Result<(), DocumentError> {
        self.database
            .set(Arc::downgrade(database))
            .map_err(|_| DocumentError::already_registered(&self.model_name))
    }
}

impl fmt::Debug for CollectionDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionDefinition")
            .field("model_name", &self.model_name)
            .field("registered", &self.is_registered())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::schema_node::{discriminated_union, id, literal, number, object, string};
    use crate::services::DocumentError;

    #[test]
    fn test_new_rejects_missing_identifier() {
        let result = CollectionDefinition::new("User", object().field("name", string()));
        assert!(matches!(result, Err(SchemaError::MissingIdentifier { .. })));
    }

    #[test]
    fn test_unregistered_definition_has_no_database() {
        let definition =
            CollectionDefinition::new("User", object().field("_id", id())).unwrap();
        assert!(matches!(
            definition.database(),
            Err(DocumentError::Unregistered { .. })
        ));
    }

    #[tokio::test]
    async fn test_field_shape_through_definition() {
        let definition = CollectionDefinition::new(
            "Vehicle",
            discriminated_union(
                "kind",
                [
                    object().field("_id", id()).field("kind", literal("car")).field("doors", number()),
                    object().field("_id", id()).field("kind", literal("bike")),
                ],
            ),
        )
        .unwrap();

        let shape = definition
            .field_shape(|_| async { Ok::<_, DocumentError>(Some(Value::from("car"))) })
            .await
            .unwrap();
        assert_eq!(shape.keys().collect::<Vec<_>>(), vec!["_id", "kind", "doors"]);
    }
}
