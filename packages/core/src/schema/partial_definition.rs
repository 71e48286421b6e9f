//! Partial Definitions
//!
//! Named, reusable schema fragments registered on a database. They are not
//! collections: no root invariant applies and nothing is stored under their
//! name, but they are validated (and their references hydrated) through
//! [`Database::hydrate_partial`](crate::services::Database::hydrate_partial).

use crate::models::SchemaNode;
use crate::services::database::DatabaseInner;
use crate::services::{Database, DocumentError};
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

pub struct PartialDefinition {
    name: String,
    schema: SchemaNode,
    database: OnceLock<Weak<DatabaseInner>>,
}

impl PartialDefinition {
    pub fn new(name: impl Into<String>, schema: impl Into<SchemaNode>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            schema: schema.into(),
            database: OnceLock::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &SchemaNode {
        &self.schema
    }

    pub fn database(&self) -> Result<Database, DocumentError> {
        self.database
            .get()
            .and_then(Weak::upgrade)
            .map(Database::from_inner)
            .ok_or_else(|| DocumentError::unregistered(&self.name))
    }

    pub(crate) fn attach(&self, database: &Arc<DatabaseInner>) -> Result<(), DocumentError> {
        self.database
            .set(Arc::downgrade(database))
            .map_err(|_| DocumentError::already_registered(&self.name))
    }
}

/// Embed the partial's schema inside another schema
impl From<&PartialDefinition> for SchemaNode {
    fn from(partial: &PartialDefinition) -> Self {
        partial.schema.clone()
    }
}

impl From<&Arc<PartialDefinition>> for SchemaNode {
    fn from(partial: &Arc<PartialDefinition>) -> Self {
        partial.schema.clone()
    }
}

impl fmt::Debug for PartialDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartialDefinition")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
