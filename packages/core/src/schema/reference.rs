//! Reference marker builders.
//!
//! ```rust
//! use denorm_core::models::schema_node::{id, object};
//! use denorm_core::schema::reference;
//!
//! let post = object()
//!     .field("_id", id())
//!     .field("author", reference::partial("User", ["name"]))
//!     .field("cover", reference::full("Photo").optional())
//!     .field("editor", reference::id_only("User"));
//! assert_eq!(post.len(), 4);
//! ```

use crate::models::{FieldMask, ReferenceMarker, SchemaNode};
use crate::schema::CollectionDefinition;
use std::sync::Arc;

/// Anything naming a target collection
pub trait ReferenceTarget {
    fn target_name(self) -> String;
}

impl ReferenceTarget for &str {
    fn target_name(self) -> String {
        self.to_string()
    }
}

impl ReferenceTarget for String {
    fn target_name(self) -> String {
        self
    }
}

impl ReferenceTarget for &CollectionDefinition {
    fn target_name(self) -> String {
        self.model_name().to_string()
    }
}

impl ReferenceTarget for &Arc<CollectionDefinition> {
    fn target_name(self) -> String {
        self.model_name().to_string()
    }
}

/// Embed a complete copy of the target document
pub fn full(target: impl ReferenceTarget) -> SchemaNode {
    SchemaNode::Reference(ReferenceMarker {
        target: target.target_name(),
        mask: None,
    })
}

/// Embed `_id` plus the listed fields of the target document
pub fn partial<I, S>(target: impl ReferenceTarget, fields: I) -> SchemaNode
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    SchemaNode::Reference(ReferenceMarker {
        target: target.target_name(),
        mask: Some(FieldMask::new(fields)),
    })
}

/// Embed only `_id`
pub fn id_only(target: impl ReferenceTarget) -> SchemaNode {
    SchemaNode::Reference(ReferenceMarker {
        target: target.target_name(),
        mask: Some(FieldMask::default()),
    })
}
