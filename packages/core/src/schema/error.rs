//! Schema Error Types
//!
//! Construction-time failures raised while walking a schema tree. These are
//! never retried: a schema that violates an invariant is a programming error.

use thiserror::Error;

/// Schema invariant violations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// The reachable root object does not declare `_id`
    #[error("Schema for '{model}' must declare an `_id` field on its root object")]
    MissingIdentifier { model: String },

    /// A node kind that cannot appear at this position
    #[error("Unsupported {kind} node in '{model}': {context}")]
    UnsupportedNode {
        model: String,
        kind: &'static str,
        context: String,
    },

    /// A deferred node that resolves back to itself without reaching an object
    #[error("Deferred schema '{label}' in '{model}' never reaches an object")]
    CyclicDeferred { model: String, label: String },

    /// A discriminated union without options
    #[error("Discriminated union on '{discriminator}' in '{model}' has no options")]
    EmptyDiscriminatedUnion { model: String, discriminator: String },
}

impl SchemaError {
    pub fn missing_identifier(model: impl Into<String>) -> Self {
        Self::MissingIdentifier {
            model: model.into(),
        }
    }

    pub fn unsupported(
        model: impl Into<String>,
        kind: &'static str,
        context: impl Into<String>,
    ) -> Self {
        Self::UnsupportedNode {
            model: model.into(),
            kind,
            context: context.into(),
        }
    }

    pub fn cyclic(model: impl Into<String>, label: impl Into<String>) -> Self {
        Self::CyclicDeferred {
            model: model.into(),
            label: label.into(),
        }
    }
}
