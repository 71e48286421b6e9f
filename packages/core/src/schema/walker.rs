//! Schema Node Walker
//!
//! Two traversals over [`SchemaNode`] trees that share the same rules for
//! transparent nodes (wrappers pass through, deferred nodes resolve on demand):
//!
//! - **Structural**: [`validate_root`] checks the collection-root invariant and
//!   [`field_shape`] finds the field map for one concrete document, resolving
//!   discriminated unions through a caller-supplied accessor.
//! - **Path-enumerating**: [`reference_sites`] lists every reference marker with
//!   the dotted path needed to reach it (`$` marks "every element of this array").

use crate::models::{ObjectSchema, ReferenceMarker, SchemaNode, ID_FIELD};
use crate::schema::SchemaError;
use crate::services::DocumentError;
use crate::validation::ValidationError;
use serde_json::Value;
use std::future::Future;

/// Marker segment for "inside this array"
pub const ARRAY_SEGMENT: &str = "$";

/// Check that `schema` reaches an object declaring `_id` through wrapper and
/// discriminated-union nodes only.
pub fn validate_root(model: &str, schema: &SchemaNode) -> Result<(), SchemaError> {
    check_root(model, schema, &mut Vec::new())
}

fn check_root(model: &str, node: &SchemaNode, active: &mut Vec<String>) -> Result<(), SchemaError> {
    match node {
        SchemaNode::Object(object) => {
            if object.contains(ID_FIELD) {
                Ok(())
            } else {
                Err(SchemaError::missing_identifier(model))
            }
        }
        SchemaNode::DiscriminatedUnion(du) => {
            if du.options.is_empty() {
                return Err(SchemaError::EmptyDiscriminatedUnion {
                    model: model.to_string(),
                    discriminator: du.discriminator.clone(),
                });
            }
            for option in &du.options {
                check_root(model, option, active)?;
            }
            Ok(())
        }
        SchemaNode::Wrapper(_, inner) => check_root(model, inner, active),
        SchemaNode::Deferred(deferred) => {
            if active.iter().any(|label| label == deferred.label()) {
                return Err(SchemaError::cyclic(model, deferred.label()));
            }
            active.push(deferred.label().to_string());
            let result = check_root(model, &deferred.resolve(), active);
            active.pop();
            result
        }
        SchemaNode::Union(_) => Err(SchemaError::unsupported(
            model,
            "union",
            "plain unions are not supported before the first object",
        )),
        SchemaNode::Tuple(_) => Err(SchemaError::unsupported(
            model,
            "tuple",
            "tuples are not supported before the first object",
        )),
        SchemaNode::Record(_) => Err(SchemaError::unsupported(
            model,
            "record",
            "open maps are not supported as a collection root",
        )),
        SchemaNode::Array(_) | SchemaNode::Reference(_) | SchemaNode::Leaf(_) => {
            Err(SchemaError::unsupported(
                model,
                node.kind_name(),
                "must reach an object before any other node kind",
            ))
        }
    }
}

/// Field map applicable to one concrete document.
///
/// Discriminated unions are resolved by awaiting `resolver` with the
/// discriminator field name; it yields the raw stored value (or `None`).
pub async fn field_shape<F, Fut>(
    model: &str,
    schema: &SchemaNode,
    mut resolver: F,
) -> Result<ObjectSchema, DocumentError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<Option<Value>, DocumentError>>,
{
    let mut current = schema.clone();
    let mut active: Vec<String> = Vec::new();

    loop {
        current = match current {
            SchemaNode::Object(object) => return Ok(object),
            SchemaNode::DiscriminatedUnion(du) => {
                let value = resolver(du.discriminator.clone()).await?.unwrap_or(Value::Null);
                match du.select(&value) {
                    Some(option) => option.clone(),
                    None => {
                        return Err(ValidationError::new(
                            du.discriminator.clone(),
                            format!(
                                "invalid discriminator value {value}, expected one of {:?}",
                                du.valid_values()
                            ),
                        )
                        .into())
                    }
                }
            }
            SchemaNode::Wrapper(_, inner) => *inner,
            SchemaNode::Deferred(deferred) => {
                if active.iter().any(|label| label == deferred.label()) {
                    return Err(SchemaError::cyclic(model, deferred.label()).into());
                }
                active.push(deferred.label().to_string());
                deferred.resolve()
            }
            other => {
                return Err(SchemaError::unsupported(
                    model,
                    other.kind_name(),
                    "must reach an object before any other node kind",
                )
                .into())
            }
        };
    }
}

/// A reference marker found in a schema, with the path leading to it
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceSite {
    pub path: Vec<String>,
    pub marker: ReferenceMarker,
}

impl ReferenceSite {
    pub fn dotted_path(&self) -> String {
        self.path.join(".")
    }
}

/// Every reference marker reachable from `schema`, in field declaration order.
///
/// Unions contribute all of their options at the same path, tuple items use
/// their index as a path segment. A deferred node is expanded at most once per
/// path: re-entering the same label stops that branch, since deeper copies
/// cannot be addressed by a finite path.
pub fn reference_sites(model: &str, schema: &SchemaNode) -> Result<Vec<ReferenceSite>, SchemaError> {
    let mut sites = Vec::new();
    collect_sites(model, schema, &mut Vec::new(), &mut Vec::new(), &mut sites)?;
    Ok(sites)
}

fn collect_sites(
    model: &str,
    node: &SchemaNode,
    path: &mut Vec<String>,
    active: &mut Vec<String>,
    sites: &mut Vec<ReferenceSite>,
) -> Result<(), SchemaError> {
    match node {
        SchemaNode::Reference(marker) => sites.push(ReferenceSite {
            path: path.clone(),
            marker: marker.clone(),
        }),
        SchemaNode::Object(object) => {
            for (name, field) in object.fields() {
                path.push(name.to_string());
                let result = collect_sites(model, field, path, active, sites);
                path.pop();
                result?;
            }
        }
        SchemaNode::Array(element) => {
            path.push(ARRAY_SEGMENT.to_string());
            let result = collect_sites(model, element, path, active, sites);
            path.pop();
            result?;
        }
        SchemaNode::Union(options) => {
            for option in options {
                collect_sites(model, option, path, active, sites)?;
            }
        }
        SchemaNode::DiscriminatedUnion(du) => {
            for option in &du.options {
                collect_sites(model, option, path, active, sites)?;
            }
        }
        SchemaNode::Tuple(items) => {
            for (index, item) in items.iter().enumerate() {
                path.push(index.to_string());
                let result = collect_sites(model, item, path, active, sites);
                path.pop();
                result?;
            }
        }
        SchemaNode::Wrapper(_, inner) => collect_sites(model, inner, path, active, sites)?,
        SchemaNode::Deferred(deferred) => {
            if active.iter().any(|label| label == deferred.label()) {
                tracing::debug!(
                    "Stopping at recursive schema '{}' in '{}' (path '{}')",
                    deferred.label(),
                    model,
                    path.join(".")
                );
                return Ok(());
            }
            active.push(deferred.label().to_string());
            let result = collect_sites(model, &deferred.resolve(), path, active, sites);
            active.pop();
            result?;
        }
        SchemaNode::Record(_) => {
            return Err(SchemaError::unsupported(
                model,
                "record",
                format!("open map at '{}' cannot be indexed", path.join(".")),
            ))
        }
        SchemaNode::Leaf(_) => {}
    }
    Ok(())
}
