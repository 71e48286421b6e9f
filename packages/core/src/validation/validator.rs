//! Schema Validator
//!
//! Parses [`HydratedValue`] input against a [`SchemaNode`] tree. The walk is
//! async because reference markers may have to load masked fields of the
//! referenced document; recursion goes through boxed futures.
//!
//! Output follows the schema, not the input: object fields come out in
//! declaration order, unknown keys are stripped (or rejected in strict mode),
//! defaults are filled in and effect transforms applied.

use crate::models::{
    DocumentId, FieldMask, HydratedMap, HydratedValue, LeafKind, ReferenceMarker, SchemaNode,
    WrapperKind, ID_FIELD,
};
use crate::schema::CollectionDefinition;
use crate::services::{Database, DocumentError, DocumentReference, LazyDocument};
use crate::validation::ValidationError;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Schema parser bound to the database that resolves reference targets
#[derive(Clone)]
pub struct Validator {
    database: Database,
    strict: bool,
}

impl Validator {
    pub fn new(database: &Database) -> Self {
        Self {
            database: database.clone(),
            strict: false,
        }
    }

    /// Reject object keys the schema does not declare instead of dropping them
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Parse `input` against `node`
    pub async fn parse(
        &self,
        node: &SchemaNode,
        input: &HydratedValue,
    ) -> Result<HydratedValue, DocumentError> {
        match self.parse_node(node, Some(input), String::new()).await? {
            Some(value) => Ok(value),
            None => Err(ValidationError::required("").into()),
        }
    }

    /// Parse a document root, which must come out as an object
    pub async fn parse_document(
        &self,
        node: &SchemaNode,
        input: &HydratedValue,
    ) -> Result<HydratedMap, DocumentError> {
        match self.parse(node, input).await? {
            HydratedValue::Object(map) => Ok(map),
            other => Err(ValidationError::expected("", "object", other.kind()).into()),
        }
    }

    /// `Ok(None)` means "absent": an optional field that was not given.
    fn parse_node<'s>(
        &'s self,
        node: &'s SchemaNode,
        input: Option<&'s HydratedValue>,
        path: String,
    ) -> BoxFuture<'s, Result<Option<HydratedValue>, DocumentError>> {
        async move {
            match node {
                SchemaNode::Wrapper(kind, inner) => self.parse_wrapper(kind, inner, input, path).await,
                SchemaNode::Deferred(deferred) => {
                    let resolved = deferred.resolve();
                    self.parse_node(&resolved, input, path).await
                }
                SchemaNode::Object(object) => {
                    let Some(input) = input else {
                        return Err(ValidationError::required(path).into());
                    };
                    let HydratedValue::Object(fields) = input else {
                        return Err(ValidationError::expected(path, "object", input.kind()).into());
                    };
                    if self.strict {
                        if let Some(unknown) = fields.keys().find(|key| !object.contains(key)) {
                            return Err(ValidationError::new(
                                path,
                                format!("unrecognized key '{unknown}'"),
                            )
                            .into());
                        }
                    }
                    let mut output = HydratedMap::new();
                    for (name, field) in object.fields() {
                        let child = join(&path, name);
                        if let Some(value) = self.parse_node(field, fields.get(name), child).await? {
                            output.insert(name, value);
                        }
                    }
                    Ok(Some(HydratedValue::Object(output)))
                }
                SchemaNode::Array(element) => {
                    let Some(input) = input else {
                        return Err(ValidationError::required(path).into());
                    };
                    let HydratedValue::Array(items) = input else {
                        return Err(ValidationError::expected(path, "array", input.kind()).into());
                    };
                    let mut output = Vec::with_capacity(items.len());
                    for (index, item) in items.iter().enumerate() {
                        let child = join(&path, &index.to_string());
                        match self.parse_node(element, Some(item), child.clone()).await? {
                            Some(value) => output.push(value),
                            None => return Err(ValidationError::required(child).into()),
                        }
                    }
                    Ok(Some(HydratedValue::Array(output)))
                }
                SchemaNode::Union(options) => {
                    for option in options {
                        match self.parse_node(option, input, path.clone()).await {
                            Ok(value) => return Ok(value),
                            // A reference option whose target does not exist is a miss too
                            Err(
                                DocumentError::ValidationFailure(_)
                                | DocumentError::DocumentNotFound { .. },
                            ) => continue,
                            Err(other) => return Err(other),
                        }
                    }
                    Err(ValidationError::new(path, "no union option matched").into())
                }
                SchemaNode::DiscriminatedUnion(du) => {
                    let Some(input) = input else {
                        return Err(ValidationError::required(path).into());
                    };
                    let HydratedValue::Object(fields) = input else {
                        return Err(ValidationError::expected(path, "object", input.kind()).into());
                    };
                    let discriminator = fields
                        .get(&du.discriminator)
                        .map(HydratedValue::to_raw)
                        .unwrap_or(Value::Null);
                    match du.select(&discriminator) {
                        Some(option) => self.parse_node(option, Some(input), path).await,
                        None => Err(ValidationError::new(
                            join(&path, &du.discriminator),
                            format!(
                                "invalid discriminator value {discriminator}, expected one of {:?}",
                                du.valid_values()
                            ),
                        )
                        .into()),
                    }
                }
                SchemaNode::Record(value_node) => {
                    let Some(input) = input else {
                        return Err(ValidationError::required(path).into());
                    };
                    let HydratedValue::Object(fields) = input else {
                        return Err(ValidationError::expected(path, "object", input.kind()).into());
                    };
                    let mut output = HydratedMap::new();
                    for (key, value) in fields.iter() {
                        if let Some(parsed) =
                            self.parse_node(value_node, Some(value), join(&path, key)).await?
                        {
                            output.insert(key, parsed);
                        }
                    }
                    Ok(Some(HydratedValue::Object(output)))
                }
                SchemaNode::Tuple(items) => {
                    let Some(input) = input else {
                        return Err(ValidationError::required(path).into());
                    };
                    let HydratedValue::Array(values) = input else {
                        return Err(ValidationError::expected(path, "tuple", input.kind()).into());
                    };
                    if values.len() != items.len() {
                        return Err(ValidationError::new(
                            path,
                            format!("expected {} items, received {}", items.len(), values.len()),
                        )
                        .into());
                    }
                    let mut output = Vec::with_capacity(items.len());
                    for (index, (item, value)) in items.iter().zip(values).enumerate() {
                        let child = join(&path, &index.to_string());
                        output.push(
                            self.parse_node(item, Some(value), child)
                                .await?
                                .unwrap_or(HydratedValue::Null),
                        );
                    }
                    Ok(Some(HydratedValue::Array(output)))
                }
                SchemaNode::Reference(marker) => self.parse_reference(marker, input, path).await,
                SchemaNode::Leaf(leaf) => parse_leaf(leaf, input, &path),
            }
        }
        .boxed()
    }

    async fn parse_wrapper(
        &self,
        kind: &WrapperKind,
        inner: &SchemaNode,
        input: Option<&HydratedValue>,
        path: String,
    ) -> Result<Option<HydratedValue>, DocumentError> {
        match kind {
            WrapperKind::Optional => match input {
                None => Ok(None),
                Some(value) => self.parse_node(inner, Some(value), path).await,
            },
            WrapperKind::Nullable => match input {
                Some(HydratedValue::Null) => Ok(Some(HydratedValue::Null)),
                other => self.parse_node(inner, other, path).await,
            },
            WrapperKind::Default(fallback) => match input {
                None => {
                    let fallback = HydratedValue::from(fallback.clone());
                    self.parse_node(inner, Some(&fallback), path).await
                }
                Some(value) => self.parse_node(inner, Some(value), path).await,
            },
            WrapperKind::Branded(_) => self.parse_node(inner, input, path).await,
            WrapperKind::Effect(transform) => {
                match self.parse_node(inner, input, path.clone()).await? {
                    Some(value) => transform(value)
                        .map(Some)
                        .map_err(|message| ValidationError::new(path, message).into()),
                    None => Ok(None),
                }
            }
        }
    }

    /// Reference parse rule: bare id, fresh object or existing reference,
    /// re-masked to the marker and completed from storage when masked fields
    /// are missing. Fresh objects are parsed through the target's field shape.
    async fn parse_reference(
        &self,
        marker: &ReferenceMarker,
        input: Option<&HydratedValue>,
        path: String,
    ) -> Result<Option<HydratedValue>, DocumentError> {
        let Some(input) = input else {
            return Err(ValidationError::required(path).into());
        };
        let definition = self.database.definition(&marker.target)?;

        let (id, source, fresh): (DocumentId, Map<String, Value>, bool) = match input {
            HydratedValue::String(raw) => match DocumentId::parse(raw) {
                Some(id) => (id, Map::new(), false),
                None => return Err(ValidationError::new(path, "invalid document id").into()),
            },
            HydratedValue::Object(fields) => {
                let id = fields
                    .get(ID_FIELD)
                    .and_then(HydratedValue::as_str)
                    .and_then(DocumentId::parse)
                    .ok_or_else(|| ValidationError::new(join(&path, ID_FIELD), "invalid document id"))?;
                (id, fields.to_raw(), true)
            }
            HydratedValue::Reference(existing) => {
                if existing.collection() != marker.target {
                    return Err(ValidationError::new(
                        path,
                        format!(
                            "expected reference to '{}', received reference to '{}'",
                            marker.target,
                            existing.collection()
                        ),
                    )
                    .into());
                }
                (existing.id(), existing.get_existing().clone(), false)
            }
            other => {
                return Err(ValidationError::expected(path, "document reference", other.kind()).into())
            }
        };

        let lazy = self
            .database
            .lazy_document(definition.clone(), id)
            .with_known(source.clone());

        let mut known = match &marker.mask {
            None => source,
            Some(mask) => complete_mask(&lazy, id, mask, source).await?,
        };
        if fresh {
            known = self.parse_embedded(&definition, &lazy, known, &path).await?;
        }

        let reference = DocumentReference::new(definition, id, marker.mask.clone(), known);
        Ok(Some(HydratedValue::Reference(reference)))
    }

    /// Parse embedded data through the target's field shape, picked down to
    /// the keys present. Keys the target does not declare are dropped.
    async fn parse_embedded(
        &self,
        definition: &Arc<CollectionDefinition>,
        lazy: &LazyDocument,
        known: Map<String, Value>,
        path: &str,
    ) -> Result<Map<String, Value>, DocumentError> {
        let shape = definition.field_shape(|field| lazy.get_raw(&field)).await?;
        let declared: Map<String, Value> = known
            .into_iter()
            .filter(|(key, _)| shape.contains(key))
            .collect();
        let schema = SchemaNode::Object(shape.pick(declared.keys().map(String::as_str)));

        let input = HydratedValue::from(declared);
        match self.parse_node(&schema, Some(&input), path.to_string()).await? {
            Some(HydratedValue::Object(fields)) => Ok(fields.to_raw()),
            Some(other) => Err(ValidationError::expected(path, "object", other.kind()).into()),
            None => Err(ValidationError::required(path).into()),
        }
    }
}

/// Keep `_id` plus the mask fields of `source`, loading missing ones
/// through one lazy batch. Fields absent in storage stay absent.
async fn complete_mask(
    lazy: &LazyDocument,
    id: DocumentId,
    mask: &FieldMask,
    source: Map<String, Value>,
) -> Result<Map<String, Value>, DocumentError> {
    let missing: Vec<&str> = mask.fields().filter(|f| !source.contains_key(*f)).collect();

    let mut loaded = Map::new();
    if !missing.is_empty() {
        let values = join_all(missing.iter().map(|field| lazy.get_raw(field))).await;
        for (field, value) in missing.iter().zip(values) {
            if let Some(value) = value? {
                loaded.insert(field.to_string(), value);
            }
        }
    }

    let mut known = Map::new();
    known.insert(ID_FIELD.to_string(), id.to_value());
    for field in mask.fields() {
        if let Some(value) = source.get(field).or_else(|| loaded.get(field)) {
            known.insert(field.to_string(), value.clone());
        }
    }
    Ok(known)
}

fn parse_leaf(
    leaf: &LeafKind,
    input: Option<&HydratedValue>,
    path: &str,
) -> Result<Option<HydratedValue>, DocumentError> {
    let Some(input) = input else {
        return match leaf {
            LeafKind::Any => Ok(None),
            _ => Err(ValidationError::required(path).into()),
        };
    };

    let parsed = match (leaf, input) {
        (LeafKind::Any, value) => value.clone(),
        (LeafKind::String | LeafKind::Binary, HydratedValue::String(_)) => input.clone(),
        (LeafKind::Number, HydratedValue::Number(_)) => input.clone(),
        (LeafKind::Boolean, HydratedValue::Bool(_)) => input.clone(),
        (LeafKind::Date, HydratedValue::String(raw)) => match DateTime::parse_from_rfc3339(raw) {
            Ok(date) => HydratedValue::String(
                date.with_timezone(&Utc)
                    .to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
            Err(_) => return Err(ValidationError::new(path, "invalid date").into()),
        },
        (LeafKind::Id, HydratedValue::String(raw)) => match DocumentId::parse(raw) {
            Some(id) => HydratedValue::String(id.to_string()),
            None => return Err(ValidationError::new(path, "invalid document id").into()),
        },
        (LeafKind::Literal(expected), value) => {
            if value.to_raw() != *expected {
                return Err(ValidationError::new(
                    path,
                    format!("expected literal {expected}, received {}", value.to_raw()),
                )
                .into());
            }
            value.clone()
        }
        (LeafKind::Enum(options), HydratedValue::String(raw)) => {
            if !options.contains(raw) {
                return Err(ValidationError::new(
                    path,
                    format!("expected one of {options:?}, received '{raw}'"),
                )
                .into());
            }
            input.clone()
        }
        (leaf, value) => {
            return Err(ValidationError::expected(path, leaf_name(leaf), value.kind()).into())
        }
    };
    Ok(Some(parsed))
}

fn leaf_name(leaf: &LeafKind) -> &'static str {
    match leaf {
        LeafKind::String => "string",
        LeafKind::Number => "number",
        LeafKind::Boolean => "boolean",
        LeafKind::Date => "date",
        LeafKind::Binary => "binary",
        LeafKind::Id => "document id",
        LeafKind::Literal(_) => "literal",
        LeafKind::Enum(_) => "enum",
        LeafKind::Any => "any",
    }
}

fn join(path: &str, segment: &str) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{path}.{segment}")
    }
}
