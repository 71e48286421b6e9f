//! Schema Node Tree
//!
//! A closed description of document shapes. Every walker in the crate is an
//! exhaustive match over [`SchemaNode`], so adding a node kind means touching
//! every traversal on purpose.
//!
//! # Node kinds
//!
//! - `Object`, `Array`, `Union`, `DiscriminatedUnion` - containers
//! - `Wrapper` - optional / nullable / branded / defaulted / effect forms,
//!   transparent for traversal
//! - `Deferred` - lazily produced node, used for self-referential schemas
//! - `Reference` - an embedding point pointing at another collection
//! - `Leaf` - scalar terminals
//! - `Record`, `Tuple` - accepted by the validator but refused by the walkers
//!   wherever the shape cannot be addressed by a fixed path
//!
//! # Examples
//!
//! ```rust
//! use denorm_core::models::schema_node::{id, object, string, array};
//!
//! let photo = object()
//!     .field("_id", id())
//!     .field("url", string())
//!     .field("tags", array(string()).optional());
//! assert!(photo.contains("_id"));
//! ```

use crate::models::{HydratedValue, ID_FIELD};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Post-parse transformation carried by an effect wrapper
pub type Transform = Arc<dyn Fn(HydratedValue) -> Result<HydratedValue, String> + Send + Sync>;

/// One node of a schema description tree
#[derive(Debug, Clone)]
pub enum SchemaNode {
    Object(ObjectSchema),
    Array(Box<SchemaNode>),
    Union(Vec<SchemaNode>),
    DiscriminatedUnion(DiscriminatedUnion),
    Wrapper(WrapperKind, Box<SchemaNode>),
    Deferred(DeferredSchema),
    Reference(ReferenceMarker),
    Leaf(LeafKind),
    /// Open-ended map with values of one shape
    Record(Box<SchemaNode>),
    /// Positional, heterogeneous array
    Tuple(Vec<SchemaNode>),
}

impl SchemaNode {
    pub fn kind_name(&self) -> &'static str {
        match self {
            SchemaNode::Object(_) => "object",
            SchemaNode::Array(_) => "array",
            SchemaNode::Union(_) => "union",
            SchemaNode::DiscriminatedUnion(_) => "discriminated union",
            SchemaNode::Wrapper(kind, _) => kind.name(),
            SchemaNode::Deferred(_) => "deferred",
            SchemaNode::Reference(_) => "reference",
            SchemaNode::Leaf(_) => "leaf",
            SchemaNode::Record(_) => "record",
            SchemaNode::Tuple(_) => "tuple",
        }
    }

    pub fn optional(self) -> SchemaNode {
        SchemaNode::Wrapper(WrapperKind::Optional, Box::new(self))
    }

    pub fn nullable(self) -> SchemaNode {
        SchemaNode::Wrapper(WrapperKind::Nullable, Box::new(self))
    }

    pub fn branded(self, brand: impl Into<String>) -> SchemaNode {
        SchemaNode::Wrapper(WrapperKind::Branded(brand.into()), Box::new(self))
    }

    /// Substitute `value` when the input is absent
    pub fn with_default(self, value: Value) -> SchemaNode {
        SchemaNode::Wrapper(WrapperKind::Default(value), Box::new(self))
    }

    /// Apply `transform` to the parsed value
    pub fn transform<F>(self, transform: F) -> SchemaNode
    where
        F: Fn(HydratedValue) -> Result<HydratedValue, String> + Send + Sync + 'static,
    {
        SchemaNode::Wrapper(WrapperKind::Effect(Arc::new(transform)), Box::new(self))
    }
}

impl From<ObjectSchema> for SchemaNode {
    fn from(object: ObjectSchema) -> Self {
        SchemaNode::Object(object)
    }
}

impl From<DiscriminatedUnion> for SchemaNode {
    fn from(union: DiscriminatedUnion) -> Self {
        SchemaNode::DiscriminatedUnion(union)
    }
}

impl From<ReferenceMarker> for SchemaNode {
    fn from(marker: ReferenceMarker) -> Self {
        SchemaNode::Reference(marker)
    }
}

impl From<LeafKind> for SchemaNode {
    fn from(leaf: LeafKind) -> Self {
        SchemaNode::Leaf(leaf)
    }
}

/// Object node: ordered field name → node
#[derive(Debug, Clone, Default)]
pub struct ObjectSchema {
    fields: Vec<(String, SchemaNode)>,
}

impl ObjectSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: declare (or redeclare) a field
    pub fn field(mut self, name: impl Into<String>, node: impl Into<SchemaNode>) -> Self {
        let name = name.into();
        let node = node.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = node,
            None => self.fields.push((name, node)),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&SchemaNode> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, node)| node)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &SchemaNode)> {
        self.fields.iter().map(|(n, node)| (n.as_str(), node))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Sub-object restricted to `names`, declaration order preserved.
    /// Names the object does not declare are ignored.
    pub fn pick<'a, I>(&self, names: I) -> ObjectSchema
    where
        I: IntoIterator<Item = &'a str>,
    {
        let wanted: Vec<&str> = names.into_iter().collect();
        ObjectSchema {
            fields: self
                .fields
                .iter()
                .filter(|(n, _)| wanted.contains(&n.as_str()))
                .cloned()
                .collect(),
        }
    }
}

/// Union selecting one object shape by the literal value of one field
#[derive(Debug, Clone)]
pub struct DiscriminatedUnion {
    pub discriminator: String,
    pub options: Vec<SchemaNode>,
}

impl DiscriminatedUnion {
    /// Option whose discriminator literal equals `value`
    pub fn select(&self, value: &Value) -> Option<&SchemaNode> {
        self.options
            .iter()
            .find(|option| discriminator_values(option, &self.discriminator).contains(value))
    }

    /// Every literal accepted by some option, in option order
    pub fn valid_values(&self) -> Vec<Value> {
        self.options
            .iter()
            .flat_map(|option| discriminator_values(option, &self.discriminator))
            .collect()
    }
}

fn discriminator_values(option: &SchemaNode, discriminator: &str) -> Vec<Value> {
    match option {
        SchemaNode::Object(object) => match object.get(discriminator) {
            Some(field) => literal_values(field),
            None => Vec::new(),
        },
        SchemaNode::Wrapper(_, inner) => discriminator_values(inner, discriminator),
        SchemaNode::Deferred(deferred) => discriminator_values(&deferred.resolve(), discriminator),
        _ => Vec::new(),
    }
}

fn literal_values(node: &SchemaNode) -> Vec<Value> {
    match node {
        SchemaNode::Leaf(LeafKind::Literal(value)) => vec![value.clone()],
        SchemaNode::Leaf(LeafKind::Enum(values)) => {
            values.iter().map(|v| Value::String(v.clone())).collect()
        }
        SchemaNode::Wrapper(_, inner) => literal_values(inner),
        _ => Vec::new(),
    }
}

/// Transparent wrapper forms
#[derive(Clone)]
pub enum WrapperKind {
    Optional,
    Nullable,
    Branded(String),
    Default(Value),
    Effect(Transform),
}

impl WrapperKind {
    pub fn name(&self) -> &'static str {
        match self {
            WrapperKind::Optional => "optional",
            WrapperKind::Nullable => "nullable",
            WrapperKind::Branded(_) => "branded",
            WrapperKind::Default(_) => "default",
            WrapperKind::Effect(_) => "effect",
        }
    }
}

impl fmt::Debug for WrapperKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WrapperKind::Optional => f.write_str("Optional"),
            WrapperKind::Nullable => f.write_str("Nullable"),
            WrapperKind::Branded(brand) => f.debug_tuple("Branded").field(brand).finish(),
            WrapperKind::Default(value) => f.debug_tuple("Default").field(value).finish(),
            WrapperKind::Effect(_) => f.write_str("Effect(..)"),
        }
    }
}

/// Node produced on demand; `label` identifies the recursion point
#[derive(Clone)]
pub struct DeferredSchema {
    label: String,
    resolve: Arc<dyn Fn() -> SchemaNode + Send + Sync>,
}

impl DeferredSchema {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn resolve(&self) -> SchemaNode {
        (self.resolve)()
    }
}

impl fmt::Debug for DeferredSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredSchema")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Subset of field names embedded alongside `_id`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldMask(Vec<String>);

impl FieldMask {
    /// Build a mask; duplicates and `_id` are dropped (the identifier is always embedded)
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = Vec::new();
        for field in fields {
            let field = field.into();
            if field != ID_FIELD && !names.contains(&field) {
                names.push(field);
            }
        }
        Self(names)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.iter().any(|f| f == field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Serialized as `{"field": true, ...}`
impl Serialize for FieldMask {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for field in &self.0 {
            map.serialize_entry(field, &true)?;
        }
        map.end()
    }
}

/// Embedding point: a copy (full or masked) of a document of `target`
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceMarker {
    /// Model name of the referenced collection
    pub target: String,
    /// `None` embeds the whole document
    pub mask: Option<FieldMask>,
}

/// Scalar terminals
#[derive(Debug, Clone, PartialEq)]
pub enum LeafKind {
    String,
    Number,
    Boolean,
    /// RFC 3339 timestamp
    Date,
    /// Opaque encoded payload
    Binary,
    /// A [`DocumentId`](crate::models::DocumentId)
    Id,
    Literal(Value),
    Enum(Vec<String>),
    Any,
}

pub fn object() -> ObjectSchema {
    ObjectSchema::new()
}

pub fn array(element: impl Into<SchemaNode>) -> SchemaNode {
    SchemaNode::Array(Box::new(element.into()))
}

pub fn union<I>(options: I) -> SchemaNode
where
    I: IntoIterator,
    I::Item: Into<SchemaNode>,
{
    SchemaNode::Union(options.into_iter().map(Into::into).collect())
}

pub fn discriminated_union<I>(discriminator: impl Into<String>, options: I) -> SchemaNode
where
    I: IntoIterator,
    I::Item: Into<SchemaNode>,
{
    SchemaNode::DiscriminatedUnion(DiscriminatedUnion {
        discriminator: discriminator.into(),
        options: options.into_iter().map(Into::into).collect(),
    })
}

pub fn record(value: impl Into<SchemaNode>) -> SchemaNode {
    SchemaNode::Record(Box::new(value.into()))
}

pub fn tuple<I>(items: I) -> SchemaNode
where
    I: IntoIterator,
    I::Item: Into<SchemaNode>,
{
    SchemaNode::Tuple(items.into_iter().map(Into::into).collect())
}

/// Deferred node for recursive shapes.
///
/// ```rust
/// use denorm_core::models::schema_node::{array, deferred, object, string, SchemaNode};
///
/// fn comment() -> SchemaNode {
///     object()
///         .field("text", string())
///         .field("replies", array(deferred("Comment", comment)))
///         .into()
/// }
/// let _ = comment();
/// ```
pub fn deferred<F>(label: impl Into<String>, resolve: F) -> SchemaNode
where
    F: Fn() -> SchemaNode + Send + Sync + 'static,
{
    SchemaNode::Deferred(DeferredSchema {
        label: label.into(),
        resolve: Arc::new(resolve),
    })
}

pub fn string() -> SchemaNode {
    SchemaNode::Leaf(LeafKind::String)
}

pub fn number() -> SchemaNode {
    SchemaNode::Leaf(LeafKind::Number)
}

pub fn boolean() -> SchemaNode {
    SchemaNode::Leaf(LeafKind::Boolean)
}

pub fn date() -> SchemaNode {
    SchemaNode::Leaf(LeafKind::Date)
}

pub fn binary() -> SchemaNode {
    SchemaNode::Leaf(LeafKind::Binary)
}

pub fn id() -> SchemaNode {
    SchemaNode::Leaf(LeafKind::Id)
}

pub fn literal(value: impl Into<Value>) -> SchemaNode {
    SchemaNode::Leaf(LeafKind::Literal(value.into()))
}

pub fn enumeration<I, S>(values: I) -> SchemaNode
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    SchemaNode::Leaf(LeafKind::Enum(values.into_iter().map(Into::into).collect()))
}

pub fn any() -> SchemaNode {
    SchemaNode::Leaf(LeafKind::Any)
}
