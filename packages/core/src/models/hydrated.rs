//! Hydrated Values
//!
//! The output of schema validation. Mirrors `serde_json::Value`, plus a
//! `Reference` variant for embedding points that were parsed into a
//! [`DocumentReference`]. Flattening (`to_raw`) turns a hydrated tree back into
//! the raw form written to storage: every reference collapses to its known-value
//! cache, arrays and objects are walked recursively, scalars pass through.

use crate::services::DocumentReference;
use serde_json::{Map, Number, Value};

/// Insertion-ordered map of hydrated values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HydratedMap(Vec<(String, HydratedValue)>);

impl HydratedMap {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn get(&self, key: &str) -> Option<&HydratedValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Insert or overwrite a value; overwriting keeps the original position
    pub fn insert(&mut self, key: impl Into<String>, value: HydratedValue) -> Option<HydratedValue> {
        let key = key.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.0.push((key, value));
                None
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<HydratedValue> {
        let index = self.0.iter().position(|(k, _)| k == key)?;
        Some(self.0.remove(index).1)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HydratedValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Flatten into a raw JSON object
    pub fn to_raw(&self) -> Map<String, Value> {
        self.0
            .iter()
            .map(|(k, v)| (k.clone(), v.to_raw()))
            .collect()
    }
}

impl FromIterator<(String, HydratedValue)> for HydratedMap {
    fn from_iter<I: IntoIterator<Item = (String, HydratedValue)>>(iter: I) -> Self {
        let mut map = HydratedMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl IntoIterator for HydratedMap {
    type Item = (String, HydratedValue);
    type IntoIter = std::vec::IntoIter<(String, HydratedValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// A validated value, possibly containing document references
#[derive(Debug, Clone, PartialEq)]
pub enum HydratedValue {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<HydratedValue>),
    Object(HydratedMap),
    Reference(DocumentReference),
}

impl HydratedValue {
    /// Flatten to raw storable form
    pub fn to_raw(&self) -> Value {
        match self {
            HydratedValue::Null => Value::Null,
            HydratedValue::Bool(b) => Value::Bool(*b),
            HydratedValue::Number(n) => Value::Number(n.clone()),
            HydratedValue::String(s) => Value::String(s.clone()),
            HydratedValue::Array(items) => Value::Array(items.iter().map(Self::to_raw).collect()),
            HydratedValue::Object(map) => Value::Object(map.to_raw()),
            HydratedValue::Reference(reference) => Value::Object(reference.get_existing().clone()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            HydratedValue::Null => "null",
            HydratedValue::Bool(_) => "boolean",
            HydratedValue::Number(_) => "number",
            HydratedValue::String(_) => "string",
            HydratedValue::Array(_) => "array",
            HydratedValue::Object(_) => "object",
            HydratedValue::Reference(_) => "reference",
        }
    }

    /// Field lookup on objects; `None` for every other variant
    pub fn get(&self, key: &str) -> Option<&HydratedValue> {
        match self {
            HydratedValue::Object(map) => map.get(key),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&HydratedMap> {
        match self {
            HydratedValue::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&DocumentReference> {
        match self {
            HydratedValue::Reference(reference) => Some(reference),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[HydratedValue]> {
        match self {
            HydratedValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HydratedValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, HydratedValue::Null)
    }
}

impl From<Value> for HydratedValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => HydratedValue::Null,
            Value::Bool(b) => HydratedValue::Bool(b),
            Value::Number(n) => HydratedValue::Number(n),
            Value::String(s) => HydratedValue::String(s),
            Value::Array(items) => HydratedValue::Array(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => HydratedValue::Object(
                map.into_iter().map(|(k, v)| (k, HydratedValue::from(v))).collect(),
            ),
        }
    }
}

impl From<Map<String, Value>> for HydratedValue {
    fn from(map: Map<String, Value>) -> Self {
        HydratedValue::from(Value::Object(map))
    }
}

impl From<HydratedMap> for HydratedValue {
    fn from(map: HydratedMap) -> Self {
        HydratedValue::Object(map)
    }
}

impl From<DocumentReference> for HydratedValue {
    fn from(reference: DocumentReference) -> Self {
        HydratedValue::Reference(reference)
    }
}

impl From<&str> for HydratedValue {
    fn from(s: &str) -> Self {
        HydratedValue::String(s.to_string())
    }
}

impl From<String> for HydratedValue {
    fn from(s: String) -> Self {
        HydratedValue::String(s)
    }
}

impl From<crate::models::DocumentId> for HydratedValue {
    fn from(id: crate::models::DocumentId) -> Self {
        HydratedValue::String(id.to_string())
    }
}
