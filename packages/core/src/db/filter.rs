//! Filters, projections and set-updates understood by a [`DocumentStore`].
//!
//! Paths are dotted (`"photo.url"`). Equality traverses arrays implicitly: a
//! path crossing an array matches when any element matches. [`Filter::ElemMatch`]
//! selects array elements explicitly and is also what positional `$` set paths
//! refer to.
//!
//! [`DocumentStore`]: super::DocumentStore

use crate::db::RawDocument;
use crate::models::{DocumentId, ID_FIELD};
use serde_json::{Map, Value};

/// Document predicate
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every document
    All,
    /// Value at `path` equals `value`
    Eq { path: String, value: Value },
    /// Some element of the array at `path` satisfies `filter`.
    /// An empty path addresses the current value itself.
    ElemMatch { path: String, filter: Box<Filter> },
    And(Vec<Filter>),
}

impl Filter {
    /// `_id == id`
    pub fn id(id: DocumentId) -> Self {
        Self::eq(ID_FIELD, id.to_value())
    }

    pub fn eq(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn elem_match(path: impl Into<String>, filter: Filter) -> Self {
        Self::ElemMatch {
            path: path.into(),
            filter: Box::new(filter),
        }
    }

    pub fn matches(&self, document: &RawDocument) -> bool {
        self.matches_fields(document)
    }

    /// Evaluate against an arbitrary value (an array element, typically)
    pub fn matches_value(&self, value: &Value) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq { path, value: expected } => resolve(value, &segments(path))
                .into_iter()
                .any(|found| equals_or_contains(found, expected)),
            Filter::ElemMatch { path, filter } => resolve(value, &segments(path))
                .into_iter()
                .any(|found| match found {
                    Value::Array(items) => items.iter().any(|item| filter.matches_value(item)),
                    _ => false,
                }),
            Filter::And(filters) => filters.iter().all(|f| f.matches_value(value)),
        }
    }

    fn matches_fields(&self, document: &RawDocument) -> bool {
        // Avoid cloning the whole document into a Value just to match it
        match self {
            Filter::All => true,
            Filter::And(filters) => filters.iter().all(|f| f.matches_fields(document)),
            Filter::Eq { path, .. } | Filter::ElemMatch { path, .. } => {
                let parts = segments(path);
                match parts.split_first() {
                    Some((head, _)) => match document.get(*head) {
                        Some(_) => {
                            let wrapped = Value::Object(pick_key(document, head));
                            self.matches_value(&wrapped)
                        }
                        None => false,
                    },
                    None => false,
                }
            }
        }
    }

    /// Inner filter of the element match declared on `path`, searching
    /// through conjunctions
    pub fn elem_match_for(&self, path: &str) -> Option<&Filter> {
        match self {
            Filter::ElemMatch { path: p, filter } if p == path => Some(filter),
            Filter::And(filters) => filters.iter().find_map(|f| f.elem_match_for(path)),
            _ => None,
        }
    }
}

fn pick_key(document: &RawDocument, key: &str) -> Map<String, Value> {
    let mut map = Map::new();
    if let Some(value) = document.get(key) {
        map.insert(key.to_string(), value.clone());
    }
    map
}

fn segments(path: &str) -> Vec<&str> {
    if path.is_empty() {
        Vec::new()
    } else {
        path.split('.').collect()
    }
}

/// Values reachable at `path`, descending into array elements implicitly.
/// The final value is returned as-is, arrays included.
fn resolve<'a>(value: &'a Value, path: &[&str]) -> Vec<&'a Value> {
    let Some((head, rest)) = path.split_first() else {
        return vec![value];
    };
    match value {
        Value::Object(map) => match map.get(*head) {
            Some(child) => resolve(child, rest),
            None => Vec::new(),
        },
        Value::Array(items) => {
            let mut found = Vec::new();
            if let Ok(index) = head.parse::<usize>() {
                if let Some(item) = items.get(index) {
                    found.extend(resolve(item, rest));
                }
            }
            for item in items {
                if item.is_object() {
                    found.extend(resolve(item, path));
                }
            }
            found
        }
        _ => Vec::new(),
    }
}

fn equals_or_contains(found: &Value, expected: &Value) -> bool {
    if found == expected {
        return true;
    }
    match found {
        Value::Array(items) => items.iter().any(|item| item == expected),
        _ => false,
    }
}

/// Field selection applied to top-level keys
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// Keep only these keys. `_id` is not added implicitly.
    Include(Vec<String>),
    /// Drop these keys
    Exclude(Vec<String>),
}

impl Projection {
    pub fn include<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Include(fields.into_iter().map(Into::into).collect())
    }

    pub fn exclude<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Exclude(fields.into_iter().map(Into::into).collect())
    }

    pub fn apply(&self, document: &RawDocument) -> RawDocument {
        match self {
            Projection::Include(fields) => document
                .iter()
                .filter(|(key, _)| fields.iter().any(|f| f == *key))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
            Projection::Exclude(fields) => document
                .iter()
                .filter(|(key, _)| !fields.iter().any(|f| f == *key))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        }
    }
}

/// `$set` / `$unset`-style update: dotted path → new value, or removal
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetUpdate {
    /// `None` unsets the path
    fields: Vec<(String, Option<Value>)>,
}

impl SetUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push((path.into(), Some(value.into())));
        self
    }

    /// Remove the key at `path`; missing keys are left alone
    pub fn unset(mut self, path: impl Into<String>) -> Self {
        self.fields.push((path.into(), None));
        self
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, Option<&Value>)> {
        self.fields
            .iter()
            .map(|(path, value)| (path.as_str(), value.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Apply to one document already known to match `filter`; returns whether
    /// anything changed.
    pub fn apply(&self, document: &mut RawDocument, filter: &Filter) -> bool {
        let mut changed = false;
        for (path, value) in &self.fields {
            let parts = segments(path);
            changed |= assign_fields(document, &parts, value.as_ref(), filter, &mut Vec::new());
        }
        changed
    }
}

fn assign_fields<'p>(
    document: &mut RawDocument,
    path: &[&'p str],
    value: Option<&Value>,
    scope: &Filter,
    relative: &mut Vec<&'p str>,
) -> bool {
    let Some((head, rest)) = path.split_first() else {
        return false;
    };
    if rest.is_empty() {
        return match value {
            Some(value) => {
                let previous = document.insert(head.to_string(), value.clone());
                previous.as_ref() != Some(value)
            }
            None => document.remove(*head).is_some(),
        };
    }
    let child = match value {
        Some(_) => document
            .entry(head.to_string())
            .or_insert_with(|| Value::Object(Map::new())),
        None => match document.get_mut(*head) {
            Some(child) => child,
            None => return false,
        },
    };
    relative.push(*head);
    let changed = assign(child, rest, value, scope, relative);
    relative.pop();
    changed
}

/// Replace `slot` with `value`; unsetting an array slot is a no-op
fn replace_slot(slot: &mut Value, value: Option<&Value>) -> bool {
    match value {
        Some(value) if slot != value => {
            *slot = value.clone();
            true
        }
        _ => false,
    }
}

fn assign<'p>(
    node: &mut Value,
    path: &[&'p str],
    value: Option<&Value>,
    scope: &Filter,
    relative: &mut Vec<&'p str>,
) -> bool {
    let Some((head, rest)) = path.split_first() else {
        return false;
    };

    if *head == "$" {
        let Value::Array(items) = node else {
            return false;
        };
        let all = Filter::All;
        let selector = scope.elem_match_for(&relative.join("."));
        let inner_scope = selector.unwrap_or(&all);
        let mut changed = false;
        for item in items.iter_mut() {
            if !selector.map_or(true, |filter| filter.matches_value(item)) {
                continue;
            }
            if rest.is_empty() {
                changed |= replace_slot(item, value);
            } else {
                changed |= assign(item, rest, value, inner_scope, &mut Vec::new());
            }
        }
        return changed;
    }

    match node {
        Value::Object(map) => assign_fields(map, path, value, scope, relative),
        Value::Array(items) => {
            let Ok(index) = head.parse::<usize>() else {
                return false;
            };
            let Some(item) = items.get_mut(index) else {
                return false;
            };
            if rest.is_empty() {
                return replace_slot(item, value);
            }
            relative.push(*head);
            let changed = assign(item, rest, value, scope, relative);
            relative.pop();
            changed
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> RawDocument {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_eq_traverses_nested_objects_and_arrays() {
        let post = doc(json!({
            "_id": "p1",
            "author": {"_id": "u1", "name": "Ada"},
            "photos": [{"_id": "a"}, {"_id": "b"}],
            "tags": ["x", "y"]
        }));

        assert!(Filter::eq("author._id", "u1").matches(&post));
        assert!(Filter::eq("photos._id", "b").matches(&post));
        assert!(Filter::eq("tags", "y").matches(&post));
        assert!(Filter::eq("photos.1._id", "b").matches(&post));
        assert!(!Filter::eq("photos._id", "c").matches(&post));
        assert!(!Filter::eq("missing", "c").matches(&post));
    }

    #[test]
    fn test_elem_match_and_conjunction() {
        let post = doc(json!({
            "_id": "p1",
            "photos": [{"_id": "a", "url": "1"}, {"_id": "b", "url": "2"}],
            "grid": [[{"_id": "a"}], [{"_id": "c"}]]
        }));

        let by_photo = Filter::elem_match("photos", Filter::eq("_id", "a"));
        assert!(by_photo.matches(&post));
        assert!(!Filter::elem_match("photos", Filter::eq("_id", "z")).matches(&post));

        let nested = Filter::elem_match("grid", Filter::elem_match("", Filter::eq("_id", "c")));
        assert!(nested.matches(&post));

        let both = Filter::And(vec![Filter::eq("_id", "p1"), by_photo.clone()]);
        assert!(both.matches(&post));
        assert_eq!(both.elem_match_for("photos"), Some(&Filter::eq("_id", "a")));
        assert_eq!(both.elem_match_for("grid"), None);
    }

    #[test]
    fn test_projection_include_does_not_add_id() {
        let photo = doc(json!({"_id": "a", "url": "u", "width": 3}));
        let included = Projection::include(["url"]).apply(&photo);
        assert_eq!(Value::Object(included), json!({"url": "u"}));

        let excluded = Projection::exclude(["_id", "url"]).apply(&photo);
        assert_eq!(Value::Object(excluded), json!({"width": 3}));
    }

    #[test]
    fn test_set_update_plain_path() {
        let filter = Filter::eq("photo._id", "a");
        let mut user = doc(json!({"_id": "u", "photo": {"_id": "a", "url": "old"}}));

        let update = SetUpdate::new().set("photo._id", "a").set("photo.url", "new");
        assert!(update.apply(&mut user, &filter));
        assert_eq!(
            Value::Object(user.clone()),
            json!({"_id": "u", "photo": {"_id": "a", "url": "new"}})
        );

        // Applying again changes nothing
        assert!(!update.apply(&mut user, &filter));
    }

    #[test]
    fn test_set_update_positional_targets_matched_elements_only() {
        let filter = Filter::elem_match("photos", Filter::eq("_id", "a"));
        let mut post = doc(json!({
            "_id": "p",
            "photos": [
                {"_id": "a", "url": "old"},
                {"_id": "b", "url": "keep"},
                {"_id": "a", "url": "old"}
            ]
        }));

        let update = SetUpdate::new().set("photos.$.url", "new");
        assert!(update.apply(&mut post, &filter));
        assert_eq!(
            post["photos"],
            json!([
                {"_id": "a", "url": "new"},
                {"_id": "b", "url": "keep"},
                {"_id": "a", "url": "new"}
            ])
        );
    }

    #[test]
    fn test_set_update_nested_positional() {
        let filter = Filter::elem_match(
            "comments",
            Filter::elem_match("likes", Filter::eq("_id", "u1")),
        );
        let mut post = doc(json!({
            "_id": "p",
            "comments": [
                {"likes": [{"_id": "u1", "name": "a"}, {"_id": "u2", "name": "b"}]},
                {"likes": [{"_id": "u3", "name": "c"}]}
            ]
        }));

        let update = SetUpdate::new().set("comments.$.likes.$.name", "z");
        assert!(update.apply(&mut post, &filter));
        assert_eq!(post["comments"][0]["likes"][0]["name"], "z");
        assert_eq!(post["comments"][0]["likes"][1]["name"], "b");
        assert_eq!(post["comments"][1]["likes"][0]["name"], "c");
    }

    #[test]
    fn test_unset_removes_only_existing_keys() {
        let filter = Filter::elem_match("photos", Filter::eq("_id", "a"));
        let mut post = doc(json!({
            "_id": "p",
            "cover": {"_id": "a", "caption": "old"},
            "photos": [{"_id": "a", "caption": "old"}, {"_id": "b", "caption": "keep"}]
        }));

        let update = SetUpdate::new()
            .unset("cover.caption")
            .unset("photos.$.caption")
            .unset("missing.caption");
        assert!(update.apply(&mut post, &filter));
        assert_eq!(
            Value::Object(post.clone()),
            json!({
                "_id": "p",
                "cover": {"_id": "a"},
                "photos": [{"_id": "a"}, {"_id": "b", "caption": "keep"}]
            })
        );
        assert!(!update.apply(&mut post, &filter));
    }

    #[test]
    fn test_set_whole_matched_element() {
        let filter = Filter::elem_match("photos", Filter::eq("_id", "b"));
        let mut post = doc(json!({
            "_id": "p",
            "photos": [{"_id": "a", "url": "1"}, {"_id": "b", "url": "2", "stale": true}]
        }));

        let update = SetUpdate::new().set("photos.$", json!({"_id": "b", "url": "3"}));
        assert!(update.apply(&mut post, &filter));
        assert_eq!(
            post["photos"],
            json!([{"_id": "a", "url": "1"}, {"_id": "b", "url": "3"}])
        );
    }
}
