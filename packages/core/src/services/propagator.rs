//! Denormalization Propagator
//!
//! After a document changes, every embedded copy of it is refreshed:
//!
//! 1. read the current document inside the session
//! 2. hydrate and flatten it, so embedded copies get exactly what a fresh
//!    write would have stored
//! 3. index the reference graph of its collection
//! 4. one `update_many` per (source, path): the filter finds documents whose
//!    value at `path` carries this `_id` (element-matching at each `$`), the
//!    update replaces a full copy or sets the masked fields of a partial one
//!
//! Masked fields missing from the current document are unset in every copy.

use crate::db::{Filter, RawDocument, Session, SetUpdate};
use crate::models::{DocumentId, ID_FIELD};
use crate::schema::{CollectionDefinition, ARRAY_SEGMENT};
use crate::services::reference_graph::ReferenceLocation;
use crate::services::{Database, DocumentError};
use crate::validation::Validator;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Modified-document count for one embedding location
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocationUpdate {
    pub source: String,
    pub path: String,
    pub modified: u64,
}

/// Outcome of one propagation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropagationReport {
    pub collection: String,
    pub id: DocumentId,
    pub updates: Vec<LocationUpdate>,
}

impl PropagationReport {
    /// Documents modified across every location
    pub fn total_modified(&self) -> u64 {
        self.updates.iter().map(|update| update.modified).sum()
    }

    /// Documents modified in `source`
    pub fn modified_in(&self, source: &str) -> u64 {
        self.updates
            .iter()
            .filter(|update| update.source == source)
            .map(|update| update.modified)
            .sum()
    }
}

/// Refresh every embedded copy of `id` within `session`
pub(crate) async fn propagate_update(
    database: &Database,
    definition: &Arc<CollectionDefinition>,
    id: DocumentId,
    session: Session,
) -> Result<PropagationReport, DocumentError> {
    let collection = definition.collection();
    let store = database.store();

    let stored = store
        .find_one(collection, &Filter::id(id), None, Some(&session))
        .await?
        .ok_or_else(|| DocumentError::not_found(collection, id))?;

    let hydrated = Validator::new(database)
        .parse_document(definition.schema(), &stored.into())
        .await?;
    let flattened = hydrated.to_raw();

    let graph = database.get_references(collection)?;
    let mut updates = Vec::new();

    for (source, locations) in graph.iter() {
        for location in locations {
            let filter = reference_filter(&location.path, id);
            let update = embedded_update(location, &flattened);
            if update.is_empty() {
                continue;
            }

            let modified = store
                .update_many(source, &filter, &update, Some(&session))
                .await?;
            tracing::debug!(
                "Propagated {}/{} into {}.{} ({} modified)",
                collection,
                id,
                source,
                location.path,
                modified
            );
            updates.push(LocationUpdate {
                source: source.to_string(),
                path: location.path.clone(),
                modified,
            });
        }
    }

    Ok(PropagationReport {
        collection: collection.to_string(),
        id,
        updates,
    })
}

/// Filter matching documents whose value at `path` has `_id == id`
pub fn reference_filter(path: &str, id: DocumentId) -> Filter {
    let mut segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    segments.push(ID_FIELD);
    nest_filter(&segments, id)
}

fn nest_filter(segments: &[&str], id: DocumentId) -> Filter {
    match segments.iter().position(|segment| *segment == ARRAY_SEGMENT) {
        None => Filter::eq(segments.join("."), id.to_value()),
        Some(index) => Filter::elem_match(
            segments[..index].join("."),
            nest_filter(&segments[index + 1..], id),
        ),
    }
}

/// Update bringing the embedded copy at `location` in line with `flattened`.
///
/// A full copy is replaced as a whole. A masked copy gets `_id` plus every
/// mask field set, and mask fields the document no longer has are unset.
fn embedded_update(location: &ReferenceLocation, flattened: &RawDocument) -> SetUpdate {
    let Some(mask) = &location.mask else {
        return SetUpdate::new().set(location.path.clone(), Value::Object(flattened.clone()));
    };

    let mut update = SetUpdate::new();
    for field in std::iter::once(ID_FIELD).chain(mask.fields()) {
        let path = format!("{}.{}", location.path, field);
        update = match flattened.get(field) {
            Some(value) => update.set(path, value.clone()),
            None => update.unset(path),
        };
    }
    update
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldMask;
    use serde_json::json;

    #[test]
    fn test_filter_for_plain_path() {
        let id = DocumentId::new();
        assert_eq!(reference_filter("photo", id), Filter::eq("photo._id", id.to_value()));
        assert_eq!(
            reference_filter("profile.avatar", id),
            Filter::eq("profile.avatar._id", id.to_value())
        );
    }

    #[test]
    fn test_filter_elem_matches_at_each_array() {
        let id = DocumentId::new();
        assert_eq!(
            reference_filter("photos.$", id),
            Filter::elem_match("photos", Filter::eq("_id", id.to_value()))
        );
        assert_eq!(
            reference_filter("comments.$.likes.$", id),
            Filter::elem_match(
                "comments",
                Filter::elem_match("likes", Filter::eq("_id", id.to_value()))
            )
        );
    }

    #[test]
    fn test_update_respects_mask() {
        let photo = json!({"_id": "p", "url": "u", "description": "d"})
            .as_object()
            .cloned()
            .unwrap();

        let masked = ReferenceLocation {
            path: "photo".to_string(),
            mask: Some(FieldMask::new(["url", "missing"])),
        };
        let update = embedded_update(&masked, &photo);
        let fields: Vec<(&str, Option<&Value>)> = update.fields().collect();
        assert_eq!(
            fields,
            vec![
                ("photo._id", Some(&json!("p"))),
                ("photo.url", Some(&json!("u"))),
                ("photo.missing", None),
            ]
        );

        let full = ReferenceLocation {
            path: "photos.$".to_string(),
            mask: None,
        };
        let update = embedded_update(&full, &photo);
        let fields: Vec<(&str, Option<&Value>)> = update.fields().collect();
        assert_eq!(fields, vec![("photos.$", Some(&Value::Object(photo.clone())))]);
    }
}
