//! Reference Graph Indexer
//!
//! Answers "which documents embed a copy of collection T, and where?" by
//! walking every registered schema. The graph is computed on demand from the
//! definitions and never persisted, so it can not go stale when definitions
//! are added.
//!
//! # Ordering
//!
//! Sources appear in registration order, locations within a source in field
//! declaration order. Running the indexer twice yields equal graphs.

use crate::models::FieldMask;
use crate::schema::{CollectionDefinition, SchemaError};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::sync::Arc;

/// One embedding point of the target inside a source collection
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ReferenceLocation {
    /// Dotted path, `$` meaning "every element of this array"
    pub path: String,
    /// `None` embeds the whole document
    pub mask: Option<FieldMask>,
}

/// Every embedding point of one target collection, grouped by source
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReferenceGraph {
    target: String,
    sources: Vec<(String, Vec<ReferenceLocation>)>,
}

impl ReferenceGraph {
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Locations inside `source`, if it embeds the target at all
    pub fn get(&self, source: &str) -> Option<&[ReferenceLocation]> {
        self.sources
            .iter()
            .find(|(name, _)| name == source)
            .map(|(_, locations)| locations.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[ReferenceLocation])> {
        self.sources
            .iter()
            .map(|(name, locations)| (name.as_str(), locations.as_slice()))
    }

    /// Number of source collections
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Number of locations across all sources
    pub fn location_count(&self) -> usize {
        self.sources.iter().map(|(_, locations)| locations.len()).sum()
    }
}

/// Serialized as `{"Source": [{"path": ..., "mask": ...}], ...}`
impl Serialize for ReferenceGraph {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.sources.len()))?;
        for (source, locations) in &self.sources {
            map.serialize_entry(source, locations)?;
        }
        map.end()
    }
}

/// Build the reference graph of `target` over `definitions`
pub fn index_references_to(
    definitions: &[Arc<CollectionDefinition>],
    target: &str,
) -> Result<ReferenceGraph, SchemaError> {
    let mut sources = Vec::new();

    for definition in definitions {
        let locations: Vec<ReferenceLocation> = definition
            .reference_sites()?
            .into_iter()
            .filter(|site| site.marker.target == target)
            .map(|site| ReferenceLocation {
                path: site.dotted_path(),
                mask: site.marker.mask,
            })
            .collect();

        if !locations.is_empty() {
            sources.push((definition.model_name().to_string(), locations));
        }
    }

    tracing::debug!(
        "Indexed {} source(s) embedding '{}'",
        sources.len(),
        target
    );

    Ok(ReferenceGraph {
        target: target.to_string(),
        sources,
    })
}
