//! Domain Events
//!
//! Notifications sent by the [`Database`](crate::services::Database) after a
//! write became visible: on commit of the managed transaction, or right after
//! the write when the caller owns the session.
//!
//! Events travel over a tokio broadcast channel, so any number of subscribers
//! can observe them. Sending with no subscriber is not an error.

use crate::models::DocumentId;
use serde::{Deserialize, Serialize};

/// Domain events emitted by the database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DomainEvent {
    /// A new document was inserted
    DocumentCreated { collection: String, id: DocumentId },

    /// A document was replaced wholesale
    DocumentReplaced { collection: String, id: DocumentId },

    /// A document was updated (patch or closure)
    DocumentUpdated { collection: String, id: DocumentId },

    /// Embedded copies of a document were refreshed in `documents` documents
    ReferencesPropagated {
        collection: String,
        id: DocumentId,
        documents: u64,
    },
}

impl DomainEvent {
    pub fn event_type(&self) -> &str {
        match self {
            DomainEvent::DocumentCreated { .. } => "document:created",
            DomainEvent::DocumentReplaced { .. } => "document:replaced",
            DomainEvent::DocumentUpdated { .. } => "document:updated",
            DomainEvent::ReferencesPropagated { .. } => "references:propagated",
        }
    }

    pub fn collection(&self) -> &str {
        match self {
            DomainEvent::DocumentCreated { collection, .. }
            | DomainEvent::DocumentReplaced { collection, .. }
            | DomainEvent::DocumentUpdated { collection, .. }
            | DomainEvent::ReferencesPropagated { collection, .. } => collection,
        }
    }

    pub fn id(&self) -> DocumentId {
        match self {
            DomainEvent::DocumentCreated { id, .. }
            | DomainEvent::DocumentReplaced { id, .. }
            | DomainEvent::DocumentUpdated { id, .. }
            | DomainEvent::ReferencesPropagated { id, .. } => *id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The serialized form is internally tagged: the `type` field sits next to
    /// the variant fields instead of wrapping them.
    #[test]
    fn test_event_serialization_contract() {
        let id = DocumentId::new();
        let event = DomainEvent::ReferencesPropagated {
            collection: "Photo".to_string(),
            id,
            documents: 3,
        };

        let parsed = serde_json::to_value(&event).unwrap();
        assert_eq!(parsed["type"], "referencesPropagated");
        assert_eq!(parsed["collection"], "Photo");
        assert_eq!(parsed["id"], id.to_string());
        assert_eq!(parsed["documents"], 3);
        assert!(parsed.get("referencesPropagated").is_none());

        let back: DomainEvent = serde_json::from_value(parsed).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.event_type(), "references:propagated");
    }
}
