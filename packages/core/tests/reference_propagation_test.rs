//! Reference Propagation Tests
//!
//! Tests for keeping embedded copies in sync with the documents they copy.
//!
//! ## Test Coverage
//!
//! ### Reference Graph
//! - Graph of a collection embedded masked in one place and full in another
//! - Indexing the same definitions twice gives the same graph
//! - Embedding paths under arrays of objects
//! - Recursive schemas expose the first level of self-nesting
//!
//! ### Propagation
//! - Masked copies receive only `_id` plus the masked fields
//! - Full copies inside arrays receive every field
//! - Only array elements carrying the updated `_id` are touched
//! - Fields removed from the source disappear from every copy
//! - References inside recursive comment trees are hydrated and refreshed
//! - `update_references: false` leaves copies stale until `update_references`
//! - A failed update rolls back both the document and the copies

#[cfg(test)]
mod reference_propagation_tests {
    use anyhow::Result;
    use denorm_core::db::{DocumentStore, InMemoryStore};
    use denorm_core::logging::init_tracing;
    use denorm_core::models::schema_node::{array, deferred, id, object, string, SchemaNode};
    use denorm_core::models::{DocumentId, HydratedValue};
    use denorm_core::schema::{reference, CollectionDefinition};
    use denorm_core::services::{
        Database, DocumentError, UpdateInput, UpdateOptions, WriteOptions,
    };
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn comment() -> SchemaNode {
        object()
            .field("author", reference::partial("User", ["name"]))
            .field("text", string())
            .field("replies", array(deferred("Comment", comment)))
            .into()
    }

    /// Photo is embedded masked in User, Gallery and Profile and in full in Post;
    /// User is embedded in recursive Thread comments
    async fn create_test_db() -> Result<(Database, Arc<InMemoryStore>)> {
        init_tracing();

        let store = Arc::new(InMemoryStore::new());
        let database = Database::new(store.clone());

        database.add_definitions([
            CollectionDefinition::new(
                "Photo",
                object()
                    .field("_id", id())
                    .field("url", string())
                    .field("description", string().optional()),
            )?,
            CollectionDefinition::new(
                "User",
                object()
                    .field("_id", id())
                    .field("name", string())
                    .field("photo", reference::partial("Photo", ["url"])),
            )?,
            CollectionDefinition::new(
                "Post",
                object()
                    .field("_id", id())
                    .field("title", string())
                    .field("photos", array(reference::full("Photo"))),
            )?,
            CollectionDefinition::new(
                "Gallery",
                object().field("_id", id()).field(
                    "sections",
                    array(
                        object()
                            .field("heading", string())
                            .field("cover", reference::partial("Photo", ["url"])),
                    ),
                ),
            )?,
            CollectionDefinition::new(
                "Profile",
                object()
                    .field("_id", id())
                    .field("avatar", reference::partial("Photo", ["url", "description"])),
            )?,
            CollectionDefinition::new(
                "Thread",
                object()
                    .field("_id", id())
                    .field("comments", array(comment())),
            )?,
        ])?;

        Ok((database, store))
    }

    async fn create_photo(database: &Database, url: &str) -> Result<DocumentId> {
        let photo = database
            .create("Photo", json!({"url": url, "description": "original"}))
            .await?;
        Ok(DocumentId::from_value(&photo.to_raw()["_id"]).expect("generated id"))
    }

    fn single(store: &InMemoryStore, collection: &str) -> Value {
        let documents = store.documents(collection);
        assert_eq!(documents.len(), 1, "expected one {collection} document");
        Value::Object(documents[0].clone())
    }

    // ========================================================================
    // Reference Graph
    // ========================================================================

    #[tokio::test]
    async fn test_reference_graph_json() -> Result<()> {
        let (database, _store) = create_test_db().await?;

        let graph = database.get_references("Photo")?;
        assert_eq!(
            serde_json::to_value(&graph)?,
            json!({
                "User": [{"path": "photo", "mask": {"url": true}}],
                "Post": [{"path": "photos.$", "mask": null}],
                "Gallery": [{"path": "sections.$.cover", "mask": {"url": true}}],
                "Profile": [{"path": "avatar", "mask": {"url": true, "description": true}}]
            })
        );

        assert_eq!(graph, database.get_references("Photo")?);
        assert!(database.get_references("Thread")?.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn test_reference_graph_of_unknown_collection_fails() -> Result<()> {
        let (database, _store) = create_test_db().await?;

        let result = database.get_references("Nope");
        assert!(matches!(result, Err(DocumentError::UnknownCollection { .. })));

        Ok(())
    }

    // ========================================================================
    // Propagation
    // ========================================================================

    #[tokio::test]
    async fn test_update_propagates_masked_and_full_copies() -> Result<()> {
        let (database, store) = create_test_db().await?;
        let photo_id = create_photo(&database, "a.png").await?;

        database
            .create("User", json!({"name": "Ada", "photo": photo_id.to_string()}))
            .await?;
        database
            .create(
                "Post",
                json!({"title": "Trip", "photos": [photo_id.to_string()]}),
            )
            .await?;

        // The full copy in Post starts with just the id, the masked one is completed
        assert_eq!(single(&store, "User")["photo"], json!({"_id": photo_id, "url": "a.png"}));
        assert_eq!(single(&store, "Post")["photos"], json!([{"_id": photo_id}]));

        database
            .update(
                "Photo",
                photo_id,
                UpdateInput::patch(json!({"url": "b.png", "description": "new"})),
            )
            .await?;

        assert_eq!(single(&store, "User")["photo"], json!({"_id": photo_id, "url": "b.png"}));
        assert_eq!(
            single(&store, "Post")["photos"],
            json!([{"_id": photo_id, "url": "b.png", "description": "new"}])
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_propagation_only_touches_matching_elements() -> Result<()> {
        let (database, store) = create_test_db().await?;
        let first = create_photo(&database, "first.png").await?;
        let second = create_photo(&database, "second.png").await?;

        database
            .create(
                "Gallery",
                json!({
                    "sections": [
                        {"heading": "one", "cover": first.to_string()},
                        {"heading": "two", "cover": second.to_string()}
                    ]
                }),
            )
            .await?;

        database
            .update("Photo", first, UpdateInput::patch(json!({"url": "changed.png"})))
            .await?;

        let gallery = single(&store, "Gallery");
        assert_eq!(
            gallery["sections"],
            json!([
                {"heading": "one", "cover": {"_id": first, "url": "changed.png"}},
                {"heading": "two", "cover": {"_id": second, "url": "second.png"}}
            ])
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_disabled_propagation_then_manual_refresh() -> Result<()> {
        let (database, store) = create_test_db().await?;
        let photo_id = create_photo(&database, "a.png").await?;
        database
            .create("User", json!({"name": "Ada", "photo": photo_id.to_string()}))
            .await?;
        database
            .create("User", json!({"name": "Bob", "photo": photo_id.to_string()}))
            .await?;

        database
            .update_with(
                "Photo",
                photo_id,
                UpdateInput::patch(json!({"url": "b.png"})),
                UpdateOptions {
                    update_references: Some(false),
                    ..Default::default()
                },
            )
            .await?;

        for user in store.documents("User") {
            assert_eq!(user["photo"]["url"], "a.png");
        }

        let report = database.update_references("Photo", photo_id).await?;
        assert_eq!(report.modified_in("User"), 2);
        assert_eq!(report.modified_in("Post"), 0);
        assert_eq!(report.total_modified(), 2);

        for user in store.documents("User") {
            assert_eq!(user["photo"]["url"], "b.png");
        }

        Ok(())
    }

    #[tokio::test]
    async fn test_update_references_inside_caller_session() -> Result<()> {
        let (database, store) = create_test_db().await?;
        let photo_id = create_photo(&database, "a.png").await?;
        database
            .create("User", json!({"name": "Ada", "photo": photo_id.to_string()}))
            .await?;
        database
            .update_with(
                "Photo",
                photo_id,
                UpdateInput::patch(json!({"url": "b.png"})),
                UpdateOptions {
                    update_references: Some(false),
                    ..Default::default()
                },
            )
            .await?;

        let session = store.start_session().await?;
        database
            .update_references_with("Photo", photo_id, WriteOptions { session: Some(session) })
            .await?;

        // Not visible until the caller commits
        assert_eq!(single(&store, "User")["photo"]["url"], "a.png");
        store.commit_transaction(&session).await?;
        store.end_session(&session).await?;
        assert_eq!(single(&store, "User")["photo"]["url"], "b.png");

        Ok(())
    }

    #[tokio::test]
    async fn test_failed_update_leaves_everything_untouched() -> Result<()> {
        let (database, store) = create_test_db().await?;
        let photo_id = create_photo(&database, "a.png").await?;
        database
            .create("User", json!({"name": "Ada", "photo": photo_id.to_string()}))
            .await?;

        let result = database
            .update("Photo", photo_id, UpdateInput::patch(json!({"url": 42})))
            .await;
        assert!(matches!(result, Err(DocumentError::ValidationFailure(_))));

        assert_eq!(single(&store, "Photo")["url"], "a.png");
        assert_eq!(single(&store, "User")["photo"]["url"], "a.png");
        assert_eq!(store.open_sessions(), 0);

        Ok(())
    }

    #[tokio::test]
    async fn test_update_references_of_missing_document_fails() -> Result<()> {
        let (database, store) = create_test_db().await?;

        let result = database.update_references("Photo", DocumentId::new()).await;
        assert!(matches!(result, Err(DocumentError::DocumentNotFound { .. })));
        assert_eq!(store.open_sessions(), 0);

        Ok(())
    }

    #[tokio::test]
    async fn test_removed_fields_disappear_from_copies() -> Result<()> {
        let (database, store) = create_test_db().await?;
        let photo_id = create_photo(&database, "a.png").await?;
        database
            .create("Profile", json!({"avatar": photo_id.to_string()}))
            .await?;
        database
            .create("Post", json!({"title": "Trip", "photos": [photo_id.to_string()]}))
            .await?;
        database
            .update_references("Photo", photo_id)
            .await?;

        assert_eq!(
            single(&store, "Profile")["avatar"],
            json!({"_id": photo_id, "url": "a.png", "description": "original"})
        );
        assert_eq!(
            single(&store, "Post")["photos"],
            json!([{"_id": photo_id, "url": "a.png", "description": "original"}])
        );

        database
            .update(
                "Photo",
                photo_id,
                UpdateInput::apply(|mut photo| {
                    photo.remove("description");
                    HydratedValue::from(photo)
                }),
            )
            .await?;

        assert_eq!(
            single(&store, "Photo"),
            json!({"_id": photo_id, "url": "a.png"})
        );
        assert_eq!(
            single(&store, "Profile")["avatar"],
            json!({"_id": photo_id, "url": "a.png"})
        );
        assert_eq!(
            single(&store, "Post")["photos"],
            json!([{"_id": photo_id, "url": "a.png"}])
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_recursive_comments_hydrate_and_propagate() -> Result<()> {
        let (database, store) = create_test_db().await?;
        let photo_id = create_photo(&database, "a.png").await?;
        let ada = database
            .create("User", json!({"name": "Ada", "photo": photo_id.to_string()}))
            .await?;
        let ada_id = DocumentId::from_value(&ada.to_raw()["_id"]).expect("generated id");
        let bob = database
            .create("User", json!({"name": "Bob", "photo": photo_id.to_string()}))
            .await?;
        let bob_id = DocumentId::from_value(&bob.to_raw()["_id"]).expect("generated id");

        let graph = database.get_references("User")?;
        assert_eq!(
            serde_json::to_value(&graph)?,
            json!({
                "Thread": [
                    {"path": "comments.$.author", "mask": {"name": true}},
                    {"path": "comments.$.replies.$.author", "mask": {"name": true}}
                ]
            })
        );

        database
            .create(
                "Thread",
                json!({
                    "comments": [{
                        "author": ada_id.to_string(),
                        "text": "first",
                        "replies": [
                            {"author": bob_id.to_string(), "text": "hi", "replies": []},
                            {"author": ada_id.to_string(), "text": "hello", "replies": []}
                        ]
                    }]
                }),
            )
            .await?;

        let stored = store.documents("Thread").remove(0);
        let thread = database.hydrate("Thread", stored).await?;
        let reply_author = thread
            .get("comments")
            .and_then(|comments| comments.as_array())
            .and_then(|comments| comments[0].get("replies"))
            .and_then(|replies| replies.as_array())
            .and_then(|replies| replies[1].get("author"))
            .and_then(HydratedValue::as_reference)
            .expect("reply author is a reference");
        assert_eq!(reply_author.id(), ada_id);
        assert_eq!(reply_author.collection(), "User");

        database
            .update("User", ada_id, UpdateInput::patch(json!({"name": "Ada L."})))
            .await?;

        let thread = single(&store, "Thread");
        let comment = &thread["comments"][0];
        assert_eq!(comment["author"], json!({"_id": ada_id, "name": "Ada L."}));
        assert_eq!(comment["replies"][0]["author"], json!({"_id": bob_id, "name": "Bob"}));
        assert_eq!(comment["replies"][1]["author"], json!({"_id": ada_id, "name": "Ada L."}));

        Ok(())
    }
}
