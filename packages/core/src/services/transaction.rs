//! Managed transactions.
//!
//! Operations accept an optional caller session. Without one, the operation
//! opens its own session, commits on success, aborts on error and ends the
//! session on every path.

use crate::db::{DocumentStore, Session};
use crate::services::DocumentError;
use futures::future::BoxFuture;

/// Run `operation` inside `external`, or inside a transaction of its own
pub async fn with_transaction<'a, T, F>(
    store: &'a dyn DocumentStore,
    external: Option<&Session>,
    name: &str,
    operation: F,
) -> Result<T, DocumentError>
where
    F: FnOnce(Session) -> BoxFuture<'a, Result<T, DocumentError>>,
{
    if let Some(session) = external {
        return operation(*session).await;
    }

    let session = store.start_session().await?;
    let result = match operation(session).await {
        Ok(value) => store
            .commit_transaction(&session)
            .await
            .map(|()| value)
            .map_err(DocumentError::from),
        Err(error) => {
            tracing::warn!("Aborting {} ({}): {}", name, session, error);
            if let Err(abort_error) = store.abort_transaction(&session).await {
                tracing::warn!("Failed to abort {}: {}", session, abort_error);
            }
            Err(error)
        }
    };

    if let Err(end_error) = store.end_session(&session).await {
        tracing::warn!("Failed to end {}: {}", session, end_error);
    }
    result
}
