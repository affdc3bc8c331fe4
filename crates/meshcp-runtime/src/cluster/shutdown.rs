use std::future::Future;

use tracing::Instrument;

use meshcp_core::{MeshError, Result};

/// Run `work` to completion on its own task, detached from the caller's cancellation.
///
/// The task inherits the caller's current span. Dropping the returned future
/// does not abort the work.
pub async fn detached<F, T>(work: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::spawn(work.instrument(tracing::Span::current()));
    handle
        .await
        .map_err(|e| MeshError::Internal(format!("detached task failed: {}", e)))?
}
