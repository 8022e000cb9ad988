use std::sync::atomic::{AtomicU32, Ordering};

use thiserror::Error;
use tracing::{info, warn};

use super::backoff::RetryPolicy;
use super::detect::WorkItem;
use super::remote::{RemoteError, RemoteStore};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadFailure {
    #[error("upload failed after retries: {0}")]
    Transient(String),
    #[error("upload rejected: {0}")]
    Permanent(String),
}

impl From<RemoteError> for UploadFailure {
    fn from(err: RemoteError) -> Self {
        if err.is_transient() {
            UploadFailure::Transient(err.to_string())
        } else {
            UploadFailure::Permanent(err.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Created {
    pub id: String,
    /// A create attempt failed transiently before this one went through, so
    /// the store may hold an unreferenced copy that `prune` can reclaim.
    pub retried: bool,
}

/// Creates the new remote document for a work item and asks for it to be
/// indexed. The agent is never touched here.
pub struct DocumentUploader<'a, R> {
    remote: &'a R,
    retry: &'a RetryPolicy,
    model: &'a str,
}

impl<'a, R: RemoteStore> DocumentUploader<'a, R> {
    pub fn new(remote: &'a R, retry: &'a RetryPolicy, model: &'a str) -> Self {
        Self {
            remote,
            retry,
            model,
        }
    }

    pub async fn upload(&self, item: &WorkItem) -> Result<Created, UploadFailure> {
        let transient_failures = AtomicU32::new(0);
        let failures = &transient_failures;
        let id = self
            .retry
            .run("create_text_document", move || async move {
                let result = self.remote.create_text_document(&item.name, &item.content).await;
                if matches!(result, Err(RemoteError::Transient(_))) {
                    failures.fetch_add(1, Ordering::Relaxed);
                }
                result
            })
            .await?;
        let retried = transient_failures.load(Ordering::Relaxed) > 0;
        if retried {
            warn!(
                name = %item.name,
                id = %id,
                "create succeeded after a transient failure, an earlier attempt may have left a duplicate"
            );
        }
        info!(name = %item.name, id = %id, size = item.fingerprint.size(), "document created");

        if let Err(err) = self
            .retry
            .run("request_indexing", || {
                self.remote.request_indexing(&id, self.model)
            })
            .await
        {
            warn!(name = %item.name, id = %id, error = %err, "indexing request failed, removing upload");
            if let Err(delete_err) = self
                .retry
                .run("delete_document", || self.remote.delete_document(&id))
                .await
            {
                warn!(id = %id, error = %delete_err, "could not remove unindexed upload");
            }
            return Err(err.into());
        }
        Ok(Created { id, retried })
    }
}
