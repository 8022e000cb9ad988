use std::time::Duration;

use kbsync_core::{
    ApiErrorClass, Document, DocumentPage, KbError, KnowledgeBaseClient, KnowledgeBaseRef,
    RagIndexList, RagIndexStatus,
};
use thiserror::Error;

pub const DEFAULT_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("transient remote failure: {0}")]
    Transient(String),
    #[error("rate limited: {message}")]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("rejected by remote: {0}")]
    Permanent(String),
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteError::Transient(_) | RemoteError::RateLimited { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RemoteError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<KbError> for RemoteError {
    fn from(err: KbError) -> Self {
        let message = err.to_string();
        match err.classification() {
            Some(ApiErrorClass::RateLimit) => RemoteError::RateLimited {
                retry_after: err.retry_after(),
                message,
            },
            Some(ApiErrorClass::Transient) => RemoteError::Transient(message),
            Some(ApiErrorClass::NotFound) => RemoteError::NotFound(message),
            Some(ApiErrorClass::Auth | ApiErrorClass::Permanent) | None => {
                RemoteError::Permanent(message)
            }
        }
    }
}

/// Indexing state of an uploaded document as the engine sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexingStatus {
    Pending,
    Running,
    Succeeded,
    Failed(String),
    NotFound,
}

impl IndexingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IndexingStatus::Succeeded | IndexingStatus::Failed(_) | IndexingStatus::NotFound
        )
    }

    fn from_index_list(list: &RagIndexList) -> Self {
        let Some(entry) = list.current() else {
            // Requested but not materialized yet.
            return IndexingStatus::Pending;
        };
        match entry.status {
            RagIndexStatus::Created | RagIndexStatus::Unknown => IndexingStatus::Pending,
            RagIndexStatus::Processing => IndexingStatus::Running,
            RagIndexStatus::Succeeded => IndexingStatus::Succeeded,
            RagIndexStatus::Failed => IndexingStatus::Failed("failed".into()),
            RagIndexStatus::RagLimitExceeded => {
                IndexingStatus::Failed("rag_limit_exceeded".into())
            }
            RagIndexStatus::DocumentTooSmall => {
                IndexingStatus::Failed("document_too_small".into())
            }
        }
    }
}

/// The remote store and agent operations the engine depends on.
#[allow(async_fn_in_trait)]
pub trait RemoteStore {
    async fn list_documents(&self, page: u32) -> Result<DocumentPage, RemoteError>;
    async fn get_document_metadata(&self, id: &str) -> Result<Document, RemoteError>;
    async fn get_document_content(&self, id: &str) -> Result<String, RemoteError>;
    async fn create_text_document(&self, name: &str, content: &str)
    -> Result<String, RemoteError>;
    async fn request_indexing(&self, id: &str, model: &str) -> Result<(), RemoteError>;
    async fn get_indexing_status(&self, id: &str) -> Result<IndexingStatus, RemoteError>;
    async fn delete_document(&self, id: &str) -> Result<(), RemoteError>;
    async fn get_agent_reference_list(&self) -> Result<Vec<KnowledgeBaseRef>, RemoteError>;
    async fn replace_agent_reference_list(
        &self,
        list: &[KnowledgeBaseRef],
    ) -> Result<(), RemoteError>;
}

/// `RemoteStore` over HTTP, bound to one agent.
#[derive(Clone)]
pub struct AgentRemote {
    client: KnowledgeBaseClient,
    agent_id: String,
}

impl AgentRemote {
    pub fn new(client: KnowledgeBaseClient, agent_id: impl Into<String>) -> Self {
        Self {
            client,
            agent_id: agent_id.into(),
        }
    }

}

impl RemoteStore for AgentRemote {
    async fn list_documents(&self, page: u32) -> Result<DocumentPage, RemoteError> {
        Ok(self.client.list_documents(page, DEFAULT_PAGE_SIZE).await?)
    }

    async fn get_document_metadata(&self, id: &str) -> Result<Document, RemoteError> {
        Ok(self.client.get_document(id).await?)
    }

    async fn get_document_content(&self, id: &str) -> Result<String, RemoteError> {
        Ok(self.client.get_document_content(id).await?)
    }

    async fn create_text_document(
        &self,
        name: &str,
        content: &str,
    ) -> Result<String, RemoteError> {
        Ok(self.client.create_text_document(name, content).await?)
    }

    async fn request_indexing(&self, id: &str, model: &str) -> Result<(), RemoteError> {
        let entry = self.client.request_indexing(id, model).await?;
        tracing::debug!(id, status = ?entry.status, "indexing requested");
        Ok(())
    }

    async fn get_indexing_status(&self, id: &str) -> Result<IndexingStatus, RemoteError> {
        match self.client.get_indexing_status(id).await {
            Ok(list) => Ok(IndexingStatus::from_index_list(&list)),
            Err(err) if err.classification() == Some(ApiErrorClass::NotFound) => {
                Ok(IndexingStatus::NotFound)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn delete_document(&self, id: &str) -> Result<(), RemoteError> {
        Ok(self.client.delete_document(id).await?)
    }

    async fn get_agent_reference_list(&self) -> Result<Vec<KnowledgeBaseRef>, RemoteError> {
        Ok(self.client.get_agent_knowledge_base(&self.agent_id).await?)
    }

    async fn replace_agent_reference_list(
        &self,
        list: &[KnowledgeBaseRef],
    ) -> Result<(), RemoteError> {
        Ok(self
            .client
            .replace_agent_knowledge_base(&self.agent_id, list)
            .await?)
    }
}
