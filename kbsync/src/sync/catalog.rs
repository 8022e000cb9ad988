use std::collections::{HashMap, HashSet};

use kbsync_core::{Document, KnowledgeBaseRef};
use tracing::{debug, warn};

use super::backoff::RetryPolicy;
use super::remote::{RemoteError, RemoteStore};

pub const MAX_LIST_PAGES: u32 = 100;

/// Snapshot of what the agent references right now.
///
/// The current version of a name is its first reference; later references
/// with the same name are duplicates.
#[derive(Debug, Clone, Default)]
pub struct RemoteCatalog {
    references: Vec<KnowledgeBaseRef>,
    first_by_name: HashMap<String, usize>,
    referenced_ids: HashSet<String>,
}

impl RemoteCatalog {
    pub async fn load<R: RemoteStore>(
        remote: &R,
        retry: &RetryPolicy,
    ) -> Result<Self, RemoteError> {
        let references = retry
            .run("get_agent_reference_list", || remote.get_agent_reference_list())
            .await?;
        let catalog = Self::from_references(references);
        debug!(
            references = catalog.references.len(),
            names = catalog.first_by_name.len(),
            "catalog loaded"
        );
        Ok(catalog)
    }

    pub fn from_references(references: Vec<KnowledgeBaseRef>) -> Self {
        let mut first_by_name = HashMap::new();
        let mut referenced_ids = HashSet::new();
        for (idx, entry) in references.iter().enumerate() {
            first_by_name.entry(entry.name.clone()).or_insert(idx);
            referenced_ids.insert(entry.id.clone());
        }
        Self {
            references,
            first_by_name,
            referenced_ids,
        }
    }

    pub fn current_id(&self, name: &str) -> Option<&str> {
        self.first_by_name
            .get(name)
            .map(|&idx| self.references[idx].id.as_str())
    }

    pub fn is_referenced(&self, id: &str) -> bool {
        self.referenced_ids.contains(id)
    }

    pub fn duplicate_count(&self) -> usize {
        self.references.len() - self.first_by_name.len()
    }

    /// Every document in the store, following pagination up to
    /// [`MAX_LIST_PAGES`].
    pub async fn list_all_documents<R: RemoteStore>(
        remote: &R,
        retry: &RetryPolicy,
    ) -> Result<Vec<Document>, RemoteError> {
        let mut documents = Vec::new();
        for page in 0..MAX_LIST_PAGES {
            let batch = retry
                .run("list_documents", || remote.list_documents(page))
                .await?;
            let empty = batch.documents.is_empty();
            documents.extend(batch.documents);
            if !batch.has_more || empty {
                return Ok(documents);
            }
        }
        warn!(
            pages = MAX_LIST_PAGES,
            documents = documents.len(),
            "document listing truncated at page cap"
        );
        Ok(documents)
    }
}
