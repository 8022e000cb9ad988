#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use kbsync::corpus::LocalDocument;
use kbsync::sync::backoff::{Backoff, RetryPolicy};
use kbsync::sync::engine::SyncConfig;
use kbsync::sync::remote::{IndexingStatus, RemoteError, RemoteStore};
use kbsync_core::{Document, DocumentMetadata, DocumentPage, KnowledgeBaseRef};
use tokio_util::sync::CancellationToken;

const PAGE_SIZE: usize = 2;

#[derive(Debug, Clone)]
pub enum IndexPlan {
    Succeed,
    SucceedAfter(u32),
    Fail(String),
    Never,
}

#[derive(Debug, Clone)]
struct StoredDoc {
    name: String,
    content: String,
    size: Option<u64>,
    plan: IndexPlan,
    polls: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub documents: BTreeMap<String, (String, String)>,
    pub references: Vec<(String, String)>,
}

#[derive(Default)]
struct Inner {
    docs: BTreeMap<String, StoredDoc>,
    refs: Vec<KnowledgeBaseRef>,
    next_id: u32,
    plans: HashMap<String, IndexPlan>,
    rejected: HashSet<String>,
    calls: HashMap<&'static str, usize>,
    fail_next: HashMap<&'static str, VecDeque<RemoteError>>,
    fail_always: HashMap<&'static str, RemoteError>,
    cancel_on_create: Option<CancellationToken>,
    violations: Vec<String>,
}

impl Inner {
    fn enter(&mut self, op: &'static str) -> Result<(), RemoteError> {
        *self.calls.entry(op).or_default() += 1;
        if let Some(err) = self.fail_next.get_mut(op).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        if let Some(err) = self.fail_always.get(op) {
            return Err(err.clone());
        }
        Ok(())
    }

    fn is_usable(&self, id: &str) -> bool {
        self.docs
            .get(id)
            .is_some_and(|doc| !matches!(doc.plan, IndexPlan::Fail(_)))
    }
}

/// In-memory knowledge base plus agent, with failure injection and a
/// dangling-reference watchdog.
#[derive(Clone, Default)]
pub struct FakeKnowledgeBase {
    inner: Arc<Mutex<Inner>>,
}

impl FakeKnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    pub fn seed_document(&self, id: &str, name: &str, content: &str) {
        self.lock().docs.insert(
            id.to_string(),
            StoredDoc {
                name: name.to_string(),
                content: content.to_string(),
                size: Some(content.len() as u64),
                plan: IndexPlan::Succeed,
                polls: 0,
            },
        );
    }

    pub fn seed_reference(&self, name: &str, id: &str) {
        self.lock().refs.push(KnowledgeBaseRef::text(name, id));
    }

    /// Seeds a stored document and references it.
    pub fn seed(&self, id: &str, name: &str, content: &str) {
        self.seed_document(id, name, content);
        self.seed_reference(name, id);
    }

    pub fn set_size(&self, id: &str, size: Option<u64>) {
        if let Some(doc) = self.lock().docs.get_mut(id) {
            doc.size = size;
        }
    }

    pub fn plan_indexing(&self, name: &str, plan: IndexPlan) {
        self.lock().plans.insert(name.to_string(), plan);
    }

    pub fn reject(&self, name: &str) {
        self.lock().rejected.insert(name.to_string());
    }

    pub fn fail_next(&self, op: &'static str, err: RemoteError) {
        self.lock().fail_next.entry(op).or_default().push_back(err);
    }

    pub fn fail_always(&self, op: &'static str, err: RemoteError) {
        self.lock().fail_always.insert(op, err);
    }

    pub fn cancel_on_create(&self, token: CancellationToken) {
        self.lock().cancel_on_create = Some(token);
    }

    pub fn calls(&self, op: &str) -> usize {
        self.lock().calls.get(op).copied().unwrap_or(0)
    }

    pub fn violations(&self) -> Vec<String> {
        self.lock().violations.clone()
    }

    pub fn snapshot(&self) -> Snapshot {
        let inner = self.lock();
        Snapshot {
            documents: inner
                .docs
                .iter()
                .map(|(id, doc)| (id.clone(), (doc.name.clone(), doc.content.clone())))
                .collect(),
            references: inner
                .refs
                .iter()
                .map(|r| (r.name.clone(), r.id.clone()))
                .collect(),
        }
    }

    pub fn reference_ids(&self) -> Vec<(String, String)> {
        self.snapshot().references
    }

    pub fn document_ids(&self) -> Vec<String> {
        self.lock().docs.keys().cloned().collect()
    }

    pub fn content_of(&self, id: &str) -> Option<String> {
        self.lock().docs.get(id).map(|doc| doc.content.clone())
    }
}

impl RemoteStore for FakeKnowledgeBase {
    async fn list_documents(&self, page: u32) -> Result<DocumentPage, RemoteError> {
        let mut inner = self.lock();
        inner.enter("list_documents")?;
        let all: Vec<Document> = inner
            .docs
            .iter()
            .map(|(id, doc)| Document {
                id: id.clone(),
                name: doc.name.clone(),
                metadata: DocumentMetadata {
                    created_at_unix_secs: None,
                    size_bytes: doc.size,
                },
            })
            .collect();
        let start = page as usize * PAGE_SIZE;
        let documents: Vec<Document> = all.iter().skip(start).take(PAGE_SIZE).cloned().collect();
        Ok(DocumentPage {
            has_more: start + PAGE_SIZE < all.len(),
            documents,
        })
    }

    async fn get_document_metadata(&self, id: &str) -> Result<Document, RemoteError> {
        let mut inner = self.lock();
        inner.enter("get_document_metadata")?;
        let doc = inner
            .docs
            .get(id)
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;
        Ok(Document {
            id: id.to_string(),
            name: doc.name.clone(),
            metadata: DocumentMetadata {
                created_at_unix_secs: None,
                size_bytes: doc.size,
            },
        })
    }

    async fn get_document_content(&self, id: &str) -> Result<String, RemoteError> {
        let mut inner = self.lock();
        inner.enter("get_document_content")?;
        inner
            .docs
            .get(id)
            .map(|doc| doc.content.clone())
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))
    }

    async fn create_text_document(
        &self,
        name: &str,
        content: &str,
    ) -> Result<String, RemoteError> {
        let mut inner = self.lock();
        inner.enter("create_text_document")?;
        if inner.rejected.contains(name) {
            return Err(RemoteError::Permanent(format!("{name}: document is too small")));
        }
        inner.next_id += 1;
        let id = format!("gen-{}", inner.next_id);
        let plan = inner.plans.get(name).cloned().unwrap_or(IndexPlan::Succeed);
        inner.docs.insert(
            id.clone(),
            StoredDoc {
                name: name.to_string(),
                content: content.to_string(),
                size: Some(content.len() as u64),
                plan,
                polls: 0,
            },
        );
        if let Some(token) = inner.cancel_on_create.take() {
            token.cancel();
        }
        Ok(id)
    }

    async fn request_indexing(&self, id: &str, _model: &str) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        inner.enter("request_indexing")?;
        if inner.docs.contains_key(id) {
            Ok(())
        } else {
            Err(RemoteError::NotFound(id.to_string()))
        }
    }

    async fn get_indexing_status(&self, id: &str) -> Result<IndexingStatus, RemoteError> {
        let mut inner = self.lock();
        inner.enter("get_indexing_status")?;
        let Some(doc) = inner.docs.get_mut(id) else {
            return Ok(IndexingStatus::NotFound);
        };
        doc.polls += 1;
        Ok(match &doc.plan {
            IndexPlan::Succeed => IndexingStatus::Succeeded,
            IndexPlan::SucceedAfter(n) if doc.polls > *n => IndexingStatus::Succeeded,
            IndexPlan::SucceedAfter(_) => IndexingStatus::Running,
            IndexPlan::Fail(reason) => IndexingStatus::Failed(reason.clone()),
            IndexPlan::Never => IndexingStatus::Pending,
        })
    }

    async fn delete_document(&self, id: &str) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        inner.enter("delete_document")?;
        if inner.refs.iter().any(|r| r.id == id) {
            inner.violations.push(format!("deleted referenced document {id}"));
        }
        match inner.docs.remove(id) {
            Some(_) => Ok(()),
            None => Err(RemoteError::NotFound(id.to_string())),
        }
    }

    async fn get_agent_reference_list(&self) -> Result<Vec<KnowledgeBaseRef>, RemoteError> {
        let mut inner = self.lock();
        inner.enter("get_agent_reference_list")?;
        Ok(inner.refs.clone())
    }

    async fn replace_agent_reference_list(
        &self,
        list: &[KnowledgeBaseRef],
    ) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        inner.enter("replace_agent_reference_list")?;
        let dangling: Vec<String> = list
            .iter()
            .filter(|r| !inner.is_usable(&r.id))
            .map(|r| format!("referenced unusable document {}", r.id))
            .collect();
        inner.violations.extend(dangling);
        inner.refs = list.to_vec();
        Ok(())
    }
}

pub fn doc(name: &str, content: &str) -> LocalDocument {
    LocalDocument::new(name, content)
}

/// Engine settings with instant retries and short waits, for paused time.
pub fn fast_config() -> SyncConfig {
    SyncConfig {
        retry: RetryPolicy::new(
            3,
            Backoff::new(Duration::from_millis(10), Duration::from_millis(50), false),
        ),
        poll_interval: Duration::from_secs(1),
        index_timeout: Duration::from_secs(10),
        delete_pause: Duration::ZERO,
        ..SyncConfig::default()
    }
}

pub fn transient(op: &str) -> RemoteError {
    RemoteError::Transient(format!("{op}: connection reset"))
}
