use std::collections::HashSet;
use std::time::Duration;

use kbsync_core::Document;
use tracing::{info, warn};

use super::backoff::RetryPolicy;
use super::catalog::RemoteCatalog;
use super::remote::RemoteStore;
use super::state::{StateError, StateStore};

pub const DEFAULT_DELETE_PAUSE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapOutcome {
    pub deleted: Vec<String>,
    /// `(id, reason)` for every delete that did not go through.
    pub failed: Vec<(String, String)>,
}

/// Deletes unreferenced documents one by one. A failed delete is logged and
/// left for a later run.
pub struct OrphanReaper<'a, R> {
    remote: &'a R,
    retry: &'a RetryPolicy,
    pause: Duration,
}

impl<'a, R: RemoteStore> OrphanReaper<'a, R> {
    pub fn new(remote: &'a R, retry: &'a RetryPolicy, pause: Duration) -> Self {
        Self {
            remote,
            retry,
            pause,
        }
    }

    pub async fn reap(&self, ids: &[String]) -> ReapOutcome {
        let mut outcome = ReapOutcome::default();
        for (idx, id) in ids.iter().enumerate() {
            if idx > 0 && !self.pause.is_zero() {
                tokio::time::sleep(self.pause).await;
            }
            match self
                .retry
                .run("delete_document", || self.remote.delete_document(id))
                .await
            {
                Ok(()) => {
                    info!(id = %id, "document deleted");
                    outcome.deleted.push(id.clone());
                }
                Err(err) if err.is_not_found() => {
                    info!(id = %id, "document already gone");
                    outcome.deleted.push(id.clone());
                }
                Err(err) => {
                    warn!(id = %id, error = %err, "delete failed, leaving orphan for a later run");
                    outcome.failed.push((id.clone(), err.to_string()));
                }
            }
        }
        outcome
    }

    pub async fn sweep(&self, orphans: &[Document]) -> ReapOutcome {
        let ids: Vec<String> = orphans.iter().map(|doc| doc.id.clone()).collect();
        self.reap(&ids).await
    }
}

/// Stored documents that belong to the corpus by name but that the agent
/// does not reference.
pub fn find_orphans(
    documents: &[Document],
    catalog: &RemoteCatalog,
    corpus_names: &HashSet<String>,
    permanent: &HashSet<String>,
) -> Vec<Document> {
    documents
        .iter()
        .filter(|doc| !catalog.is_referenced(&doc.id))
        .filter(|doc| {
            let base = base_name(&doc.name);
            corpus_names.contains(base) && !permanent.contains(base)
        })
        .cloned()
        .collect()
}

/// Drops state entries that point at a document deleted by a sweep, so a
/// later run does not take the fast path on a dead id.
pub async fn forget_deleted<S: StateStore>(
    state: &mut S,
    names: &HashSet<String>,
    deleted: &[String],
) -> Result<usize, StateError> {
    let mut removed = 0;
    for name in names {
        let stale = state
            .get(name)
            .await?
            .is_some_and(|record| deleted.contains(&record.remote_id));
        if stale {
            state.remove(name).await?;
            removed += 1;
        }
    }
    state.flush().await?;
    Ok(removed)
}

/// Strips the decorations older uploads carried: a `.md`/`.txt` extension,
/// then a `-vN` or `-YYYY-MM-DD` suffix.
pub fn base_name(name: &str) -> &str {
    let name = name
        .strip_suffix(".md")
        .or_else(|| name.strip_suffix(".txt"))
        .unwrap_or(name);
    if let Some((head, tail)) = name.rsplit_once("-v") {
        if !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()) {
            return head;
        }
    }
    if name.len() > 11 && name.is_char_boundary(name.len() - 11) {
        let (head, tail) = name.split_at(name.len() - 11);
        if is_date_suffix(tail) {
            return head;
        }
    }
    name
}

fn is_date_suffix(tail: &str) -> bool {
    let bytes = tail.as_bytes();
    bytes.len() == 11
        && bytes[0] == b'-'
        && bytes[5] == b'-'
        && bytes[8] == b'-'
        && [1..5, 6..8, 9..11]
            .into_iter()
            .all(|range| bytes[range].iter().all(u8::is_ascii_digit))
}
