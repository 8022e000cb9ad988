use std::collections::HashSet;

use tracing::{debug, info, warn};

use super::backoff::RetryPolicy;
use super::catalog::RemoteCatalog;
use super::fingerprint::Fingerprint;
use super::remote::{RemoteError, RemoteStore};
use super::state::StateStore;
use crate::corpus::LocalDocument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    New,
    Changed,
}

/// A document that has to be uploaded this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub name: String,
    pub content: String,
    pub fingerprint: Fingerprint,
    pub kind: ChangeKind,
    /// Id of the reference this upload supersedes.
    pub old_id: Option<String>,
}

/// An unchanged document whose state entry was missing or stale and got
/// confirmed against the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedDocument {
    pub name: String,
    pub remote_id: String,
    pub fingerprint: Fingerprint,
}

#[derive(Debug, Default)]
pub struct Detection {
    pub items: Vec<WorkItem>,
    pub unchanged: Vec<String>,
    pub permanent: Vec<String>,
    pub confirmed: Vec<ConfirmedDocument>,
    /// Documents that could not be compared, with the reason.
    pub failed: Vec<(String, String)>,
}

enum Verdict {
    Unchanged { confirmed: bool },
    Changed,
}

pub struct ChangeDetector<'a, R> {
    remote: &'a R,
    retry: &'a RetryPolicy,
    permanent: &'a HashSet<String>,
    strict: bool,
}

impl<'a, R: RemoteStore> ChangeDetector<'a, R> {
    pub fn new(
        remote: &'a R,
        retry: &'a RetryPolicy,
        permanent: &'a HashSet<String>,
        strict: bool,
    ) -> Self {
        Self {
            remote,
            retry,
            permanent,
            strict,
        }
    }

    /// Classifies every local document. A document whose remote reads keep
    /// failing transiently past the retry budget lands in `failed` and is
    /// left alone this run; any other read error counts as a change.
    pub async fn detect<S: StateStore>(
        &self,
        corpus: Vec<LocalDocument>,
        catalog: &RemoteCatalog,
        state: &S,
    ) -> Detection {
        let mut detection = Detection::default();
        for doc in corpus {
            if self.permanent.contains(&doc.name) {
                debug!(name = %doc.name, "permanent document, skipping");
                detection.permanent.push(doc.name);
                continue;
            }

            let Some(current_id) = catalog.current_id(&doc.name).map(str::to_string) else {
                info!(name = %doc.name, "new document");
                detection.items.push(WorkItem {
                    name: doc.name,
                    content: doc.content,
                    fingerprint: doc.fingerprint,
                    kind: ChangeKind::New,
                    old_id: None,
                });
                continue;
            };

            let verdict = match self.compare(&doc, &current_id, state).await {
                Ok(verdict) => verdict,
                Err(err) => {
                    warn!(name = %doc.name, id = %current_id, error = %err, "could not compare document, skipping");
                    detection.failed.push((doc.name, err.to_string()));
                    continue;
                }
            };
            match verdict {
                Verdict::Unchanged { confirmed } => {
                    if confirmed {
                        detection.confirmed.push(ConfirmedDocument {
                            name: doc.name.clone(),
                            remote_id: current_id,
                            fingerprint: doc.fingerprint,
                        });
                    }
                    detection.unchanged.push(doc.name);
                }
                Verdict::Changed => {
                    info!(name = %doc.name, old_id = %current_id, "changed document");
                    detection.items.push(WorkItem {
                        name: doc.name,
                        content: doc.content,
                        fingerprint: doc.fingerprint,
                        kind: ChangeKind::Changed,
                        old_id: Some(current_id),
                    });
                }
            }
        }
        detection
    }

    async fn compare<S: StateStore>(
        &self,
        doc: &LocalDocument,
        current_id: &str,
        state: &S,
    ) -> Result<Verdict, RemoteError> {
        match state.get(&doc.name).await {
            Ok(Some(record)) if record.remote_id == current_id => {
                return Ok(if record.fingerprint == doc.fingerprint.to_string() {
                    Verdict::Unchanged { confirmed: false }
                } else {
                    Verdict::Changed
                });
            }
            Ok(_) => {}
            Err(err) => warn!(name = %doc.name, error = %err, "state lookup failed, using remote"),
        }

        let metadata = match self
            .retry
            .run("get_document_metadata", || {
                self.remote.get_document_metadata(current_id)
            })
            .await
        {
            Ok(document) => document.metadata,
            Err(err) if err.is_transient() => return Err(err),
            Err(err) => {
                warn!(name = %doc.name, id = current_id, error = %err, "metadata unavailable, treating as changed");
                return Ok(Verdict::Changed);
            }
        };

        match metadata.size_bytes {
            Some(size) if !doc.fingerprint.same_size(size) => Ok(Verdict::Changed),
            Some(_) if !self.strict => Ok(Verdict::Unchanged { confirmed: true }),
            _ => self.compare_content(doc, current_id).await,
        }
    }

    async fn compare_content(
        &self,
        doc: &LocalDocument,
        current_id: &str,
    ) -> Result<Verdict, RemoteError> {
        let content = match self
            .retry
            .run("get_document_content", || {
                self.remote.get_document_content(current_id)
            })
            .await
        {
            Ok(content) => content,
            Err(err) if err.is_transient() => return Err(err),
            Err(err) => {
                warn!(name = %doc.name, id = current_id, error = %err, "content unavailable, treating as changed");
                return Ok(Verdict::Changed);
            }
        };
        if Fingerprint::of(&content) == doc.fingerprint {
            Ok(Verdict::Unchanged { confirmed: true })
        } else {
            Ok(Verdict::Changed)
        }
    }
}
