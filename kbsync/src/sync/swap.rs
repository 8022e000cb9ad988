use std::collections::{HashMap, HashSet};

use kbsync_core::KnowledgeBaseRef;
use tracing::{debug, info};

use super::backoff::RetryPolicy;
use super::remote::{RemoteError, RemoteStore};

/// An uploaded document that may be referenced by the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyDocument {
    pub name: String,
    pub new_id: String,
    pub old_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupersedeReason {
    Replaced,
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superseded {
    pub id: String,
    pub name: String,
    pub reason: SupersedeReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwapPlan {
    pub references: Vec<KnowledgeBaseRef>,
    /// Ids dropped from the list and referenced nowhere in `references`.
    pub superseded: Vec<Superseded>,
    pub replaced: Vec<String>,
    pub appended: Vec<String>,
}

impl SwapPlan {
    pub fn is_noop(&self) -> bool {
        self.superseded.is_empty() && self.replaced.is_empty() && self.appended.is_empty()
    }

    pub fn swapped(&self) -> impl Iterator<Item = &str> {
        self.replaced
            .iter()
            .chain(self.appended.iter())
            .map(String::as_str)
    }
}

/// Rebuilds the reference list in one pass. The first entry per name
/// survives, pointed at the ready replacement if there is one; every later
/// entry with that name is dropped. Ready names missing from the list are
/// appended in `ready` order.
pub fn rebuild_references(current: &[KnowledgeBaseRef], ready: &[ReadyDocument]) -> SwapPlan {
    let ready_by_name: HashMap<&str, &ReadyDocument> =
        ready.iter().map(|doc| (doc.name.as_str(), doc)).collect();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut plan = SwapPlan::default();
    let mut dropped = Vec::new();

    for entry in current {
        if !seen.insert(entry.name.as_str()) {
            dropped.push(Superseded {
                id: entry.id.clone(),
                name: entry.name.clone(),
                reason: SupersedeReason::Duplicate,
            });
            continue;
        }
        match ready_by_name.get(entry.name.as_str()) {
            Some(doc) => {
                plan.references.push(KnowledgeBaseRef {
                    id: doc.new_id.clone(),
                    ..entry.clone()
                });
                dropped.push(Superseded {
                    id: entry.id.clone(),
                    name: entry.name.clone(),
                    reason: SupersedeReason::Replaced,
                });
                plan.replaced.push(entry.name.clone());
            }
            None => plan.references.push(entry.clone()),
        }
    }

    for doc in ready {
        if seen.insert(doc.name.as_str()) {
            plan.references
                .push(KnowledgeBaseRef::text(doc.name.clone(), doc.new_id.clone()));
            plan.appended.push(doc.name.clone());
        }
    }

    let kept: HashSet<&str> = plan.references.iter().map(|r| r.id.as_str()).collect();
    let mut queued = HashSet::new();
    plan.superseded = dropped
        .into_iter()
        .filter(|s| !kept.contains(s.id.as_str()) && queued.insert(s.id.clone()))
        .collect();
    plan
}

/// Repoints the agent at ready documents with a single whole-list write.
pub struct ReferenceSwapper<'a, R> {
    remote: &'a R,
    retry: &'a RetryPolicy,
}

impl<'a, R: RemoteStore> ReferenceSwapper<'a, R> {
    pub fn new(remote: &'a R, retry: &'a RetryPolicy) -> Self {
        Self { remote, retry }
    }

    /// Reads the list fresh, rebuilds it and submits it. On error the agent
    /// keeps its previous list.
    pub async fn swap(&self, ready: &[ReadyDocument]) -> Result<SwapPlan, RemoteError> {
        let current = self
            .retry
            .run("get_agent_reference_list", || {
                self.remote.get_agent_reference_list()
            })
            .await?;
        let plan = rebuild_references(&current, ready);
        if plan.is_noop() {
            debug!("reference list already current");
            return Ok(plan);
        }

        self.retry
            .run("replace_agent_reference_list", || {
                self.remote.replace_agent_reference_list(&plan.references)
            })
            .await?;
        info!(
            replaced = plan.replaced.len(),
            appended = plan.appended.len(),
            superseded = plan.superseded.len(),
            references = plan.references.len(),
            "reference list replaced"
        );
        Ok(plan)
    }
}
