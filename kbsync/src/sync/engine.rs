use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::backoff::RetryPolicy;
use super::catalog::RemoteCatalog;
use super::detect::{ChangeDetector, ConfirmedDocument, WorkItem};
use super::fingerprint::Fingerprint;
use super::index_wait::{DEFAULT_INDEX_TIMEOUT, DEFAULT_POLL_INTERVAL, IndexOutcome, IndexWaiter};
use super::reap::{DEFAULT_DELETE_PAUSE, OrphanReaper};
use super::remote::RemoteStore;
use super::report::{FailureStage, SyncReport};
use super::state::{StateStore, SyncRecord};
use super::swap::{ReadyDocument, ReferenceSwapper};
use super::upload::DocumentUploader;
use crate::corpus::LocalDocument;

pub const DEFAULT_EMBEDDING_MODEL: &str = "multilingual_e5_large_instruct";

/// What to do with a document whose indexing outlived the wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexTimeoutPolicy {
    /// Reference it anyway; indexing usually lands shortly after.
    #[default]
    Proceed,
    /// Keep the current reference and leave the upload unreferenced. This is
    /// how the earlier sync scripts behaved: they only referenced documents
    /// whose indexing had finished.
    RetainOld,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub permanent: HashSet<String>,
    pub embedding_model: String,
    pub strict_hash: bool,
    pub retry: RetryPolicy,
    pub poll_interval: Duration,
    pub index_timeout: Duration,
    pub timeout_policy: IndexTimeoutPolicy,
    pub delete_pause: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            permanent: HashSet::new(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            strict_hash: false,
            retry: RetryPolicy::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            index_timeout: DEFAULT_INDEX_TIMEOUT,
            timeout_policy: IndexTimeoutPolicy::default(),
            delete_pause: DEFAULT_DELETE_PAUSE,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Detect and report only.
    pub dry_run: bool,
    /// Stop after the swap; superseded documents stay in the store.
    pub skip_delete: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStep {
    Detecting,
    Uploading,
    Indexing,
    Swapping,
    Reaping,
}

impl fmt::Display for SyncStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SyncStep::Detecting => "detecting",
            SyncStep::Uploading => "uploading",
            SyncStep::Indexing => "indexing",
            SyncStep::Swapping => "swapping",
            SyncStep::Reaping => "reaping",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Detecting,
    Uploading,
    Indexing,
    Swapping,
    Reaping,
    Done,
    Failed(SyncStep),
}

impl SyncPhase {
    /// Documents go through upload and indexing one at a time, so the run
    /// alternates between those two phases before the swap.
    pub fn can_transition_to(&self, next: &SyncPhase) -> bool {
        use SyncPhase::*;
        match (self, next) {
            (Done | Failed(_), _) => false,
            (_, Failed(_)) => true,
            (Idle, Detecting)
            | (Detecting, Uploading | Done)
            | (Uploading, Indexing | Swapping)
            | (Indexing, Uploading | Swapping)
            | (Swapping, Reaping | Done)
            | (Reaping, Done) => true,
            _ => false,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, SyncPhase::Failed(_))
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncPhase::Idle => f.write_str("idle"),
            SyncPhase::Detecting => f.write_str("detecting"),
            SyncPhase::Uploading => f.write_str("uploading"),
            SyncPhase::Indexing => f.write_str("indexing"),
            SyncPhase::Swapping => f.write_str("swapping"),
            SyncPhase::Reaping => f.write_str("reaping"),
            SyncPhase::Done => f.write_str("done"),
            SyncPhase::Failed(step) => write!(f, "failed while {step}"),
        }
    }
}

/// Upload state of one work item during a run.
struct Uploaded {
    name: String,
    id: String,
    fingerprint: Fingerprint,
    old_id: Option<String>,
    ready: bool,
}

pub struct SyncOrchestrator<R, S> {
    remote: R,
    state: S,
    config: SyncConfig,
    cancel: CancellationToken,
}

impl<R: RemoteStore, S: StateStore> SyncOrchestrator<R, S> {
    pub fn new(remote: R, state: S, config: SyncConfig) -> Self {
        Self {
            remote,
            state,
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub async fn run(&mut self, corpus: Vec<LocalDocument>, options: RunOptions) -> SyncReport {
        let mut report = SyncReport::new(OffsetDateTime::now_utc(), options.dry_run);
        enter(&mut report, SyncPhase::Detecting);
        info!(documents = corpus.len(), dry_run = options.dry_run, "sync started");

        let catalog = match RemoteCatalog::load(&self.remote, &self.config.retry).await {
            Ok(catalog) => catalog,
            Err(err) => {
                error!(error = %err, "could not read agent reference list");
                report.error = Some(format!("reading reference list: {err}"));
                return finish(report, SyncPhase::Failed(SyncStep::Detecting));
            }
        };
        if catalog.duplicate_count() > 0 {
            warn!(duplicates = catalog.duplicate_count(), "reference list has duplicate names");
        }

        let detector = ChangeDetector::new(
            &self.remote,
            &self.config.retry,
            &self.config.permanent,
            self.config.strict_hash,
        );
        let detection = detector.detect(corpus, &catalog, &self.state).await;
        report.unchanged = detection.unchanged;
        report.permanent = detection.permanent;
        for (name, reason) in &detection.failed {
            report.fail(name, FailureStage::Detecting, reason.clone());
        }
        info!(
            work = detection.items.len(),
            unchanged = report.unchanged.len(),
            permanent = report.permanent.len(),
            failed = detection.failed.len(),
            "detection finished"
        );

        if options.dry_run {
            report.planned = detection.items.iter().map(|item| item.name.clone()).collect();
            for item in &detection.items {
                info!(name = %item.name, kind = ?item.kind, old_id = ?item.old_id, "would upload");
            }
            return finish(report, SyncPhase::Done);
        }

        self.record_confirmed(&detection.confirmed).await;
        if detection.items.is_empty() {
            self.flush_state().await;
            return finish(report, SyncPhase::Done);
        }

        let uploads = self.upload_and_index(detection.items, &mut report).await;

        enter(&mut report, SyncPhase::Swapping);
        let ready: Vec<ReadyDocument> = uploads
            .iter()
            .filter(|upload| upload.ready)
            .map(|upload| ReadyDocument {
                name: upload.name.clone(),
                new_id: upload.id.clone(),
                old_id: upload.old_id.clone(),
            })
            .collect();
        let swapper = ReferenceSwapper::new(&self.remote, &self.config.retry);
        let plan = match swapper.swap(&ready).await {
            Ok(plan) => plan,
            Err(err) => {
                error!(error = %err, "reference list submission failed, nothing will be deleted");
                report.error = Some(format!("swap: {err}"));
                for doc in &ready {
                    report.fail(&doc.name, FailureStage::Swapping, err.to_string());
                }
                let own: Vec<String> = uploads.iter().map(|upload| upload.id.clone()).collect();
                self.discard(&own, &mut report).await;
                self.flush_state().await;
                return finish(report, SyncPhase::Failed(SyncStep::Swapping));
            }
        };

        let now = OffsetDateTime::now_utc().unix_timestamp();
        report.swapped = plan.swapped().map(str::to_string).collect();
        for upload in uploads.iter().filter(|upload| upload.ready) {
            let record = SyncRecord {
                remote_id: upload.id.clone(),
                fingerprint: upload.fingerprint.to_string(),
                last_synced_at: now,
            };
            if let Err(err) = self.state.put(&upload.name, record).await {
                warn!(name = %upload.name, error = %err, "state update failed");
            }
        }
        self.flush_state().await;

        let stale: Vec<String> = plan.superseded.iter().map(|s| s.id.clone()).collect();
        if options.skip_delete {
            if !stale.is_empty() {
                info!(ids = ?stale, "deletion skipped, superseded documents left in place");
            }
            return finish(report, SyncPhase::Done);
        }

        enter(&mut report, SyncPhase::Reaping);
        let reaper = OrphanReaper::new(&self.remote, &self.config.retry, self.config.delete_pause);
        let outcome = reaper.reap(&stale).await;
        report.deleted = outcome.deleted;
        report.delete_failures.extend(outcome.failed);
        finish(report, SyncPhase::Done)
    }

    async fn upload_and_index(
        &self,
        items: Vec<WorkItem>,
        report: &mut SyncReport,
    ) -> Vec<Uploaded> {
        let uploader = DocumentUploader::new(
            &self.remote,
            &self.config.retry,
            &self.config.embedding_model,
        );
        let waiter = IndexWaiter::new(
            &self.remote,
            self.config.poll_interval,
            self.config.index_timeout,
        );
        let reaper = OrphanReaper::new(&self.remote, &self.config.retry, Duration::ZERO);
        let mut uploads = Vec::new();

        for item in items {
            if self.cancel.is_cancelled() {
                info!(name = %item.name, "cancelled before upload");
                report.fail(&item.name, FailureStage::Cancelled, "run cancelled");
                continue;
            }
            if report.phase != SyncPhase::Uploading {
                enter(report, SyncPhase::Uploading);
            }
            let id = match uploader.upload(&item).await {
                Ok(created) => {
                    if created.retried {
                        report.possible_duplicates.push(item.name.clone());
                    }
                    created.id
                }
                Err(failure) => {
                    warn!(name = %item.name, error = %failure, "upload failed");
                    report.fail(&item.name, FailureStage::Uploading, failure.to_string());
                    continue;
                }
            };
            report.uploaded.push(item.name.clone());

            enter(report, SyncPhase::Indexing);
            let ready = match waiter.wait(&id).await {
                IndexOutcome::Ready => {
                    report.indexed.push(item.name.clone());
                    true
                }
                IndexOutcome::Failed(reason) => {
                    report.fail(&item.name, FailureStage::Indexing, reason);
                    let outcome = reaper.reap(std::slice::from_ref(&id)).await;
                    report.discarded.extend(outcome.deleted);
                    report.delete_failures.extend(outcome.failed);
                    enter(report, SyncPhase::Uploading);
                    continue;
                }
                IndexOutcome::TimedOut => match self.config.timeout_policy {
                    IndexTimeoutPolicy::Proceed => {
                        info!(name = %item.name, id = %id, "indexing still running, swapping anyway");
                        true
                    }
                    IndexTimeoutPolicy::RetainOld => {
                        info!(name = %item.name, id = %id, "indexing incomplete, retaining old version");
                        report.retained.push(item.name.clone());
                        false
                    }
                },
            };
            uploads.push(Uploaded {
                name: item.name,
                id,
                fingerprint: item.fingerprint,
                old_id: item.old_id,
                ready,
            });
        }

        if report.phase == SyncPhase::Detecting {
            enter(report, SyncPhase::Uploading);
        }
        uploads
    }

    /// Removes documents uploaded this run that will never be referenced.
    async fn discard(&self, ids: &[String], report: &mut SyncReport) {
        if ids.is_empty() {
            return;
        }
        let reaper = OrphanReaper::new(&self.remote, &self.config.retry, self.config.delete_pause);
        let outcome = reaper.reap(ids).await;
        report.discarded.extend(outcome.deleted);
        report.delete_failures.extend(outcome.failed);
    }

    async fn record_confirmed(&mut self, confirmed: &[ConfirmedDocument]) {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        for doc in confirmed {
            let record = SyncRecord {
                remote_id: doc.remote_id.clone(),
                fingerprint: doc.fingerprint.to_string(),
                last_synced_at: now,
            };
            if let Err(err) = self.state.put(&doc.name, record).await {
                warn!(name = %doc.name, error = %err, "state update failed");
            }
        }
    }

    async fn flush_state(&mut self) {
        if let Err(err) = self.state.flush().await {
            warn!(error = %err, "state flush failed, next run will re-derive from remote");
        }
    }
}

fn enter(report: &mut SyncReport, next: SyncPhase) {
    debug_assert!(
        report.phase.can_transition_to(&next),
        "invalid transition {} -> {}",
        report.phase,
        next
    );
    debug!(from = %report.phase, to = %next, "phase");
    report.phase = next;
}

fn finish(mut report: SyncReport, phase: SyncPhase) -> SyncReport {
    enter(&mut report, phase);
    report.finished_at = Some(OffsetDateTime::now_utc());
    info!(summary = %report, "sync finished");
    report
}
