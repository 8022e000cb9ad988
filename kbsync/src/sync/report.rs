use std::fmt;

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::engine::SyncPhase;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Detecting,
    Uploading,
    Indexing,
    Swapping,
    Cancelled,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureStage::Detecting => "detect",
            FailureStage::Uploading => "upload",
            FailureStage::Indexing => "indexing",
            FailureStage::Swapping => "swap",
            FailureStage::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub name: String,
    pub stage: FailureStage,
    pub reason: String,
}

/// End-of-run summary. Every document that did not make it is named in
/// `failed` or `retained`.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub phase: SyncPhase,
    pub dry_run: bool,
    pub started_at: OffsetDateTime,
    pub finished_at: Option<OffsetDateTime>,
    /// Set when the run stopped at a step rather than at an item.
    pub error: Option<String>,
    /// Dry run only: documents that would be uploaded.
    pub planned: Vec<String>,
    pub uploaded: Vec<String>,
    pub indexed: Vec<String>,
    pub swapped: Vec<String>,
    pub deleted: Vec<String>,
    pub unchanged: Vec<String>,
    pub permanent: Vec<String>,
    /// Indexing did not finish in time; the old reference was kept.
    pub retained: Vec<String>,
    /// Own uploads removed again because they will never be referenced.
    pub discarded: Vec<String>,
    pub delete_failures: Vec<(String, String)>,
    /// Names whose create was retried after a transient failure.
    pub possible_duplicates: Vec<String>,
    pub failed: Vec<ItemFailure>,
}

impl SyncReport {
    pub fn new(started_at: OffsetDateTime, dry_run: bool) -> Self {
        Self {
            phase: SyncPhase::Idle,
            dry_run,
            started_at,
            finished_at: None,
            error: None,
            planned: Vec::new(),
            uploaded: Vec::new(),
            indexed: Vec::new(),
            swapped: Vec::new(),
            deleted: Vec::new(),
            unchanged: Vec::new(),
            permanent: Vec::new(),
            retained: Vec::new(),
            discarded: Vec::new(),
            delete_failures: Vec::new(),
            possible_duplicates: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn fail(&mut self, name: impl Into<String>, stage: FailureStage, reason: impl Into<String>) {
        self.failed.push(ItemFailure {
            name: name.into(),
            stage,
            reason: reason.into(),
        });
    }

    pub fn failed_names(&self) -> impl Iterator<Item = &str> {
        self.failed.iter().map(|f| f.name.as_str())
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dry_run {
            write!(f, "[dry run, would upload {}] ", self.planned.len())?;
        }
        write!(
            f,
            "uploaded={}, indexed={}, swapped={}, deleted={}, unchanged={}, failed={}",
            self.uploaded.len(),
            self.indexed.len(),
            self.swapped.len(),
            self.deleted.len(),
            self.unchanged.len(),
            self.failed.len()
        )?;
        write!(f, " ({})", self.phase)?;
        if let Some(finished) = self.finished_at {
            let secs = (finished - self.started_at).whole_seconds();
            let started = self
                .started_at
                .format(&Rfc3339)
                .unwrap_or_else(|_| self.started_at.unix_timestamp().to_string());
            write!(f, " started {started}, took {secs}s")?;
        }
        if let Some(error) = &self.error {
            write!(f, "\n  run stopped: {error}")?;
        }
        for name in &self.retained {
            write!(f, "\n  {name}: indexing incomplete, retained old version")?;
        }
        for failure in &self.failed {
            write!(f, "\n  {}: {} failed: {}", failure.name, failure.stage, failure.reason)?;
        }
        for (id, reason) in &self.delete_failures {
            write!(f, "\n  delete {id} failed: {reason}")?;
        }
        for name in &self.possible_duplicates {
            write!(f, "\n  {name}: create was retried, a stray copy may remain (see prune)")?;
        }
        Ok(())
    }
}
