use std::time::Duration;

use tracing::{debug, info, warn};

use super::poll::{PollOutcome, poll_until};
use super::remote::{IndexingStatus, RemoteStore};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_INDEX_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOutcome {
    Ready,
    Failed(String),
    TimedOut,
}

pub struct IndexWaiter<'a, R> {
    remote: &'a R,
    interval: Duration,
    timeout: Duration,
}

impl<'a, R: RemoteStore> IndexWaiter<'a, R> {
    pub fn new(remote: &'a R, interval: Duration, timeout: Duration) -> Self {
        Self {
            remote,
            interval,
            timeout,
        }
    }

    pub async fn wait(&self, id: &str) -> IndexOutcome {
        let outcome = poll_until(
            || self.remote.get_indexing_status(id),
            IndexingStatus::is_terminal,
            self.interval,
            self.timeout,
        )
        .await;

        match outcome {
            Ok(PollOutcome::Terminal(IndexingStatus::Succeeded)) => {
                info!(id, "indexing succeeded");
                IndexOutcome::Ready
            }
            Ok(PollOutcome::Terminal(IndexingStatus::Failed(reason))) => {
                warn!(id, reason = %reason, "indexing failed");
                IndexOutcome::Failed(reason)
            }
            Ok(PollOutcome::Terminal(IndexingStatus::NotFound)) => {
                warn!(id, "document vanished while indexing");
                IndexOutcome::Failed("document not found".into())
            }
            Ok(PollOutcome::Terminal(status)) => {
                // is_terminal only admits the arms above
                IndexOutcome::Failed(format!("unexpected status {status:?}"))
            }
            Ok(PollOutcome::TimedOut { last }) => {
                debug!(id, last = ?last, timeout_secs = self.timeout.as_secs(), "indexing wait timed out");
                IndexOutcome::TimedOut
            }
            Err(err) => {
                warn!(id, error = %err, "indexing status unavailable");
                IndexOutcome::Failed(err.to_string())
            }
        }
    }
}
