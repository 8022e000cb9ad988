use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use super::remote::RemoteError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Terminal(T),
    TimedOut { last: Option<T> },
}

/// Runs `probe` every `interval` until `is_terminal` accepts a value or
/// `timeout` elapses. The probe always runs at least once, and once more at
/// the deadline if the interval does not divide it evenly.
///
/// Transient probe errors are treated as "not terminal yet"; any other error
/// ends the poll.
pub async fn poll_until<T, P, Fut, C>(
    mut probe: P,
    is_terminal: C,
    interval: Duration,
    timeout: Duration,
) -> Result<PollOutcome<T>, RemoteError>
where
    P: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
    C: Fn(&T) -> bool,
{
    let deadline = Instant::now() + timeout;
    let mut last = None;
    let mut probes = 0u32;
    loop {
        probes += 1;
        match probe().await {
            Ok(value) if is_terminal(&value) => return Ok(PollOutcome::Terminal(value)),
            Ok(value) => last = Some(value),
            Err(err) if err.is_transient() => {
                warn!(probes, error = %err, "poll probe failed, will retry");
            }
            Err(err) => return Err(err),
        }

        let now = Instant::now();
        if now >= deadline {
            debug!(probes, "poll deadline reached");
            return Ok(PollOutcome::TimedOut { last });
        }
        let remaining = deadline - now;
        tokio::time::sleep(interval.min(remaining)).await;
    }
}
