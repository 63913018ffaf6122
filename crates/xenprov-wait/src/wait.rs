use crate::predicate::{BoxError, Predicate};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Intervals below this are raised to it so a wait never spins
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum WaitError {
    #[error("Condition check failed: {0}")]
    Predicate(#[source] BoxError),

    #[error("Timed out after {0:?} waiting for condition")]
    Timeout(Duration),

    #[error("Wait cancelled")]
    Cancelled,
}

impl WaitError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, WaitError::Timeout(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, WaitError::Cancelled)
    }
}

/// One poll-until-true operation.
///
/// `timeout` bounds the whole wait; `interval` only spaces re-evaluations
/// after the predicate reports `Ok(false)`. Consumed by [`wait`](Self::wait).
pub struct InterruptibleWait<P> {
    timeout: Duration,
    interval: Duration,
    predicate: P,
}

impl<P: Predicate> InterruptibleWait<P> {
    pub fn new(timeout: Duration, interval: Duration, predicate: P) -> Self {
        Self {
            timeout,
            interval,
            predicate,
        }
    }

    /// Drive the predicate to a single outcome.
    ///
    /// The predicate is always evaluated at least once, even when `cancel`
    /// has already fired; a result that is ready immediately wins over
    /// cancellation and the deadline. An evaluation still in flight when
    /// either fires is abandoned. The final sleep is cut short at the
    /// deadline so the last evaluation starts no later than `timeout`.
    /// A timeout too large to represent as an instant never expires.
    pub async fn wait(mut self, cancel: &CancellationToken) -> Result<(), WaitError> {
        let interval = self.interval.max(MIN_POLL_INTERVAL);
        let deadline = Instant::now().checked_add(self.timeout);
        let mut attempt: u64 = 0;

        loop {
            attempt += 1;
            let checked = tokio::select! {
                biased;
                checked = self.predicate.check() => checked,
                _ = cancel.cancelled() => {
                    debug!(attempt, "Cancelled during condition check");
                    return Err(WaitError::Cancelled);
                }
                _ = expired(deadline) => {
                    debug!(attempt, timeout = ?self.timeout, "Deadline passed during condition check");
                    return Err(WaitError::Timeout(self.timeout));
                }
            };
            match checked {
                Ok(true) => {
                    debug!(attempt, "Condition satisfied");
                    return Ok(());
                }
                Ok(false) => {}
                Err(e) => {
                    debug!(attempt, error = %e, "Condition check failed");
                    return Err(WaitError::Predicate(e));
                }
            }

            if cancel.is_cancelled() {
                return Err(WaitError::Cancelled);
            }

            let now = Instant::now();
            let pause = match deadline {
                Some(deadline) if now >= deadline => {
                    debug!(attempt, timeout = ?self.timeout, "Condition not met before deadline");
                    return Err(WaitError::Timeout(self.timeout));
                }
                Some(deadline) => interval.min(deadline - now),
                None => interval,
            };
            tokio::select! {
                _ = cancel.cancelled() => return Err(WaitError::Cancelled),
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
}

async fn expired(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
