//! Periodic job scheduler
//!
//! Named, cancellable repeating jobs. A job performs one execution
//! immediately, then re-arms `interval` after each completion (never on a
//! fixed wall-clock grid), so two executions of the same job can never
//! overlap, and a slow action stretches the period instead of stacking up.
//!
//! Cancellation is best-effort-immediate for future arming: an execution
//! already in flight runs to completion, but its completion does not re-arm.
//! Action failures are logged and never stop the loop.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Result;

/// Cancellation handle for a scheduled repeating job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    name: String,
    interval: Duration,
    token: CancellationToken,
}

impl JobHandle {
    /// The job's name (unique per owner; same-name reschedules replace).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The rest interval between completions.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Prevent any future re-arming. An in-flight execution may finish.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the job has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Schedule a repeating job.
///
/// Runs `action` once immediately, then repeatedly with `interval` of rest
/// measured from each completion (success or failure). The returned handle
/// is the only way to stop it; dropping the handle leaks the job, so owners
/// must hold it (session records do, process-scoped callers keep theirs for
/// the life of the process).
pub fn schedule<F, Fut>(name: impl Into<String>, interval: Duration, mut action: F) -> JobHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send,
{
    let name = name.into();
    let token = CancellationToken::new();

    let job_name = name.clone();
    let job_token = token.clone();
    tokio::spawn(async move {
        loop {
            if job_token.is_cancelled() {
                break;
            }
            if let Err(e) = action().await {
                warn!(job = %job_name, error = %e, "periodic job execution failed");
            }
            tokio::select! {
                biased;
                _ = job_token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        debug!(job = %job_name, "periodic job stopped");
    });

    JobHandle {
        name,
        interval,
        token,
    }
}
