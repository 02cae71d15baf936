use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::config::BatchConfig;
use crate::error::{LabelError, Result};
use crate::models::{ArtifactId, CompletionWindow, JobId, RemoteJob};

use super::BatchService;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total invocations, including the first one.
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn from_config(config: &BatchConfig) -> Self {
        Self {
            attempts: config.retries.max(1),
            delay: config.retry_delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

/// Runs `call` until it succeeds or `policy.attempts` invocations have failed.
/// Errors that are not retryable are returned on first sight, unchanged.
pub fn retry_call<T>(
    policy: RetryPolicy,
    clock: &dyn Clock,
    operation: &str,
    mut call: impl FnMut() -> Result<T>,
) -> Result<T> {
    let attempts = policy.attempts.max(1);
    let mut last_error = String::new();
    for attempt in 1..=attempts {
        match call() {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => {
                tracing::warn!(
                    operation,
                    attempt,
                    attempts,
                    error = %err,
                    "service call failed"
                );
                last_error = err.to_string();
                if attempt < attempts {
                    clock.sleep(policy.delay);
                }
            }
        }
    }
    Err(LabelError::MaxRetriesExceeded {
        operation: operation.to_string(),
        attempts,
        last_error,
    })
}

/// Adds retry around `upload`, `submit`, `status` and `fetch_output`.
/// `cancel` is forwarded once, unmodified.
pub struct RetryingService<S> {
    inner: S,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl<S: BatchService> RetryingService<S> {
    pub fn new(inner: S, policy: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner,
            policy,
            clock,
        }
    }

    #[must_use]
    pub fn inner(&self) -> &S {
        &self.inner
    }

    #[must_use]
    pub const fn policy(&self) -> RetryPolicy {
        self.policy
    }
}

impl<S: BatchService> BatchService for RetryingService<S> {
    fn upload(&self, file_name: &str, content: &[u8]) -> Result<ArtifactId> {
        retry_call(self.policy, self.clock.as_ref(), "upload", || {
            self.inner.upload(file_name, content)
        })
    }

    fn submit(&self, input: &ArtifactId, window: &CompletionWindow) -> Result<JobId> {
        retry_call(self.policy, self.clock.as_ref(), "submit", || {
            self.inner.submit(input, window)
        })
    }

    fn status(&self, job: &JobId) -> Result<RemoteJob> {
        retry_call(self.policy, self.clock.as_ref(), "status", || {
            self.inner.status(job)
        })
    }

    fn fetch_output(&self, job: &JobId) -> Result<String> {
        retry_call(self.policy, self.clock.as_ref(), "fetch_output", || {
            self.inner.fetch_output(job)
        })
    }

    fn cancel(&self, job: &JobId) -> Result<()> {
        self.inner.cancel(job)
    }
}
