use std::time::Duration;

use crate::clock::Clock;
use crate::error::{LabelError, Result};
use crate::models::{JobId, JobStatus, RemoteJob};
use crate::service::BatchService;

/// Poller-level view of a job: the service states plus the local `TimedOut` outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Pending,
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl PollState {
    /// Next state after observing `status` with `elapsed` of `budget` spent.
    #[must_use]
    pub fn observe(status: JobStatus, elapsed: Duration, budget: Duration) -> Self {
        match status {
            JobStatus::Completed => Self::Completed,
            JobStatus::Failed => Self::Failed,
            JobStatus::Pending | JobStatus::Running if elapsed >= budget => Self::TimedOut,
            JobStatus::Pending => Self::Pending,
            JobStatus::Running => Self::Running,
        }
    }
}

pub struct CompletionPoller<'a> {
    service: &'a dyn BatchService,
    clock: &'a dyn Clock,
    interval: Duration,
    budget: Duration,
}

impl<'a> CompletionPoller<'a> {
    pub fn new(
        service: &'a dyn BatchService,
        clock: &'a dyn Clock,
        interval: Duration,
        budget: Duration,
    ) -> Self {
        Self {
            service,
            clock,
            interval,
            budget,
        }
    }

    /// Polls until the job is terminal or the wait budget is spent.
    ///
    /// `Failed` surfaces `JobFailed` on first observation; an exhausted budget
    /// yields `PollTimeout` carrying the last service status.
    pub fn wait(&self, job: &JobId) -> Result<RemoteJob> {
        let started = self.clock.now();
        let mut previous = None::<PollState>;
        loop {
            let remote = self.service.status(job)?;
            let elapsed = self.clock.now().saturating_duration_since(started);
            let state = PollState::observe(remote.status, elapsed, self.budget);
            if previous != Some(state) {
                tracing::debug!(
                    job_id = %job,
                    service_status = %remote.service_status,
                    state = ?state,
                    elapsed_secs = elapsed.as_secs(),
                    "job state changed"
                );
                previous = Some(state);
            }
            match state {
                PollState::Completed => return Ok(remote),
                PollState::Failed => {
                    return Err(LabelError::JobFailed {
                        job_id: job.0.clone(),
                        status: remote.service_status,
                    });
                }
                PollState::TimedOut => {
                    return Err(LabelError::PollTimeout {
                        job_id: job.0.clone(),
                        status: remote.service_status,
                        waited_secs: elapsed.as_secs(),
                    });
                }
                PollState::Pending | PollState::Running => {
                    let remaining = self.budget.saturating_sub(elapsed);
                    self.clock.sleep(self.interval.min(remaining));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::CompletionWindow;
    use crate::service::ScriptedService;

    fn submitted(service: &ScriptedService) -> JobId {
        let file = service.upload("chunk.jsonl", b"").expect("upload");
        service
            .submit(&file, &CompletionWindow::default())
            .expect("submit")
    }

    #[test]
    fn polls_at_fixed_interval_until_completed() {
        let service = ScriptedService::new(|_line| None);
        service.set_polls_before_completion(3);
        let job = submitted(&service);
        let clock = ManualClock::new();

        let poller = CompletionPoller::new(
            &service,
            &clock,
            Duration::from_secs(60),
            Duration::from_secs(86_400),
        );
        let remote = poller.wait(&job).expect("completes");

        assert_eq!(remote.status, JobStatus::Completed);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(60); 3]);
        assert_eq!(service.calls("status"), 4);
    }

    #[test]
    fn failed_job_surfaces_immediately() {
        let service = ScriptedService::new(|_line| None);
        service.set_polls_before_completion(1);
        service.push_terminal_status(JobStatus::Failed);
        let job = submitted(&service);
        let clock = ManualClock::new();

        let err = CompletionPoller::new(&service, &clock, Duration::from_secs(60), Duration::from_secs(600))
            .wait(&job)
            .expect_err("failed job");

        assert_eq!(err.code(), "JOB_FAILED");
        assert!(err.to_string().contains("failed"));
        assert_eq!(service.calls("status"), 2);
    }

    #[test]
    fn exhausted_budget_is_a_timeout_not_a_hang() {
        let service = ScriptedService::new(|_line| None);
        service.set_polls_before_completion(u32::MAX);
        let job = submitted(&service);
        let clock = ManualClock::new();

        let err = CompletionPoller::new(&service, &clock, Duration::from_secs(60), Duration::from_secs(150))
            .wait(&job)
            .expect_err("timeout");

        match err {
            LabelError::PollTimeout {
                status,
                waited_secs,
                ..
            } => {
                assert_eq!(status, "in_progress");
                assert_eq!(waited_secs, 150);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(
            clock.sleeps(),
            vec![
                Duration::from_secs(60),
                Duration::from_secs(60),
                Duration::from_secs(30)
            ]
        );
    }

    #[test]
    fn state_observation_prefers_terminal_status_over_budget() {
        let spent = Duration::from_secs(10);
        assert_eq!(PollState::observe(JobStatus::Completed, spent, spent), PollState::Completed);
        assert_eq!(PollState::observe(JobStatus::Running, spent, spent), PollState::TimedOut);
        assert_eq!(
            PollState::observe(JobStatus::Pending, Duration::ZERO, spent),
            PollState::Pending
        );
    }
}
