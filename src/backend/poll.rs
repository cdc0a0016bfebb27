//! Bounded state machine for submit-then-poll provider jobs

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{AppError, Result};

/// What one poll of a job reported
#[derive(Debug)]
pub enum PollStatus<T> {
    Pending,
    Ready(T),
    Failed(String),
}

/// Lifecycle of a polled job
#[derive(Debug)]
pub enum JobState<T> {
    Submitted,
    Polling { polls: u32 },
    Complete(T),
    Failed(String),
    TimedOut { polls: u32 },
}

/// Polls a job at a fixed interval until it settles or the deadline passes.
///
/// The deadline covers the whole loop; it is not reset per poll.
#[derive(Debug, Clone, Copy)]
pub struct JobPoller {
    interval: Duration,
    deadline: Instant,
}

impl JobPoller {
    pub fn new(interval: Duration, deadline: Instant) -> Self {
        Self { interval, deadline }
    }

    /// Drive the job to completion.
    ///
    /// `Failed` surfaces as a transient error, `TimedOut` as exhausted. Errors
    /// returned by `poll` itself propagate unchanged.
    pub async fn run<F, Fut, T>(&self, backend: &str, job_id: &str, mut poll: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<PollStatus<T>>>,
    {
        let mut state = JobState::Submitted;

        loop {
            state = match state {
                JobState::Submitted => {
                    debug!(backend = %backend, job_id = %job_id, "Job submitted");
                    JobState::Polling { polls: 0 }
                }
                JobState::Polling { polls } => {
                    if Instant::now() >= self.deadline {
                        JobState::TimedOut { polls }
                    } else {
                        match tokio::time::timeout_at(self.deadline, poll()).await {
                            Err(_) => JobState::TimedOut { polls: polls + 1 },
                            Ok(Err(err)) => return Err(err),
                            Ok(Ok(PollStatus::Ready(value))) => JobState::Complete(value),
                            Ok(Ok(PollStatus::Failed(reason))) => JobState::Failed(reason),
                            Ok(Ok(PollStatus::Pending)) => {
                                let next = (Instant::now() + self.interval).min(self.deadline);
                                tokio::time::sleep_until(next).await;
                                JobState::Polling { polls: polls + 1 }
                            }
                        }
                    }
                }
                JobState::Complete(value) => {
                    debug!(backend = %backend, job_id = %job_id, "Job complete");
                    return Ok(value);
                }
                JobState::Failed(reason) => {
                    return Err(AppError::transient(
                        backend,
                        format!("job {} failed: {}", job_id, reason),
                    ));
                }
                JobState::TimedOut { polls } => {
                    return Err(AppError::exhausted(
                        backend,
                        format!("job {} did not finish before the deadline ({} polls)", job_id, polls),
                    ));
                }
            };
        }
    }
}
