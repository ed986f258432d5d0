use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::domain::entities::{Job, JobOptions, JobSpec};
use crate::domain::errors::PipelineResult;

/// What the broker decided to do with a reported failure.
///
/// The worker pool uses this instead of exception unwinding to drive its
/// terminal status writes: only `Terminal` triggers a `failed` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Attempts remain; the job was parked in `delayed` until `run_at`.
    Retry { run_at: DateTime<Utc> },
    /// Attempts exhausted; the job is terminally failed.
    Terminal,
    /// The job was already terminal; the call was a no-op.
    AlreadyTerminal,
}

/// Durable queue coordinating job state, leasing, and retry policy.
#[async_trait]
pub trait JobBroker: Send + Sync {
    /// Enqueue a job and return its identifier without waiting for
    /// completion. Fails explicitly when the broker is unreachable.
    async fn submit(&self, spec: JobSpec, options: &JobOptions) -> PipelineResult<String>;

    /// Atomically assign the next runnable `waiting` job to `worker_id`,
    /// transitioning it to `active`. No two workers can hold the same
    /// lease concurrently.
    async fn lease(&self, worker_id: &str) -> PipelineResult<Option<Job>>;

    /// Extend the lease while an attempt is still making progress. A lease
    /// that is neither renewed nor resolved within the stall-check interval
    /// is reclaimed.
    async fn renew_lease(&self, job_id: &str, worker_id: &str) -> PipelineResult<()>;

    /// Record progress for the active attempt. Monotone: a lower value than
    /// the current one is ignored.
    async fn report_progress(&self, job_id: &str, percent: i32) -> PipelineResult<()>;

    /// Terminal success. Idempotent: a second call on an already-terminal
    /// job is a no-op, not an error.
    async fn complete(&self, job_id: &str, result: Value) -> PipelineResult<()>;

    /// Report a failed attempt. Either schedules a delayed retry or marks
    /// the job terminally failed; idempotent on terminal jobs.
    async fn fail(&self, job_id: &str, error: &str) -> PipelineResult<FailureDisposition>;

    /// Fetch a job by id (observability and tests).
    async fn get_job(&self, job_id: &str) -> PipelineResult<Option<Job>>;
}
