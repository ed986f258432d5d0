use thiserror::Error;

/// Error taxonomy for the pipeline core.
///
/// Transient broker trouble is retried at the lowest layer that can handle
/// it; only attempts-exhausted failures ever reach the status store.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Broker unreachable at submit time. Surfaced synchronously so the
    /// submitter can retry or queue the request itself.
    #[error("Submission failed: {0}")]
    Submission(String),

    /// The generator reported a failure for one attempt.
    #[error("Certificate generation failed: {0}")]
    Generation(String),

    /// A worker died or hung and the job exceeded its stall budget.
    #[error("Job stalled {0} time(s) and exceeded the allowed stall count")]
    Stalled(i32),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
