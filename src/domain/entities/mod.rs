pub mod certificate;
pub mod job;

pub use certificate::{ClaimCertificate, ClaimStatus, GenerationOutcome, GenerationRequest};
pub use job::{
    BackoffPolicy, CompletedRetention, FailedRetention, Job, JobOptions, JobSpec, JobState,
};
