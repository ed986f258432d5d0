use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::entities::certificate::GenerationRequest;

/// Lifecycle state of a certificate job inside the broker.
///
/// Per-attempt transitions are monotonic:
/// `waiting -> active -> (completed | delayed -> waiting | stalled -> waiting | failed)`.
/// `completed` and `failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Delayed,
    Completed,
    Failed,
    Stalled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Waiting => write!(f, "waiting"),
            JobState::Active => write!(f, "active"),
            JobState::Delayed => write!(f, "delayed"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
            JobState::Stalled => write!(f, "stalled"),
        }
    }
}

impl From<String> for JobState {
    fn from(s: String) -> Self {
        match s.as_str() {
            "waiting" => JobState::Waiting,
            "active" => JobState::Active,
            "delayed" => JobState::Delayed,
            "completed" => JobState::Completed,
            "failed" => JobState::Failed,
            "stalled" => JobState::Stalled,
            _ => JobState::Waiting, // Default fallback
        }
    }
}

/// Parameters a submitter provides when requesting certificate generation.
/// `claim_id` is the idempotency key for the whole pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub claim_id: i64,
    pub student_id: i64,
    pub course_id: i64,
    pub custom_data: Option<Value>,
    pub custom_reg_number: Option<String>,
}

/// Exponential backoff between retry attempts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub base_delay_ms: i64,
}

impl BackoffPolicy {
    pub fn new(base_delay_ms: i64) -> Self {
        Self { base_delay_ms }
    }

    /// Delay imposed after the n-th failed attempt: base * 2^(n-1).
    pub fn delay_after(&self, attempts_made: i32) -> Duration {
        let exponent = attempts_made.saturating_sub(1).clamp(0, 30) as u32;
        Duration::milliseconds(self.base_delay_ms.saturating_mul(1_i64 << exponent))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 2_000,
        }
    }
}

/// Retention for completed jobs: whichever limit is hit first wins.
#[derive(Debug, Clone, Copy)]
pub struct CompletedRetention {
    pub max_age_secs: i64,
    pub max_count: i64,
}

impl Default for CompletedRetention {
    fn default() -> Self {
        Self {
            max_age_secs: 3_600,
            max_count: 1_000,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FailedRetention {
    pub max_age_secs: i64,
}

impl Default for FailedRetention {
    fn default() -> Self {
        Self {
            max_age_secs: 86_400,
        }
    }
}

/// Broker options fixed at submission time.
#[derive(Debug, Clone)]
pub struct JobOptions {
    pub max_attempts: i32,
    pub backoff: BackoffPolicy,
    pub max_stalled_count: i32,
    pub stall_check_interval_ms: i64,
    pub completed_retention: CompletedRetention,
    pub failed_retention: FailedRetention,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
            max_stalled_count: 1,
            stall_check_interval_ms: 30_000,
            completed_retention: CompletedRetention::default(),
            failed_retention: FailedRetention::default(),
        }
    }
}

/// One certificate-generation work item tied to a claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub claim_id: i64,
    pub student_id: i64,
    pub course_id: i64,
    pub custom_data: Option<Value>,
    pub custom_reg_number: Option<String>,
    pub state: JobState,
    pub progress: i32,
    pub attempts_made: i32,
    pub max_attempts: i32,
    pub backoff_base_ms: i64,
    pub max_stalled_count: i32,
    pub stalled_count: i32,
    pub run_at: DateTime<Utc>,
    pub locked_by: Option<String>,
    pub locked_until: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn generation_request(&self) -> GenerationRequest {
        GenerationRequest {
            claim_id: self.claim_id,
            student_id: self.student_id,
            course_id: self.course_id,
            custom_data: self.custom_data.clone(),
            custom_reg_number: self.custom_reg_number.clone(),
        }
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.backoff_base_ms)
    }
}
