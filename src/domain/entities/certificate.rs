use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Input handed to the certificate generator for one attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub claim_id: i64,
    pub student_id: i64,
    pub course_id: i64,
    pub custom_data: Option<Value>,
    pub custom_reg_number: Option<String>,
}

/// What a successful generation produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationOutcome {
    pub registration_number: String,
    pub generated_cert_id: i64,
    pub message: String,
}

/// Terminal-facing status of a claim as seen by polling collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClaimStatus::Pending => write!(f, "pending"),
            ClaimStatus::Processing => write!(f, "processing"),
            ClaimStatus::Completed => write!(f, "completed"),
            ClaimStatus::Failed => write!(f, "failed"),
        }
    }
}

impl From<String> for ClaimStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "pending" => ClaimStatus::Pending,
            "processing" => ClaimStatus::Processing,
            "completed" => ClaimStatus::Completed,
            "failed" => ClaimStatus::Failed,
            _ => ClaimStatus::Pending, // Default fallback
        }
    }
}

/// One row per claim in the status store. Unlike job records, these rows
/// survive job garbage collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimCertificate {
    pub claim_id: i64,
    pub status: ClaimStatus,
    pub registration_number: Option<String>,
    pub generated_cert_id: Option<i64>,
    pub error_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}
