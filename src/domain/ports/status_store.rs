use async_trait::async_trait;

use crate::domain::entities::{ClaimCertificate, GenerationOutcome};
use crate::domain::errors::PipelineResult;

/// One permanent row per claim, read by polling/notification layers.
/// Writes are keyed by `claim_id`; the last writer of a terminal state wins.
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn mark_pending(&self, claim_id: i64) -> PipelineResult<()>;
    async fn mark_processing(&self, claim_id: i64) -> PipelineResult<()>;
    async fn mark_completed(&self, claim_id: i64, outcome: &GenerationOutcome)
        -> PipelineResult<()>;
    async fn mark_failed(&self, claim_id: i64, error: &str) -> PipelineResult<()>;
    async fn get(&self, claim_id: i64) -> PipelineResult<Option<ClaimCertificate>>;
}
