use async_trait::async_trait;

use crate::domain::entities::{GenerationOutcome, GenerationRequest};
use crate::domain::errors::PipelineResult;

/// The slow, fallible step that turns a claim into an artifact.
///
/// Contract: invoking this more than once for the same `claim_id` must not
/// produce two distinct registration numbers. The queue only guarantees
/// at-least-once delivery, so the claim-keyed idempotency check here is
/// authoritative (see `RegisteredGenerator`).
#[async_trait]
pub trait CertificateGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> PipelineResult<GenerationOutcome>;
}
