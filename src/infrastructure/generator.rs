use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::domain::entities::{GenerationOutcome, GenerationRequest};
use crate::domain::errors::PipelineResult;
use crate::domain::ports::certificate_generator::CertificateGenerator;
use crate::infrastructure::persistence::CertificateRegistry;

/// Decorator that makes any generator safe under at-least-once delivery.
///
/// The registry lookup by `claim_id` happens before the inner call, so a
/// job replayed after a lost completion ack returns the recorded outcome
/// instead of allocating a second registration number.
pub struct RegisteredGenerator {
    inner: Arc<dyn CertificateGenerator>,
    registry: CertificateRegistry,
}

impl RegisteredGenerator {
    pub fn new(inner: Arc<dyn CertificateGenerator>, registry: CertificateRegistry) -> Self {
        Self { inner, registry }
    }
}

#[async_trait]
impl CertificateGenerator for RegisteredGenerator {
    async fn generate(&self, request: &GenerationRequest) -> PipelineResult<GenerationOutcome> {
        if let Some(existing) = self.registry.find(request.claim_id).await? {
            info!(
                "Claim {} already has registration {}, skipping generation",
                request.claim_id, existing.registration_number
            );
            return Ok(existing);
        }

        let outcome = self.inner.generate(request).await?;
        self.registry.record(request.claim_id, &outcome).await?;
        Ok(outcome)
    }
}

/// Default generator: allocates a sequential registration number with a
/// fixed prefix. Rendering and upload of the artifact itself live outside
/// this subsystem.
pub struct SequenceGenerator {
    registry: CertificateRegistry,
    prefix: String,
}

impl SequenceGenerator {
    pub fn new(registry: CertificateRegistry, prefix: impl Into<String>) -> Self {
        Self {
            registry,
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl CertificateGenerator for SequenceGenerator {
    async fn generate(&self, request: &GenerationRequest) -> PipelineResult<GenerationOutcome> {
        let cert_id = self.registry.next_sequence().await?;

        let registration_number = match &request.custom_reg_number {
            Some(custom) => custom.clone(),
            None => format!("{}{}", self.prefix, 50_000 + cert_id),
        };

        Ok(GenerationOutcome {
            registration_number,
            generated_cert_id: cert_id,
            message: format!(
                "Certificate generated for student {} in course {}",
                request.student_id, request.course_id
            ),
        })
    }
}
