use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use certmill::{CertificateGenerator, GenerationOutcome, GenerationRequest, PipelineError, PipelineResult};

/// Generator that always returns the same fixed outcome.
pub struct FixedGenerator {
    pub outcome: GenerationOutcome,
    pub calls: AtomicUsize,
}

impl FixedGenerator {
    pub fn new(registration_number: &str, generated_cert_id: i64) -> Self {
        Self {
            outcome: GenerationOutcome {
                registration_number: registration_number.to_string(),
                generated_cert_id,
                message: "Certificate generated".to_string(),
            },
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CertificateGenerator for FixedGenerator {
    async fn generate(&self, _request: &GenerationRequest) -> PipelineResult<GenerationOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.outcome.clone())
    }
}

/// Generator that always fails.
pub struct AlwaysFailingGenerator {
    pub calls: AtomicUsize,
}

impl AlwaysFailingGenerator {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CertificateGenerator for AlwaysFailingGenerator {
    async fn generate(&self, _request: &GenerationRequest) -> PipelineResult<GenerationOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(PipelineError::Generation(
            "template rendering failed".to_string(),
        ))
    }
}

/// Generator that sleeps for a while and tracks how many invocations run
/// concurrently, so tests can assert the worker-pool concurrency cap.
pub struct ConcurrencyProbeGenerator {
    pub delay: Duration,
    current: AtomicI64,
    peak: AtomicI64,
    next_cert_id: AtomicI64,
}

impl ConcurrencyProbeGenerator {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            current: AtomicI64::new(0),
            peak: AtomicI64::new(0),
            next_cert_id: AtomicI64::new(0),
        }
    }

    pub fn peak_concurrency(&self) -> i64 {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CertificateGenerator for ConcurrencyProbeGenerator {
    async fn generate(&self, request: &GenerationRequest) -> PipelineResult<GenerationOutcome> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;

        self.current.fetch_sub(1, Ordering::SeqCst);
        let cert_id = self.next_cert_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(GenerationOutcome {
            registration_number: format!("REG{}", request.claim_id),
            generated_cert_id: cert_id,
            message: "ok".to_string(),
        })
    }
}

/// Fails a fixed number of times per claim, then succeeds.
pub struct FlakyGenerator {
    failures_before_success: usize,
    pub calls: AtomicUsize,
}

impl FlakyGenerator {
    pub fn new(failures_before_success: usize) -> Self {
        Self {
            failures_before_success,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl CertificateGenerator for FlakyGenerator {
    async fn generate(&self, request: &GenerationRequest) -> PipelineResult<GenerationOutcome> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures_before_success {
            return Err(PipelineError::Generation("transient failure".to_string()));
        }
        Ok(GenerationOutcome {
            registration_number: format!("REG{}", request.claim_id),
            generated_cert_id: request.claim_id,
            message: "ok".to_string(),
        })
    }
}
