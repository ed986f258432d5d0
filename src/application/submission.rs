use std::sync::Arc;
use tracing::info;

use crate::domain::entities::{JobOptions, JobSpec};
use crate::domain::errors::PipelineResult;
use crate::domain::ports::job_broker::JobBroker;
use crate::domain::ports::status_store::StatusStore;

/// Submission boundary for the API layer.
///
/// Writes the `pending` status row, enqueues the job, and returns the job
/// id synchronously. The final outcome is observed through the status store
/// or the broker event bus, never through this call. A broker outage
/// surfaces here as `PipelineError::Submission` so the caller can retry.
#[derive(Clone)]
pub struct SubmissionService {
    broker: Arc<dyn JobBroker>,
    status_store: Arc<dyn StatusStore>,
    options: JobOptions,
}

impl SubmissionService {
    pub fn new(
        broker: Arc<dyn JobBroker>,
        status_store: Arc<dyn StatusStore>,
        options: JobOptions,
    ) -> Self {
        Self {
            broker,
            status_store,
            options,
        }
    }

    pub async fn submit_claim(&self, spec: JobSpec) -> PipelineResult<String> {
        self.status_store.mark_pending(spec.claim_id).await?;

        let claim_id = spec.claim_id;
        let job_id = self.broker.submit(spec, &self.options).await?;
        info!("Claim {} submitted as job {}", claim_id, job_id);
        Ok(job_id)
    }
}
