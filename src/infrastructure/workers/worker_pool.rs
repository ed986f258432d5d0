use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::entities::Job;
use crate::domain::errors::PipelineResult;
use crate::domain::ports::certificate_generator::CertificateGenerator;
use crate::domain::ports::job_broker::{FailureDisposition, JobBroker};
use crate::domain::ports::status_store::StatusStore;
use crate::domain::ports::time_service::TimeService;

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of concurrent execution slots.
    pub concurrency: usize,
    /// How long an idle slot waits before polling for work again.
    pub idle_poll: Duration,
    /// Lease renewal period; must stay below the stall-check interval.
    pub heartbeat: Duration,
    /// Pause after a broker error before the slot retries.
    pub error_backoff: Duration,
}

impl WorkerPoolConfig {
    pub fn new(concurrency: usize, stall_check_interval_ms: i64) -> Self {
        // Renew at half the stall window so a healthy worker never looks dead
        let heartbeat_ms = (stall_check_interval_ms / 2).max(10) as u64;
        Self {
            concurrency,
            idle_poll: Duration::from_secs(1),
            heartbeat: Duration::from_millis(heartbeat_ms),
            error_backoff: Duration::from_secs(5),
        }
    }
}

/// Runs up to `concurrency` job executions at once.
///
/// Each slot leases, drives the generator while heartbeating the lease, and
/// reports the outcome back to the broker and the status store. A slot never
/// panics the pool: every fallible step is logged and the loop continues.
pub struct WorkerPool {
    broker: Arc<dyn JobBroker>,
    generator: Arc<dyn CertificateGenerator>,
    status_store: Arc<dyn StatusStore>,
    time_service: Arc<dyn TimeService>,
    config: WorkerPoolConfig,
    instance_id: String,
}

impl WorkerPool {
    pub fn new(
        broker: Arc<dyn JobBroker>,
        generator: Arc<dyn CertificateGenerator>,
        status_store: Arc<dyn StatusStore>,
        time_service: Arc<dyn TimeService>,
        config: WorkerPoolConfig,
    ) -> Self {
        let instance_id = Uuid::new_v4().to_string()[..8].to_string();
        Self {
            broker,
            generator,
            status_store,
            time_service,
            config,
            instance_id,
        }
    }

    /// Run all slots until `shutdown` fires, then drain in-flight work and
    /// return. Abandoned executions (process kill) become stalled jobs and
    /// are reclaimed by a future instance.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            "Worker pool {} starting with {} slot(s)",
            self.instance_id, self.config.concurrency
        );

        let mut handles = Vec::with_capacity(self.config.concurrency);
        for slot in 0..self.config.concurrency {
            let pool = Arc::clone(&self);
            let token = shutdown.clone();
            handles.push(tokio::spawn(async move {
                pool.run_slot(slot, token).await;
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!("Worker slot task aborted: {}", e);
            }
        }
        info!("Worker pool {} drained", self.instance_id);
    }

    async fn run_slot(&self, slot: usize, shutdown: CancellationToken) {
        let worker_id = format!("{}-{}", self.instance_id, slot);
        info!("Worker slot {} started", worker_id);

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let leased = tokio::select! {
                _ = shutdown.cancelled() => break,
                leased = self.broker.lease(&worker_id) => leased,
            };

            match leased {
                Ok(Some(job)) => {
                    // In-flight work is never cancelled; shutdown waits for it
                    self.process(job, &worker_id).await;
                }
                Ok(None) => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = self.time_service.sleep(self.config.idle_poll) => {}
                    }
                }
                Err(e) => {
                    error!("Worker {} failed to lease: {}", worker_id, e);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = self.time_service.sleep(self.config.error_backoff) => {}
                    }
                }
            }
        }
        info!("Worker slot {} stopped", worker_id);
    }

    async fn process(&self, job: Job, worker_id: &str) {
        info!(
            "Worker {} processing job {} (claim {}, attempt {}/{})",
            worker_id, job.id, job.claim_id, job.attempts_made, job.max_attempts
        );

        if let Err(e) = self.status_store.mark_processing(job.claim_id).await {
            error!("Failed to mark claim {} processing: {}", job.claim_id, e);
        }
        if let Err(e) = self.broker.report_progress(&job.id, 10).await {
            warn!("Failed to report progress for job {}: {}", job.id, e);
        }

        let outcome = self.generate_with_heartbeat(&job, worker_id).await;

        match outcome {
            Ok(outcome) => {
                let payload = serde_json::to_value(&outcome).unwrap_or(Value::Null);
                if let Err(e) = self.broker.complete(&job.id, payload).await {
                    error!("Failed to mark job {} completed: {}", job.id, e);
                    return;
                }
                if let Err(e) = self
                    .status_store
                    .mark_completed(job.claim_id, &outcome)
                    .await
                {
                    // Surface but keep the pool alive; the broker record is
                    // the durable source of truth for the job itself.
                    error!("Failed to write completed status for claim {}: {}", job.claim_id, e);
                }
                info!(
                    "Job {} completed with registration {}",
                    job.id, outcome.registration_number
                );
            }
            Err(e) => {
                let message = e.to_string();
                match self.broker.fail(&job.id, &message).await {
                    Ok(FailureDisposition::Retry { run_at }) => {
                        info!("Job {} scheduled for retry at {}", job.id, run_at);
                    }
                    Ok(FailureDisposition::Terminal) => {
                        if let Err(se) = self.status_store.mark_failed(job.claim_id, &message).await
                        {
                            error!(
                                "Failed to write failed status for claim {}: {}",
                                job.claim_id, se
                            );
                        }
                    }
                    Ok(FailureDisposition::AlreadyTerminal) => {}
                    Err(be) => {
                        error!("Failed to report failure for job {}: {}", job.id, be);
                    }
                }
            }
        }
    }

    /// Drive the generator while periodically renewing the lease so the
    /// stall sweep leaves a slow-but-alive attempt alone.
    async fn generate_with_heartbeat(
        &self,
        job: &Job,
        worker_id: &str,
    ) -> PipelineResult<crate::domain::entities::GenerationOutcome> {
        let request = job.generation_request();
        let generate = self.generator.generate(&request);
        tokio::pin!(generate);

        let mut heartbeat = tokio::time::interval(self.config.heartbeat);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick resolves immediately; consume it
        heartbeat.tick().await;

        loop {
            tokio::select! {
                result = &mut generate => return result,
                _ = heartbeat.tick() => {
                    if let Err(e) = self.broker.renew_lease(&job.id, worker_id).await {
                        warn!("Worker {} could not renew lease on job {}: {}", worker_id, job.id, e);
                    }
                }
            }
        }
    }
}
