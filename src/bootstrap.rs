use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::application::SubmissionService;
use crate::config::Config;
use crate::domain::ports::certificate_generator::CertificateGenerator;
use crate::domain::ports::job_broker::JobBroker;
use crate::domain::ports::status_store::StatusStore;
use crate::infrastructure::broker::SqlJobBroker;
use crate::infrastructure::generator::{RegisteredGenerator, SequenceGenerator};
use crate::infrastructure::persistence::{CertificateRegistry, Database, SqlStatusStore};
use crate::infrastructure::runtime::TokioTimeService;
use crate::infrastructure::workers::{WorkerPool, WorkerPoolConfig};
use crate::shared::events::LocalEventBus;

/// Fully wired pipeline: broker, pool, submission boundary, event bus.
pub struct Pipeline {
    pub broker: Arc<SqlJobBroker>,
    pub worker_pool: Arc<WorkerPool>,
    pub submission: SubmissionService,
    pub events: Arc<LocalEventBus>,
}

/// Construct every component against one database, injecting the generator
/// so deployments (and tests) can swap the slow rendering step.
pub fn build_pipeline(
    db: Database,
    config: &Config,
    generator: Arc<dyn CertificateGenerator>,
) -> Pipeline {
    let events = Arc::new(LocalEventBus::new(1024));
    let options = config.job_options();

    let broker = Arc::new(SqlJobBroker::new(
        db.clone(),
        events.clone(),
        options.clone(),
    ));

    let registry = CertificateRegistry::new(db.clone());
    let registered: Arc<dyn CertificateGenerator> =
        Arc::new(RegisteredGenerator::new(generator, registry));

    let status_store: Arc<dyn StatusStore> = Arc::new(SqlStatusStore::new(db));

    let worker_pool = Arc::new(WorkerPool::new(
        broker.clone() as Arc<dyn JobBroker>,
        registered,
        status_store.clone(),
        Arc::new(TokioTimeService::new()),
        WorkerPoolConfig::new(config.worker_concurrency, config.stall_check_interval_ms),
    ));

    let submission = SubmissionService::new(
        broker.clone() as Arc<dyn JobBroker>,
        status_store,
        options,
    );

    Pipeline {
        broker,
        worker_pool,
        submission,
        events,
    }
}

/// Default generator wiring for the standalone binary.
pub fn default_generator(db: Database, config: &Config) -> Arc<dyn CertificateGenerator> {
    let registry = CertificateRegistry::new(db);
    Arc::new(SequenceGenerator::new(
        registry,
        config.registration_prefix.clone(),
    ))
}

/// Run the pipeline until the token fires, then drain and close.
pub async fn run_pipeline(pipeline: &Pipeline, shutdown: CancellationToken) {
    let maintenance = tokio::spawn(
        pipeline
            .broker
            .clone()
            .run_maintenance_loop(shutdown.clone()),
    );

    pipeline.worker_pool.clone().run(shutdown).await;

    if let Err(e) = maintenance.await {
        tracing::error!("Maintenance task aborted: {}", e);
    }

    pipeline.broker.close().await;
}
