use futures::Stream;
use std::pin::Pin;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use crate::domain::errors::PipelineResult;

/// Typed broker lifecycle events observable by subscribers.
#[derive(Debug, Clone)]
pub enum BrokerEvent {
    /// Broker client constructed and usable.
    Ready,
    /// A job entered (or re-entered) the waiting state.
    Waiting { job_id: String },
    /// A worker took a lease on a job.
    Active { job_id: String, worker_id: String },
    /// Terminal success.
    Completed { job_id: String, claim_id: i64 },
    /// A failed attempt; `terminal` distinguishes retry from exhaustion.
    Failed {
        job_id: String,
        claim_id: i64,
        error: String,
        terminal: bool,
    },
    /// A lease expired; `reclaimed` is false when the stall budget ran out.
    Stalled { job_id: String, reclaimed: bool },
    /// Broker-side trouble (connectivity, sweep failures).
    Error { message: String },
    /// The broker client is retrying after an error.
    Reconnecting,
    /// The broker connection was shut down.
    Close,
}

/// Event bus for broker lifecycle events.
pub trait EventBus: Send + Sync {
    /// Publish an event to all subscribers.
    fn publish(&self, event: BrokerEvent) -> PipelineResult<()>;

    /// Subscribe to events as a stream.
    fn subscribe(
        &self,
    ) -> Pin<Box<dyn Stream<Item = Result<BrokerEvent, BroadcastStreamRecvError>> + Send>>;
}

/// Local in-memory implementation over a tokio broadcast channel.
#[derive(Clone)]
pub struct LocalEventBus {
    tx: broadcast::Sender<BrokerEvent>,
}

impl LocalEventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventBus for LocalEventBus {
    fn publish(&self, event: BrokerEvent) -> PipelineResult<()> {
        // Fire-and-forget: nobody listening is not an error.
        if let Err(e) = self.tx.send(event) {
            tracing::debug!("No active subscribers for broker event: {}", e);
        }
        Ok(())
    }

    fn subscribe(
        &self,
    ) -> Pin<Box<dyn Stream<Item = Result<BrokerEvent, BroadcastStreamRecvError>> + Send>> {
        let rx = self.tx.subscribe();
        Box::pin(BroadcastStream::new(rx))
    }
}

impl Default for LocalEventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
