//! Writer and reader tasks driven by the scheduler.
//!
//! A tick never fails: every backend outcome becomes a domain event.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::timeout;
use tracing::{trace, warn};

use crate::domain::events::DomainEvent;
use crate::domain::ports::{CounterStore, EventPublisher, ReadTarget};
use crate::error::{Error, Result};
use crate::scheduler::PeriodicTask;

/// Run a backend call under a time bound.
pub(crate) async fn bounded<T, F>(operation: &str, limit: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(Error::timeout(operation, limit)),
    }
}

pub(crate) async fn emit(publisher: &dyn EventPublisher, event: DomainEvent) {
    let event_type = event.event_type();
    if let Err(e) = publisher.publish(event).await {
        warn!(event_type, error = %e, "Failed to publish event");
    }
}

/// Increments the counter by one per tick.
pub(crate) struct WriterTask {
    pub store: Arc<dyn CounterStore>,
    pub publisher: Arc<dyn EventPublisher>,
    pub key: String,
    pub deadline: Duration,
}

#[async_trait]
impl PeriodicTask for WriterTask {
    async fn tick(&self) {
        let outcome = bounded(
            "increment",
            self.deadline,
            self.store.increment(&self.key, 1),
        )
        .await;

        let event = match outcome {
            Ok(()) => {
                trace!(key = %self.key, "Increment acknowledged");
                DomainEvent::write_succeeded(&self.key, 1)
            }
            Err(e) => DomainEvent::write_failed(&self.key, &e),
        };
        emit(self.publisher.as_ref(), event).await;
    }
}

/// Reads the counter under one read target per tick.
pub(crate) struct ReaderTask {
    pub store: Arc<dyn CounterStore>,
    pub publisher: Arc<dyn EventPublisher>,
    pub key: String,
    pub target: ReadTarget,
    pub deadline: Duration,
    pub last_observed: Arc<DashMap<String, i64>>,
}

#[async_trait]
impl PeriodicTask for ReaderTask {
    async fn tick(&self) {
        let outcome = bounded(
            "read",
            self.deadline,
            self.store.read(&self.key, &self.target),
        )
        .await;

        let event = match outcome {
            Ok(value) => {
                if let Some(v) = value {
                    self.last_observed.insert(self.target.to_string(), v);
                }
                DomainEvent::read_observed(&self.key, &self.target, value)
            }
            Err(e) => DomainEvent::read_failed(&self.key, &self.target, &e),
        };
        emit(self.publisher.as_ref(), event).await;
    }
}
