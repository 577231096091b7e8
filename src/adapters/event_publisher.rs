//! Event Publisher Adapter
//!
//! Implements the `EventPublisher` port with various backends.

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::domain::events::DomainEvent;
use crate::domain::ports::EventPublisher;
use crate::error::Result;

/// Logging-based event publisher.
///
/// Successful ticks go to the configured level; failed ticks are always
/// logged at warn.
#[derive(Debug, Clone, Default)]
pub struct LoggingEventPublisher {
    /// Whether to log events at info level (true) or debug level (false)
    info_level: bool,
}

impl LoggingEventPublisher {
    /// Create a new logging event publisher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a publisher that logs at info level.
    pub fn info_level() -> Self {
        Self { info_level: true }
    }
}

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        let event_type = event.event_type();
        let json = serde_json::to_string(&event).unwrap_or_else(|_| format!("{:?}", event));

        if event.is_failure() {
            warn!(
                event_type = %event_type,
                key = %event.key(),
                target = ?event.target().map(ToString::to_string),
                event = %json,
                "Tick failed"
            );
        } else if self.info_level {
            info!(event_type = %event_type, event = %json, "Domain event");
        } else {
            debug!(event_type = %event_type, event = %json, "Domain event");
        }

        Ok(())
    }

    async fn publish_all(&self, events: Vec<DomainEvent>) -> Result<()> {
        for event in events {
            self.publish(event).await?;
        }
        Ok(())
    }
}

/// In-memory event collector for testing.
///
/// Collects events in memory for later inspection during tests.
#[derive(Debug, Default)]
pub struct InMemoryEventCollector {
    events: parking_lot::RwLock<Vec<DomainEvent>>,
}

impl InMemoryEventCollector {
    /// Create a new in-memory event collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all collected events.
    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.read().clone()
    }

    /// Get the count of collected events.
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Check if there are no events.
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clear all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Get events of a specific type.
    pub fn events_of_type(&self, event_type: &str) -> Vec<DomainEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .cloned()
            .collect()
    }

    /// Values observed by readers, in publication order. Missing records are skipped.
    pub fn observed_values(&self) -> Vec<i64> {
        self.events
            .read()
            .iter()
            .filter_map(|e| match e {
                DomainEvent::ReadObserved { value, .. } => *value,
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventCollector {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        self.events.write().push(event);
        Ok(())
    }

    async fn publish_all(&self, events: Vec<DomainEvent>) -> Result<()> {
        self.events.write().extend(events);
        Ok(())
    }
}

/// Fan-out publisher backed by a tokio broadcast channel.
///
/// Publishing with no subscribers is not an error. Slow subscribers lose the
/// oldest events once `capacity` is exceeded.
#[derive(Debug, Clone)]
pub struct BroadcastEventPublisher {
    sender: broadcast::Sender<DomainEvent>,
}

impl BroadcastEventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl EventPublisher for BroadcastEventPublisher {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        // Err only means nobody is listening.
        let _ = self.sender.send(event);
        Ok(())
    }

    async fn publish_all(&self, events: Vec<DomainEvent>) -> Result<()> {
        for event in events {
            let _ = self.sender.send(event);
        }
        Ok(())
    }
}

/// Composite event publisher that publishes to multiple backends.
#[derive(Default)]
pub struct CompositeEventPublisher {
    publishers: Vec<Box<dyn EventPublisher>>,
}

impl CompositeEventPublisher {
    /// Create a new composite publisher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a publisher to the composite.
    pub fn with_publisher<P: EventPublisher + 'static>(mut self, publisher: P) -> Self {
        self.publishers.push(Box::new(publisher));
        self
    }

    pub fn len(&self) -> usize {
        self.publishers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.publishers.is_empty()
    }
}

impl std::fmt::Debug for CompositeEventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeEventPublisher")
            .field("publisher_count", &self.publishers.len())
            .finish()
    }
}

#[async_trait]
impl EventPublisher for CompositeEventPublisher {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        for publisher in &self.publishers {
            publisher.publish(event.clone()).await?;
        }
        Ok(())
    }

    async fn publish_all(&self, events: Vec<DomainEvent>) -> Result<()> {
        for publisher in &self.publishers {
            publisher.publish_all(events.clone()).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<P: EventPublisher + ?Sized> EventPublisher for std::sync::Arc<P> {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        (**self).publish(event).await
    }

    async fn publish_all(&self, events: Vec<DomainEvent>) -> Result<()> {
        (**self).publish_all(events).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::ReadTarget;
    use crate::error::Error;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_logging_publisher() {
        let publisher = LoggingEventPublisher::new();
        let failure = Error::Connection("refused".into());

        // Should not panic
        publisher
            .publish(DomainEvent::write_succeeded("counter", 1))
            .await
            .unwrap();
        publisher
            .publish(DomainEvent::read_failed(
                "counter",
                &ReadTarget::Primary,
                &failure,
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_in_memory_collector() {
        let collector = InMemoryEventCollector::new();

        assert!(collector.is_empty());

        collector
            .publish(DomainEvent::write_succeeded("counter", 1))
            .await
            .unwrap();
        collector
            .publish_all(vec![
                DomainEvent::read_observed("counter", &ReadTarget::Primary, Some(1)),
                DomainEvent::read_observed("counter", &ReadTarget::secondary(), None),
            ])
            .await
            .unwrap();

        assert_eq!(collector.len(), 3);
        assert_eq!(collector.events_of_type("ReadObserved").len(), 2);
        assert_eq!(collector.observed_values(), vec![1]);

        collector.clear();
        assert!(collector.is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_publisher() {
        let publisher = BroadcastEventPublisher::new(16);

        // No subscribers yet
        publisher
            .publish(DomainEvent::write_succeeded("counter", 1))
            .await
            .unwrap();

        let mut rx = publisher.subscribe();
        publisher
            .publish(DomainEvent::counter_seeded("counter", 0))
            .await
            .unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_type(), "CounterSeeded");
    }

    #[tokio::test]
    async fn test_composite_publisher() {
        let collector = Arc::new(InMemoryEventCollector::new());
        let composite = CompositeEventPublisher::new()
            .with_publisher(LoggingEventPublisher::new())
            .with_publisher(Arc::clone(&collector));
        assert_eq!(composite.len(), 2);

        composite
            .publish(DomainEvent::write_succeeded("counter", 1))
            .await
            .unwrap();
        assert_eq!(collector.len(), 1);
    }
}
