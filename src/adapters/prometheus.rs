//! Prometheus Metrics Adapter
//!
//! Implements the `EventPublisher` port by folding tick outcomes into
//! Prometheus counters and gauges held in a private registry.

use async_trait::async_trait;
use prometheus::{Encoder, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::domain::events::DomainEvent;
use crate::domain::ports::EventPublisher;
use crate::error::{Error, Result};

const NAMESPACE: &str = "replica_counter";

/// Event publisher that exports tick outcomes as Prometheus metrics.
#[derive(Clone)]
pub struct PrometheusEventPublisher {
    registry: Registry,
    writes: IntCounterVec,
    reads: IntCounterVec,
    errors: IntCounterVec,
    last_observed: IntGaugeVec,
    running: IntGauge,
}

impl PrometheusEventPublisher {
    /// Create a publisher with its own registry.
    pub fn new() -> Result<Self> {
        Self::with_registry(Registry::new())
    }

    /// Create a publisher registering into `registry`.
    pub fn with_registry(registry: Registry) -> Result<Self> {
        let writes = IntCounterVec::new(
            Opts::new("writes_total", "Writer ticks by outcome").namespace(NAMESPACE),
            &["outcome"],
        )?;
        let reads = IntCounterVec::new(
            Opts::new("reads_total", "Reader ticks by read target and outcome")
                .namespace(NAMESPACE),
            &["target", "outcome"],
        )?;
        let errors = IntCounterVec::new(
            Opts::new("errors_total", "Failed ticks by operation and error kind")
                .namespace(NAMESPACE),
            &["operation", "kind"],
        )?;
        let last_observed = IntGaugeVec::new(
            Opts::new(
                "last_observed_value",
                "Most recent counter value seen by each read target",
            )
            .namespace(NAMESPACE),
            &["target"],
        )?;
        let running = IntGauge::with_opts(
            Opts::new("service_running", "1 while the counter service is running")
                .namespace(NAMESPACE),
        )?;

        registry.register(Box::new(writes.clone()))?;
        registry.register(Box::new(reads.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(last_observed.clone()))?;
        registry.register(Box::new(running.clone()))?;

        Ok(Self {
            registry,
            writes,
            reads,
            errors,
            last_observed,
            running,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all metrics in the Prometheus text exposition format.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| Error::Serialization(format!("Metrics are not UTF-8: {}", e)))
    }

    fn record(&self, event: &DomainEvent) {
        match event {
            DomainEvent::WriteSucceeded { .. } => {
                self.writes.with_label_values(&["success"]).inc();
            }
            DomainEvent::WriteFailed { error_kind, .. } => {
                self.writes.with_label_values(&["failure"]).inc();
                self.errors
                    .with_label_values(&["write", error_kind.as_str()])
                    .inc();
            }
            DomainEvent::ReadObserved { target, value, .. } => {
                let target = target.to_string();
                let outcome = if value.is_some() { "success" } else { "missing" };
                self.reads.with_label_values(&[target.as_str(), outcome]).inc();
                if let Some(v) = value {
                    self.last_observed
                        .with_label_values(&[target.as_str()])
                        .set(*v);
                }
            }
            DomainEvent::ReadFailed {
                target, error_kind, ..
            } => {
                let target = target.to_string();
                self.reads
                    .with_label_values(&[target.as_str(), "failure"])
                    .inc();
                self.errors
                    .with_label_values(&["read", error_kind.as_str()])
                    .inc();
            }
            DomainEvent::ServiceStarted { .. } => self.running.set(1),
            DomainEvent::ServiceStopped { .. } => self.running.set(0),
            DomainEvent::CounterSeeded { .. } => {}
        }
    }
}

impl std::fmt::Debug for PrometheusEventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusEventPublisher")
            .field("running", &self.running.get())
            .finish()
    }
}

#[async_trait]
impl EventPublisher for PrometheusEventPublisher {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        self.record(&event);
        Ok(())
    }

    async fn publish_all(&self, events: Vec<DomainEvent>) -> Result<()> {
        for event in &events {
            self.record(event);
        }
        Ok(())
    }
}
