//! Counter Service
//!
//! Owns the counter identity and coordinates one writer and any number of
//! readers through the scheduler.
//!
//! # Lifecycle
//!
//! ```text
//! Stopped ──start──▶ Starting ──seeded──▶ Running ──stop──▶ Stopping ──drained──▶ Stopped
//!                       │
//!                       └──seed failed──▶ Stopped
//! ```

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use super::tasks::{bounded, emit, ReaderTask, WriterTask};
use crate::config::AppConfig;
use crate::domain::events::DomainEvent;
use crate::domain::ports::{CounterStore, EventPublisher, ReadTarget};
use crate::error::{Error, Result};
use crate::scheduler::{Scheduler, ShutdownReport, TaskStats};

// =============================================================================
// Service State
// =============================================================================

/// Lifecycle state of the counter service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServiceState {
    /// No tasks are scheduled
    Stopped,
    /// Seeding the counter record
    Starting,
    /// Writer and readers are ticking
    Running,
    /// Draining in-flight ticks
    Stopping,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceState::Stopped => write!(f, "Stopped"),
            ServiceState::Starting => write!(f, "Starting"),
            ServiceState::Running => write!(f, "Running"),
            ServiceState::Stopping => write!(f, "Stopping"),
        }
    }
}

// =============================================================================
// Counter Service
// =============================================================================

/// Maintains a shared counter against a replicated store.
pub struct CounterService {
    config: AppConfig,
    store: Arc<dyn CounterStore>,
    publisher: Arc<dyn EventPublisher>,
    state: RwLock<ServiceState>,
    scheduler: Mutex<Option<Scheduler>>,
    last_observed: Arc<DashMap<String, i64>>,
}

impl CounterService {
    /// Create a stopped service. The configuration is validated here.
    pub fn new(
        config: AppConfig,
        store: Arc<dyn CounterStore>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            publisher,
            state: RwLock::new(ServiceState::Stopped),
            scheduler: Mutex::new(None),
            last_observed: Arc::new(DashMap::new()),
        })
    }

    pub fn state(&self) -> ServiceState {
        *self.state.read()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ServiceState::Running
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Move from `from` to `to`, or fail without changing anything.
    fn transition(&self, from: ServiceState, to: ServiceState) -> Result<()> {
        let mut state = self.state.write();
        if *state != from {
            return Err(Error::InvalidState {
                expected: from.to_string(),
                actual: state.to_string(),
            });
        }
        *state = to;
        Ok(())
    }

    fn set_state(&self, to: ServiceState) {
        *self.state.write() = to;
    }

    /// Seed the counter record and start the writer and readers.
    ///
    /// On a seeding failure the service returns to `Stopped` and the error
    /// is handed back to the caller.
    #[instrument(skip(self), fields(key = %self.config.counter_key))]
    pub async fn start(&self) -> Result<()> {
        self.transition(ServiceState::Stopped, ServiceState::Starting)?;
        info!(backend = %self.store.describe(), "Starting counter service");

        let key = self.config.counter_key.clone();

        // The store retries transient seed failures itself; this bound only
        // catches a backend that hangs past the whole retry budget.
        let seeded = bounded(
            "ensure_seed",
            self.config.seed_deadline(),
            self.store.ensure_seed(&key, self.config.initial_value),
        )
        .await;
        if let Err(e) = seeded {
            error!(error = %e, "Failed to seed counter record");
            self.set_state(ServiceState::Stopped);
            return Err(e);
        }
        emit(
            self.publisher.as_ref(),
            DomainEvent::counter_seeded(&key, self.config.initial_value),
        )
        .await;

        let scheduler = match self.schedule_tasks(&key) {
            Ok(scheduler) => scheduler,
            Err(e) => {
                self.set_state(ServiceState::Stopped);
                return Err(e);
            }
        };
        *self.scheduler.lock() = Some(scheduler);

        let targets: Vec<ReadTarget> = self
            .config
            .reader_configs
            .iter()
            .map(|r| r.target.clone())
            .collect();
        emit(
            self.publisher.as_ref(),
            DomainEvent::service_started(&key, self.config.writer_interval_ms, targets),
        )
        .await;

        self.set_state(ServiceState::Running);
        info!(
            writer_interval_ms = self.config.writer_interval_ms,
            readers = self.config.reader_configs.len(),
            "Counter service running"
        );
        Ok(())
    }

    fn schedule_tasks(&self, key: &str) -> Result<Scheduler> {
        let mut scheduler = Scheduler::new();
        let deadline = self.config.operation_deadline();

        scheduler.spawn(
            "writer",
            self.config.writer_interval(),
            Arc::new(WriterTask {
                store: Arc::clone(&self.store),
                publisher: Arc::clone(&self.publisher),
                key: key.to_string(),
                deadline,
            }),
        )?;

        for (index, reader) in self.config.reader_configs.iter().enumerate() {
            scheduler.spawn(
                format!("reader-{}-{}", index, reader.target),
                reader.interval(),
                Arc::new(ReaderTask {
                    store: Arc::clone(&self.store),
                    publisher: Arc::clone(&self.publisher),
                    key: key.to_string(),
                    target: reader.target.clone(),
                    deadline,
                    last_observed: Arc::clone(&self.last_observed),
                }),
            )?;
        }

        Ok(scheduler)
    }

    /// Stop with the configured grace period.
    pub async fn stop(&self) -> Result<ShutdownReport> {
        self.stop_with_grace(self.config.shutdown_grace()).await
    }

    /// Stop issuing ticks and drain in-flight ones for up to `grace`.
    ///
    /// Drain problems are logged; the service always reaches `Stopped`.
    #[instrument(skip(self), fields(key = %self.config.counter_key))]
    pub async fn stop_with_grace(&self, grace: Duration) -> Result<ShutdownReport> {
        self.transition(ServiceState::Running, ServiceState::Stopping)?;
        info!(grace_ms = grace.as_millis() as u64, "Stopping counter service");

        let scheduler = self.scheduler.lock().take();
        let report = match scheduler {
            Some(scheduler) => scheduler.shutdown(grace).await,
            None => ShutdownReport::default(),
        };
        if !report.is_clean() {
            warn!(abandoned = ?report.abandoned, "Stopped with abandoned ticks");
        }

        emit(
            self.publisher.as_ref(),
            DomainEvent::service_stopped(
                &self.config.counter_key,
                report.drained,
                report.abandoned.clone(),
            ),
        )
        .await;

        self.set_state(ServiceState::Stopped);
        info!(drained = report.drained, "Counter service stopped");
        Ok(report)
    }

    /// Per-task tick counters; empty unless running.
    pub fn scheduler_stats(&self) -> Vec<TaskStats> {
        self.scheduler
            .lock()
            .as_ref()
            .map(Scheduler::stats)
            .unwrap_or_default()
    }

    /// Most recent value seen by readers using `target`.
    pub fn last_observed(&self, target: &ReadTarget) -> Option<i64> {
        self.last_observed.get(&target.to_string()).map(|v| *v)
    }
}

impl std::fmt::Debug for CounterService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CounterService")
            .field("key", &self.config.counter_key)
            .field("state", &self.state())
            .field("backend", &self.store.describe())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
