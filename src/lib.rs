//! Replica Counter - Shared Counter Maintenance on a Replicated Store
//!
//! Keeps a single counter record on a replicated document store while
//! observing it under different read preferences. One writer increments the
//! counter on a fixed cadence; any number of readers read it back from the
//! primary, from secondaries, or from tagged secondaries such as an
//! analytics node, each on its own cadence.
//!
//! # Architecture
//!
//! ```text
//! Scheduler (Clock) → Counter Service (Brain) → Counter Store (Hands)
//!                              │
//!                              ▼
//!                   Event Publishers (Voice)
//! ```
//!
//! # Features
//!
//! - Idempotent seeding of the counter record
//! - Atomic increments routed to the primary
//! - Per-reader read targets with tag sets
//! - Skip-if-busy periodic scheduling with bounded drain on shutdown
//! - Cluster summary joining member status and configuration
//! - Prometheus metrics and health endpoints
//!
//! # Modules
//!
//! - [`adapters`] - Store and event publisher adapters implementing domain ports
//! - [`config`] - Configuration surface
//! - [`counter`] - Counter service and its writer/reader tasks
//! - [`domain`] - Domain layer with ports and events (DDD)
//! - [`error`] - Error types
//! - [`reporter`] - Cluster summary diagnostic
//! - [`scheduler`] - Periodic task runner
//! - [`server`] - Health and metrics HTTP server

pub mod adapters;
pub mod config;
pub mod counter;
pub mod domain;
pub mod error;
pub mod reporter;
pub mod scheduler;
pub mod server;

// Re-export commonly used types
pub use config::{AppConfig, Credentials, ReaderConfig};
pub use counter::{CounterService, ServiceState};
pub use domain::{CounterStore, DomainEvent, ReadTarget};
pub use error::{Error, Result};
pub use reporter::{ClusterSummaryReporter, ReportFormat};
pub use scheduler::{Scheduler, ShutdownReport};
