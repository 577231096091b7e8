//! Infrastructure Adapters
//!
//! This module contains adapter implementations for the domain ports,
//! following the Port/Adapter (Hexagonal) architecture pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                              │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                    Ports (Traits)                           │ │
//! │  │    CounterStore │ ClusterTopology │ EventPublisher         │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │ MongoCounterStore │ ReplicatedMemoryStore                  │ │
//! │  │ LoggingEventPublisher │ BroadcastEventPublisher            │ │
//! │  │ PrometheusEventPublisher │ CompositeEventPublisher         │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use replica_counter::adapters::{MemoryStoreConfig, ReplicatedMemoryStore};
//! use replica_counter::domain::ports::{CounterStore, ReadTarget};
//!
//! let store = ReplicatedMemoryStore::three_member(MemoryStoreConfig::default());
//! store.ensure_seed("counter", 0).await?;
//! store.increment("counter", 1).await?;
//! let value = store.read("counter", &ReadTarget::Primary).await?;
//! ```

mod event_publisher;
mod memory;
#[cfg(feature = "mongodb")]
mod mongo;
mod prometheus;
mod seed_retry;

pub use event_publisher::{
    BroadcastEventPublisher, CompositeEventPublisher, InMemoryEventCollector,
    LoggingEventPublisher,
};
pub use memory::{MemberRole, MemberSpec, MemoryStoreConfig, ReplicatedMemoryStore};
#[cfg(feature = "mongodb")]
pub use mongo::MongoCounterStore;
pub use prometheus::PrometheusEventPublisher;
