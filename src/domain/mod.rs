//! Domain Layer
//!
//! This module contains the core domain types following Domain-Driven Design
//! principles.
//!
//! # Architecture
//!
//! The domain layer is organized into:
//!
//! - **Ports** (`ports.rs`) - Trait abstractions for the replicated backend
//!   and event sinks, plus the value objects they exchange
//! - **Events** (`events.rs`) - Domain events for tick outcomes and lifecycle
//!
//! # Usage
//!
//! ```ignore
//! use replica_counter::domain::ports::{CounterStore, ReadTarget};
//!
//! async fn observe<S: CounterStore>(store: &S) -> Result<Option<i64>> {
//!     store.read("counter", &ReadTarget::SecondaryPreferred).await
//! }
//! ```

pub mod events;
pub mod ports;

pub use events::DomainEvent;
pub use ports::{
    // Port traits
    ClusterTopology,
    // Value objects
    ClusterSnapshot,
    CounterStore,
    EventPublisher,
    MemberConfig,
    MemberSnapshot,
    MemberStatus,
    ReadTarget,
    TagSet,
};
