//! Domain Events
//!
//! Immutable records of tick outcomes and service lifecycle transitions.
//! Every event carries a UTC timestamp that serializes as RFC 3339.
//!
//! # Example
//!
//! ```ignore
//! let event = DomainEvent::read_observed("counter", &ReadTarget::PrimaryPreferred, Some(7));
//! event_publisher.publish(event).await?;
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ports::ReadTarget;
use crate::error::Error;

/// Domain event representing a significant occurrence in the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    // =========================================================================
    // Tick Outcomes
    // =========================================================================
    /// The writer's increment was acknowledged.
    WriteSucceeded {
        key: String,
        delta: i64,
        timestamp: DateTime<Utc>,
    },

    /// The writer's increment failed; the next tick retries independently.
    WriteFailed {
        key: String,
        error: String,
        error_kind: String,
        timestamp: DateTime<Utc>,
    },

    /// A reader observed the counter under `target`.
    ///
    /// `value` is `None` when the record did not exist on the answering replica.
    ReadObserved {
        key: String,
        target: ReadTarget,
        value: Option<i64>,
        timestamp: DateTime<Utc>,
    },

    /// A reader failed under `target`.
    ReadFailed {
        key: String,
        target: ReadTarget,
        error: String,
        error_kind: String,
        timestamp: DateTime<Utc>,
    },

    // =========================================================================
    // Lifecycle
    // =========================================================================
    /// The counter record is known to exist.
    CounterSeeded {
        key: String,
        initial_value: i64,
        timestamp: DateTime<Utc>,
    },

    /// The service entered `Running`.
    ServiceStarted {
        key: String,
        writer_interval_ms: u64,
        reader_targets: Vec<ReadTarget>,
        timestamp: DateTime<Utc>,
    },

    /// The service returned to `Stopped`.
    ServiceStopped {
        key: String,
        drained_tasks: usize,
        abandoned_tasks: Vec<String>,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            DomainEvent::WriteSucceeded { timestamp, .. } => *timestamp,
            DomainEvent::WriteFailed { timestamp, .. } => *timestamp,
            DomainEvent::ReadObserved { timestamp, .. } => *timestamp,
            DomainEvent::ReadFailed { timestamp, .. } => *timestamp,
            DomainEvent::CounterSeeded { timestamp, .. } => *timestamp,
            DomainEvent::ServiceStarted { timestamp, .. } => *timestamp,
            DomainEvent::ServiceStopped { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::WriteSucceeded { .. } => "WriteSucceeded",
            DomainEvent::WriteFailed { .. } => "WriteFailed",
            DomainEvent::ReadObserved { .. } => "ReadObserved",
            DomainEvent::ReadFailed { .. } => "ReadFailed",
            DomainEvent::CounterSeeded { .. } => "CounterSeeded",
            DomainEvent::ServiceStarted { .. } => "ServiceStarted",
            DomainEvent::ServiceStopped { .. } => "ServiceStopped",
        }
    }

    /// Get the counter key.
    pub fn key(&self) -> &str {
        match self {
            DomainEvent::WriteSucceeded { key, .. }
            | DomainEvent::WriteFailed { key, .. }
            | DomainEvent::ReadObserved { key, .. }
            | DomainEvent::ReadFailed { key, .. }
            | DomainEvent::CounterSeeded { key, .. }
            | DomainEvent::ServiceStarted { key, .. }
            | DomainEvent::ServiceStopped { key, .. } => key,
        }
    }

    /// Get the read target for reader outcomes.
    pub fn target(&self) -> Option<&ReadTarget> {
        match self {
            DomainEvent::ReadObserved { target, .. } => Some(target),
            DomainEvent::ReadFailed { target, .. } => Some(target),
            _ => None,
        }
    }

    /// Whether this event reports a failed tick.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            DomainEvent::WriteFailed { .. } | DomainEvent::ReadFailed { .. }
        )
    }
}

// =============================================================================
// Event Builders
// =============================================================================

impl DomainEvent {
    /// Create a WriteSucceeded event.
    pub fn write_succeeded(key: impl Into<String>, delta: i64) -> Self {
        DomainEvent::WriteSucceeded {
            key: key.into(),
            delta,
            timestamp: Utc::now(),
        }
    }

    /// Create a WriteFailed event.
    pub fn write_failed(key: impl Into<String>, error: &Error) -> Self {
        DomainEvent::WriteFailed {
            key: key.into(),
            error: error.to_string(),
            error_kind: error.kind().to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Create a ReadObserved event.
    pub fn read_observed(key: impl Into<String>, target: &ReadTarget, value: Option<i64>) -> Self {
        DomainEvent::ReadObserved {
            key: key.into(),
            target: target.clone(),
            value,
            timestamp: Utc::now(),
        }
    }

    /// Create a ReadFailed event.
    pub fn read_failed(key: impl Into<String>, target: &ReadTarget, error: &Error) -> Self {
        DomainEvent::ReadFailed {
            key: key.into(),
            target: target.clone(),
            error: error.to_string(),
            error_kind: error.kind().to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Create a CounterSeeded event.
    pub fn counter_seeded(key: impl Into<String>, initial_value: i64) -> Self {
        DomainEvent::CounterSeeded {
            key: key.into(),
            initial_value,
            timestamp: Utc::now(),
        }
    }

    /// Create a ServiceStarted event.
    pub fn service_started(
        key: impl Into<String>,
        writer_interval_ms: u64,
        reader_targets: Vec<ReadTarget>,
    ) -> Self {
        DomainEvent::ServiceStarted {
            key: key.into(),
            writer_interval_ms,
            reader_targets,
            timestamp: Utc::now(),
        }
    }

    /// Create a ServiceStopped event.
    pub fn service_stopped(
        key: impl Into<String>,
        drained_tasks: usize,
        abandoned_tasks: Vec<String>,
    ) -> Self {
        DomainEvent::ServiceStopped {
            key: key.into(),
            drained_tasks,
            abandoned_tasks,
            timestamp: Utc::now(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
