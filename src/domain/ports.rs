//! Domain Ports (DDD Port/Adapter Pattern)
//!
//! This module defines the core abstractions (ports) that the counter
//! service depends on. Infrastructure adapters implement these traits to
//! provide concrete implementations.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Domain Layer                            │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                    │    │
//! │  │  CounterStore │ ClusterTopology │ EventPublisher    │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                       │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                  Adapters (Impls)                    │    │
//! │  │  MongoCounterStore │ ReplicatedMemoryStore │ ...    │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::events::DomainEvent;
use crate::error::{Error, Result};

// =============================================================================
// Value Objects
// =============================================================================

/// Replica tag filter, e.g. `role=analytics`.
///
/// Ordered so that the textual form is stable.
pub type TagSet = BTreeMap<String, String>;

/// Which replica(s) may answer a read.
///
/// Supplied per read operation, never persisted. The textual form is
/// `primary`, `primaryPreferred`, `secondaryPreferred`, `secondary` or
/// `secondary:key=value[,key=value...]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ReadTarget {
    /// Only the primary may answer.
    Primary,
    /// The primary if available, otherwise a secondary.
    PrimaryPreferred,
    /// A secondary if available, otherwise the primary.
    SecondaryPreferred,
    /// Only a secondary, optionally restricted to members carrying `tags`.
    Secondary { tags: Option<TagSet> },
}

impl ReadTarget {
    /// Plain secondary read with no tag filter.
    pub fn secondary() -> Self {
        ReadTarget::Secondary { tags: None }
    }

    /// Secondary read restricted to members carrying every given tag.
    pub fn tagged_secondary<I, K, V>(tags: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let tags: TagSet = tags
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        ReadTarget::Secondary {
            tags: (!tags.is_empty()).then_some(tags),
        }
    }

    /// Tag filter, if any.
    pub fn tags(&self) -> Option<&TagSet> {
        match self {
            ReadTarget::Secondary { tags } => tags.as_ref(),
            _ => None,
        }
    }

    /// Check whether a member's tags satisfy this target's tag filter.
    pub fn matches_tags(&self, member_tags: &TagSet) -> bool {
        match self.tags() {
            Some(wanted) => wanted
                .iter()
                .all(|(k, v)| member_tags.get(k).is_some_and(|have| have == v)),
            None => true,
        }
    }
}

impl std::fmt::Display for ReadTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadTarget::Primary => write!(f, "primary"),
            ReadTarget::PrimaryPreferred => write!(f, "primaryPreferred"),
            ReadTarget::SecondaryPreferred => write!(f, "secondaryPreferred"),
            ReadTarget::Secondary { tags: None } => write!(f, "secondary"),
            ReadTarget::Secondary { tags: Some(tags) } => {
                let pairs: Vec<String> = tags.iter().map(|(k, v)| format!("{k}={v}")).collect();
                write!(f, "secondary:{}", pairs.join(","))
            }
        }
    }
}

impl FromStr for ReadTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (mode, tag_spec) = match s.split_once(':') {
            Some((mode, tags)) => (mode, Some(tags)),
            None => (s, None),
        };

        let normalized: String = mode
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();

        let target = match normalized.as_str() {
            "primary" => ReadTarget::Primary,
            "primarypreferred" => ReadTarget::PrimaryPreferred,
            "secondarypreferred" => ReadTarget::SecondaryPreferred,
            "secondary" => ReadTarget::secondary(),
            _ => return Err(Error::Config(format!("Unknown read target '{}'", mode))),
        };

        match (target, tag_spec) {
            (target, None) => Ok(target),
            (ReadTarget::Secondary { .. }, Some(spec)) => Ok(ReadTarget::Secondary {
                tags: Some(parse_tag_set(spec)?),
            }),
            (target, Some(_)) => Err(Error::Config(format!(
                "Tag filters are only supported for secondary reads, not '{}'",
                target
            ))),
        }
    }
}

impl TryFrom<String> for ReadTarget {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ReadTarget> for String {
    fn from(target: ReadTarget) -> Self {
        target.to_string()
    }
}

fn parse_tag_set(spec: &str) -> Result<TagSet> {
    let mut tags = TagSet::new();
    for pair in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| Error::Config(format!("Invalid tag '{}', expected key=value", pair)))?;
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() || value.is_empty() {
            return Err(Error::Config(format!(
                "Invalid tag '{}', key and value must be non-empty",
                pair
            )));
        }
        tags.insert(key.to_string(), value.to_string());
    }

    if tags.is_empty() {
        return Err(Error::Config(format!("Empty tag filter '{}'", spec)));
    }
    Ok(tags)
}

// =============================================================================
// Cluster Topology Value Objects
// =============================================================================

/// One entry of the live member-status listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberStatus {
    /// Member address as reported by the cluster (`host:port`)
    pub name: String,
    /// Role/state string, e.g. `PRIMARY`, `SECONDARY`
    pub state_str: String,
    /// Whether the member is reachable and healthy
    pub healthy: bool,
}

/// One entry of the member-configuration listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberConfig {
    /// Configured member address (`host:port`)
    pub host: String,
    /// Election priority
    pub priority: f64,
    /// Replica tags
    #[serde(default)]
    pub tags: TagSet,
}

/// Raw status and configuration listings, in the cluster's own ordering.
///
/// The two listings are expected to be index-aligned; that contract is
/// verified by the reporter, not assumed here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub status: Vec<MemberStatus>,
    pub config: Vec<MemberConfig>,
}

/// Joined view of a single member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberSnapshot {
    pub name: String,
    pub state_str: String,
    pub health: bool,
    pub priority: f64,
}

// =============================================================================
// Topology Port
// =============================================================================

/// Port for reading replica-set membership, health and priority.
///
/// Pure read; implementations must not mutate cluster state.
#[async_trait]
pub trait ClusterTopology: Send + Sync {
    /// Fetch the status and configuration member listings.
    async fn cluster_snapshot(&self) -> Result<ClusterSnapshot>;
}

// =============================================================================
// Counter Store Port
// =============================================================================

/// Port for counter persistence against a replicated backend.
///
/// This trait abstracts the backend so the service can run writer and
/// reader tasks with independently tunable consistency. Implementations
/// must not hold a lock across a network round-trip.
#[async_trait]
pub trait CounterStore: ClusterTopology {
    /// Insert `{key, initial}` only if no record with `key` exists.
    ///
    /// Safe to call concurrently and repeatedly.
    async fn ensure_seed(&self, key: &str, initial: i64) -> Result<()>;

    /// Atomically add `delta` to the record's value.
    ///
    /// Fails with [`Error::NotFound`] if the record does not exist.
    async fn increment(&self, key: &str, delta: i64) -> Result<()>;

    /// Read the record's value honoring `target`.
    ///
    /// Returns `Ok(None)` if the record does not exist.
    async fn read(&self, key: &str, target: &ReadTarget) -> Result<Option<i64>>;

    /// Short backend description for logs.
    fn describe(&self) -> String;
}

// =============================================================================
// Event Publisher Port
// =============================================================================

/// Port for publishing domain events.
///
/// This trait abstracts event publishing, allowing different backends
/// (logging, in-memory, broadcast, metrics) to be used.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a domain event.
    async fn publish(&self, event: DomainEvent) -> Result<()>;

    /// Publish multiple events.
    async fn publish_all(&self, events: Vec<DomainEvent>) -> Result<()>;
}

// =============================================================================
// Tests
// =============================================================================
