//! Replicated In-Memory Store
//!
//! Implements the `CounterStore` port with an in-process simulation of a
//! replica set: one primary, any number of secondaries, an oplog with a
//! configurable replication lag, and injectable latency and faults.
//!
//! Writes are applied to the primary and appended to the oplog. Secondaries
//! apply oplog entries once they are older than the replication lag, when
//! read or when the next write commits. Entries every member has applied are
//! trimmed; a member further behind than `oplog_capacity` entries is brought
//! up to the retained window. The cluster state lock is never held across an
//! await.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument};

use crate::domain::ports::{
    ClusterSnapshot, ClusterTopology, CounterStore, MemberConfig, MemberStatus, ReadTarget,
    TagSet,
};
use super::seed_retry::seed_with_retry;
use crate::error::{Error, Result};

// =============================================================================
// Configuration
// =============================================================================

/// Timing knobs for the simulated replica set
#[derive(Debug, Clone)]
pub struct MemoryStoreConfig {
    /// Delay before a write becomes visible on secondaries
    pub replication_lag: Duration,

    /// Simulated round-trip for reads
    pub read_latency: Duration,

    /// Simulated round-trip for writes
    pub write_latency: Duration,

    /// Oplog entries retained for lagging members
    pub oplog_capacity: usize,

    /// Extra seed attempts after a transient failure
    pub seed_retries: u32,

    /// Delay between seed attempts
    pub seed_retry_backoff: Duration,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            replication_lag: Duration::from_millis(200),
            read_latency: Duration::ZERO,
            write_latency: Duration::ZERO,
            oplog_capacity: 10_000,
            seed_retries: 3,
            seed_retry_backoff: Duration::from_millis(100),
        }
    }
}

/// Role a member starts in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberRole {
    Primary,
    Secondary,
}

/// Static description of one simulated member
#[derive(Debug, Clone)]
pub struct MemberSpec {
    pub host: String,
    pub role: MemberRole,
    pub priority: f64,
    pub tags: TagSet,
}

impl MemberSpec {
    pub fn primary(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            role: MemberRole::Primary,
            priority: 1.0,
            tags: TagSet::new(),
        }
    }

    pub fn secondary(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            role: MemberRole::Secondary,
            priority: 1.0,
            tags: TagSet::new(),
        }
    }

    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

// =============================================================================
// Cluster State
// =============================================================================

#[derive(Debug, Clone)]
enum Op {
    Seed { key: String, value: i64 },
    Increment { key: String, delta: i64 },
}

impl Op {
    fn apply(&self, docs: &mut HashMap<String, i64>) {
        match self {
            Op::Seed { key, value } => {
                docs.entry(key.clone()).or_insert(*value);
            }
            Op::Increment { key, delta } => {
                if let Some(v) = docs.get_mut(key) {
                    *v += delta;
                }
            }
        }
    }
}

#[derive(Debug)]
struct OplogEntry {
    at: Instant,
    op: Op,
}

#[derive(Debug)]
struct Member {
    spec: MemberSpec,
    is_primary: bool,
    healthy: bool,
    docs: HashMap<String, i64>,
    applied: usize,
}

/// `Member::applied` is an absolute oplog position; `oplog[0]` sits at
/// position `base`.
#[derive(Debug, Default)]
struct ClusterState {
    members: Vec<Member>,
    oplog: Vec<OplogEntry>,
    base: usize,
    inserts: HashMap<String, usize>,
}

impl ClusterState {
    fn primary_index(&self) -> Option<usize> {
        self.members.iter().position(|m| m.is_primary && m.healthy)
    }

    fn healthy_secondaries<'a>(&'a self, target: &'a ReadTarget) -> impl Iterator<Item = usize> + 'a {
        self.members
            .iter()
            .enumerate()
            .filter(move |(_, m)| !m.is_primary && m.healthy && target.matches_tags(&m.spec.tags))
            .map(|(i, _)| i)
    }

    fn select(&self, target: &ReadTarget) -> Option<usize> {
        match target {
            ReadTarget::Primary => self.primary_index(),
            ReadTarget::PrimaryPreferred => self
                .primary_index()
                .or_else(|| self.healthy_secondaries(target).next()),
            ReadTarget::SecondaryPreferred => self
                .healthy_secondaries(target)
                .next()
                .or_else(|| self.primary_index()),
            ReadTarget::Secondary { .. } => self.healthy_secondaries(target).next(),
        }
    }

    fn end(&self) -> usize {
        self.base + self.oplog.len()
    }

    /// Apply on the primary, append to the oplog, then replicate and trim.
    fn commit(&mut self, primary: usize, op: Op, lag: Duration, capacity: usize) {
        let now = Instant::now();
        op.apply(&mut self.members[primary].docs);
        if let Op::Seed { key, .. } = &op {
            *self.inserts.entry(key.clone()).or_default() += 1;
        }
        self.oplog.push(OplogEntry { at: now, op });
        self.members[primary].applied = self.end();

        for index in 0..self.members.len() {
            let member = &self.members[index];
            if !member.is_primary && member.healthy {
                self.catch_up(index, lag, now);
            }
        }
        self.trim(capacity);
    }

    /// Apply oplog entries older than `lag` on a secondary.
    fn catch_up(&mut self, index: usize, lag: Duration, now: Instant) {
        let ClusterState {
            members,
            oplog,
            base,
            ..
        } = self;
        let member = &mut members[index];
        for entry in &oplog[member.applied - *base..] {
            if entry.at + lag > now {
                break;
            }
            entry.op.apply(&mut member.docs);
            member.applied += 1;
        }
    }

    fn catch_up_fully(&mut self, index: usize) {
        let ClusterState {
            members,
            oplog,
            base,
            ..
        } = self;
        let member = &mut members[index];
        for entry in &oplog[member.applied - *base..] {
            entry.op.apply(&mut member.docs);
        }
        member.applied = *base + oplog.len();
    }

    /// Drop entries every member has applied. Members more than `capacity`
    /// entries behind apply the dropped entries first.
    fn trim(&mut self, capacity: usize) {
        let end = self.end();
        let slowest = self.members.iter().map(|m| m.applied).min().unwrap_or(end);
        let cut = slowest.max(end.saturating_sub(capacity));
        if cut <= self.base {
            return;
        }

        let dropped: Vec<OplogEntry> = self.oplog.drain(..cut - self.base).collect();
        for member in self.members.iter_mut().filter(|m| m.applied < cut) {
            for entry in &dropped[member.applied - self.base..] {
                entry.op.apply(&mut member.docs);
            }
            member.applied = cut;
        }
        self.base = cut;
    }

    fn member_index(&self, host: &str) -> Result<usize> {
        self.members
            .iter()
            .position(|m| m.spec.host == host)
            .ok_or_else(|| Error::Config(format!("Unknown replica set member '{}'", host)))
    }
}

// =============================================================================
// Store
// =============================================================================

/// In-process simulated replica set.
#[derive(Debug)]
pub struct ReplicatedMemoryStore {
    config: MemoryStoreConfig,
    state: Mutex<ClusterState>,
    write_fault: AtomicBool,
    read_fault: AtomicBool,
    seed_faults: AtomicU32,
}

impl ReplicatedMemoryStore {
    /// Create a store from member specs; at most one may start as primary.
    pub fn new(config: MemoryStoreConfig, members: Vec<MemberSpec>) -> Result<Self> {
        if members.is_empty() {
            return Err(Error::Config("A replica set needs at least one member".into()));
        }
        let primaries = members
            .iter()
            .filter(|m| m.role == MemberRole::Primary)
            .count();
        if primaries > 1 {
            return Err(Error::Config(format!(
                "A replica set has at most one primary, got {}",
                primaries
            )));
        }

        Ok(Self::from_specs(config, members))
    }

    fn from_specs(config: MemoryStoreConfig, members: Vec<MemberSpec>) -> Self {
        let members = members
            .into_iter()
            .map(|spec| Member {
                is_primary: spec.role == MemberRole::Primary,
                healthy: true,
                docs: HashMap::new(),
                applied: 0,
                spec,
            })
            .collect();

        Self {
            config,
            state: Mutex::new(ClusterState {
                members,
                ..Default::default()
            }),
            write_fault: AtomicBool::new(false),
            read_fault: AtomicBool::new(false),
            seed_faults: AtomicU32::new(0),
        }
    }

    /// Three members: a primary, a plain secondary and a priority-0
    /// secondary tagged `role=analytics`.
    pub fn three_member(config: MemoryStoreConfig) -> Self {
        let members = vec![
            MemberSpec::primary("mongo1:27017").with_priority(2.0),
            MemberSpec::secondary("mongo2:27017"),
            MemberSpec::secondary("mongo3:27017")
                .with_priority(0.0)
                .with_tag("role", "analytics"),
        ];
        Self::from_specs(config, members)
    }

    pub fn config(&self) -> &MemoryStoreConfig {
        &self.config
    }

    // =========================================================================
    // Fault Injection
    // =========================================================================

    /// Make every write fail with a connection error.
    pub fn set_write_fault(&self, enabled: bool) {
        self.write_fault.store(enabled, Ordering::SeqCst);
    }

    /// Make every read fail with a connection error.
    pub fn set_read_fault(&self, enabled: bool) {
        self.read_fault.store(enabled, Ordering::SeqCst);
    }

    /// Make the next `attempts` seed attempts fail with a connection error.
    pub fn fail_next_seeds(&self, attempts: u32) {
        self.seed_faults.store(attempts, Ordering::SeqCst);
    }

    /// Mark a member reachable or unreachable.
    pub fn set_healthy(&self, host: &str, healthy: bool) -> Result<()> {
        let mut state = self.state.lock();
        let index = state.member_index(host)?;
        state.members[index].healthy = healthy;
        info!(member = %host, healthy, "Member health changed");
        Ok(())
    }

    /// Make `host` the primary. It applies the whole oplog first.
    pub fn promote(&self, host: &str) -> Result<()> {
        let mut state = self.state.lock();
        let index = state.member_index(host)?;
        state.catch_up_fully(index);
        for (i, member) in state.members.iter_mut().enumerate() {
            member.is_primary = i == index;
        }
        info!(member = %host, "Member promoted to primary");
        Ok(())
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Value on the primary, regardless of its health.
    pub fn primary_value(&self, key: &str) -> Option<i64> {
        let state = self.state.lock();
        state
            .members
            .iter()
            .find(|m| m.is_primary)
            .and_then(|m| m.docs.get(key).copied())
    }

    /// Number of records held by the primary.
    pub fn record_count(&self) -> usize {
        let state = self.state.lock();
        state
            .members
            .iter()
            .find(|m| m.is_primary)
            .map(|m| m.docs.len())
            .unwrap_or(0)
    }

    /// Number of inserts committed for `key`.
    pub fn inserts_committed(&self, key: &str) -> usize {
        self.state.lock().inserts.get(key).copied().unwrap_or(0)
    }

    /// Oplog entries not yet applied by every member.
    pub fn oplog_len(&self) -> usize {
        self.state.lock().oplog.len()
    }

    async fn seed_once(&self, key: &str, initial: i64) -> Result<()> {
        self.round_trip(self.config.write_latency).await;
        Self::check_fault(&self.write_fault, "write")?;
        let injected = self
            .seed_faults
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(Error::Connection("injected seed fault".into()));
        }

        let mut state = self.state.lock();
        let primary = state
            .primary_index()
            .ok_or_else(|| Error::Connection("no primary available".into()))?;

        if state.members[primary].docs.contains_key(key) {
            debug!(key, "Record already present");
            return Ok(());
        }
        state.commit(
            primary,
            Op::Seed {
                key: key.to_string(),
                value: initial,
            },
            self.config.replication_lag,
            self.config.oplog_capacity,
        );
        debug!(key, initial, "Record inserted");
        Ok(())
    }

    async fn round_trip(&self, latency: Duration) {
        if !latency.is_zero() {
            sleep(latency).await;
        }
    }

    fn check_fault(flag: &AtomicBool, what: &str) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(Error::Connection(format!("injected {} fault", what)));
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterTopology for ReplicatedMemoryStore {
    async fn cluster_snapshot(&self) -> Result<ClusterSnapshot> {
        self.round_trip(self.config.read_latency).await;

        let state = self.state.lock();
        let status = state
            .members
            .iter()
            .map(|m| MemberStatus {
                name: m.spec.host.clone(),
                state_str: match (m.healthy, m.is_primary) {
                    (false, _) => "(not reachable/healthy)".to_string(),
                    (true, true) => "PRIMARY".to_string(),
                    (true, false) => "SECONDARY".to_string(),
                },
                healthy: m.healthy,
            })
            .collect();
        let config = state
            .members
            .iter()
            .map(|m| MemberConfig {
                host: m.spec.host.clone(),
                priority: m.spec.priority,
                tags: m.spec.tags.clone(),
            })
            .collect();

        Ok(ClusterSnapshot { status, config })
    }
}

#[async_trait]
impl CounterStore for ReplicatedMemoryStore {
    #[instrument(skip(self))]
    async fn ensure_seed(&self, key: &str, initial: i64) -> Result<()> {
        seed_with_retry(
            key,
            self.config.seed_retries,
            self.config.seed_retry_backoff,
            || self.seed_once(key, initial),
        )
        .await
    }

    async fn increment(&self, key: &str, delta: i64) -> Result<()> {
        self.round_trip(self.config.write_latency).await;
        Self::check_fault(&self.write_fault, "write")?;

        let mut state = self.state.lock();
        let primary = state
            .primary_index()
            .ok_or_else(|| Error::Connection("no primary available".into()))?;

        if !state.members[primary].docs.contains_key(key) {
            return Err(Error::NotFound {
                key: key.to_string(),
            });
        }
        state.commit(
            primary,
            Op::Increment {
                key: key.to_string(),
                delta,
            },
            self.config.replication_lag,
            self.config.oplog_capacity,
        );
        Ok(())
    }

    async fn read(&self, key: &str, target: &ReadTarget) -> Result<Option<i64>> {
        self.round_trip(self.config.read_latency).await;
        Self::check_fault(&self.read_fault, "read")?;

        let mut state = self.state.lock();
        let index = state.select(target).ok_or_else(|| {
            Error::Connection(format!("no reachable member satisfies {}", target))
        })?;
        if !state.members[index].is_primary {
            state.catch_up(index, self.config.replication_lag, Instant::now());
        }
        Ok(state.members[index].docs.get(key).copied())
    }

    fn describe(&self) -> String {
        let state = self.state.lock();
        format!(
            "in-memory replica set ({} members, replication lag {}ms)",
            state.members.len(),
            self.config.replication_lag.as_millis()
        )
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn store(lag_ms: u64) -> ReplicatedMemoryStore {
        ReplicatedMemoryStore::three_member(MemoryStoreConfig {
            replication_lag: Duration::from_millis(lag_ms),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_seed_is_insert_if_absent() {
        let store = store(0);
        store.ensure_seed("counter", 0).await.unwrap();
        store.increment("counter", 5).await.unwrap();
        store.ensure_seed("counter", 0).await.unwrap();

        assert_eq!(store.primary_value("counter"), Some(5));
        assert_eq!(store.inserts_committed("counter"), 1);
    }

    #[tokio::test]
    async fn test_increment_missing_record() {
        let store = store(0);
        let result = store.increment("counter", 1).await;
        assert_matches!(result, Err(Error::NotFound { key }) if key == "counter");
    }

    #[tokio::test]
    async fn test_read_missing_record_is_none() {
        let store = store(0);
        let value = store.read("counter", &ReadTarget::Primary).await.unwrap();
        assert_eq!(value, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_secondary_lags_primary() {
        let store = store(200);
        store.ensure_seed("counter", 0).await.unwrap();
        sleep(Duration::from_millis(250)).await;
        store.increment("counter", 1).await.unwrap();

        let analytics = ReadTarget::tagged_secondary([("role", "analytics")]);
        assert_eq!(store.read("counter", &ReadTarget::Primary).await.unwrap(), Some(1));
        assert_eq!(store.read("counter", &analytics).await.unwrap(), Some(0));

        sleep(Duration::from_millis(200)).await;
        assert_eq!(store.read("counter", &analytics).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_primary_preferred_falls_back_to_secondary() {
        let store = store(0);
        store.ensure_seed("counter", 3).await.unwrap();
        store.set_healthy("mongo1:27017", false).unwrap();

        let value = store
            .read("counter", &ReadTarget::PrimaryPreferred)
            .await
            .unwrap();
        assert_eq!(value, Some(3));
        assert_matches!(
            store.read("counter", &ReadTarget::Primary).await,
            Err(Error::Connection(_))
        );
        assert_matches!(
            store.increment("counter", 1).await,
            Err(Error::Connection(_))
        );
    }

    #[tokio::test]
    async fn test_tagged_secondary_unavailable() {
        let store = store(0);
        store.ensure_seed("counter", 0).await.unwrap();
        store.set_healthy("mongo3:27017", false).unwrap();

        let analytics = ReadTarget::tagged_secondary([("role", "analytics")]);
        assert_matches!(
            store.read("counter", &analytics).await,
            Err(Error::Connection(_))
        );
        // An untagged secondary read still has mongo2.
        assert_eq!(
            store.read("counter", &ReadTarget::secondary()).await.unwrap(),
            Some(0)
        );
    }

    #[tokio::test]
    async fn test_secondary_preferred_falls_back_to_primary() {
        let store = store(0);
        store.ensure_seed("counter", 9).await.unwrap();
        store.set_healthy("mongo2:27017", false).unwrap();
        store.set_healthy("mongo3:27017", false).unwrap();

        let value = store
            .read("counter", &ReadTarget::SecondaryPreferred)
            .await
            .unwrap();
        assert_eq!(value, Some(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_promotion_keeps_committed_writes() {
        let store = store(10_000);
        store.ensure_seed("counter", 0).await.unwrap();
        for _ in 0..4 {
            store.increment("counter", 1).await.unwrap();
        }

        store.set_healthy("mongo1:27017", false).unwrap();
        store.promote("mongo2:27017").unwrap();
        store.increment("counter", 1).await.unwrap();

        assert_eq!(store.read("counter", &ReadTarget::Primary).await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let store = store(0);
        store.ensure_seed("counter", 0).await.unwrap();

        store.set_write_fault(true);
        assert_matches!(store.increment("counter", 1).await, Err(Error::Connection(_)));
        assert!(store.read("counter", &ReadTarget::Primary).await.is_ok());

        store.set_write_fault(false);
        store.set_read_fault(true);
        assert!(store.increment("counter", 1).await.is_ok());
        assert_matches!(
            store.read("counter", &ReadTarget::Primary).await,
            Err(Error::Connection(_))
        );
    }

    #[tokio::test]
    async fn test_cluster_snapshot_reflects_members() {
        let store = store(0);
        store.set_healthy("mongo2:27017", false).unwrap();

        let snapshot = store.cluster_snapshot().await.unwrap();
        assert_eq!(snapshot.status.len(), 3);
        assert_eq!(snapshot.config.len(), 3);
        assert_eq!(snapshot.status[0].state_str, "PRIMARY");
        assert!(!snapshot.status[1].healthy);
        assert_eq!(snapshot.config[2].priority, 0.0);
        assert_eq!(
            snapshot.config[2].tags.get("role").map(String::as_str),
            Some("analytics")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_oplog_trimmed_once_members_catch_up() {
        let store = store(200);
        store.ensure_seed("counter", 0).await.unwrap();
        for _ in 0..50 {
            store.increment("counter", 1).await.unwrap();
        }
        assert_eq!(store.oplog_len(), 51);

        sleep(Duration::from_millis(250)).await;
        store.increment("counter", 1).await.unwrap();

        assert_eq!(store.oplog_len(), 1);
        assert_eq!(store.inserts_committed("counter"), 1);
        assert_eq!(
            store.read("counter", &ReadTarget::secondary()).await.unwrap(),
            Some(50)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_member_holds_at_most_capacity() {
        let store = ReplicatedMemoryStore::three_member(MemoryStoreConfig {
            replication_lag: Duration::ZERO,
            oplog_capacity: 8,
            ..Default::default()
        });
        store.ensure_seed("counter", 0).await.unwrap();
        store.set_healthy("mongo3:27017", false).unwrap();
        for _ in 0..20 {
            store.increment("counter", 1).await.unwrap();
        }
        assert_eq!(store.oplog_len(), 8);

        store.set_healthy("mongo3:27017", true).unwrap();
        let analytics = ReadTarget::tagged_secondary([("role", "analytics")]);
        assert_eq!(store.read("counter", &analytics).await.unwrap(), Some(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_seed_retries_injected_faults() {
        let store = store(0);
        store.fail_next_seeds(2);
        store.ensure_seed("counter", 7).await.unwrap();
        assert_eq!(store.primary_value("counter"), Some(7));

        store.fail_next_seeds(10);
        assert_matches!(
            store.ensure_seed("other", 0).await,
            Err(Error::Connection(msg)) if msg.contains("after 4 attempts")
        );
        assert_eq!(store.record_count(), 1);
    }

    #[test]
    fn test_rejects_two_primaries() {
        let result = ReplicatedMemoryStore::new(
            MemoryStoreConfig::default(),
            vec![MemberSpec::primary("a:1"), MemberSpec::primary("b:1")],
        );
        assert_matches!(result, Err(Error::Config(_)));
        assert_matches!(
            ReplicatedMemoryStore::new(MemoryStoreConfig::default(), vec![]),
            Err(Error::Config(_))
        );
    }
}
