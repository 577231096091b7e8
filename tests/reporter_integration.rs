//! Cluster Summary Integration Tests
//!
//! Exercises the reporter against the simulated replica set and against
//! fixed topology listings that do not line up.

use std::sync::Arc;

use assert_matches::assert_matches;
use async_trait::async_trait;

use replica_counter::adapters::{MemoryStoreConfig, ReplicatedMemoryStore};
use replica_counter::domain::{
    ClusterSnapshot, ClusterTopology, MemberConfig, MemberSnapshot, MemberStatus, TagSet,
};
use replica_counter::{ClusterSummaryReporter, Error, ReportFormat, Result};

/// Topology source returning fixed listings.
struct FixedTopology(ClusterSnapshot);

#[async_trait]
impl ClusterTopology for FixedTopology {
    async fn cluster_snapshot(&self) -> Result<ClusterSnapshot> {
        Ok(self.0.clone())
    }
}

fn status(name: &str, state: &str, healthy: bool) -> MemberStatus {
    MemberStatus {
        name: name.to_string(),
        state_str: state.to_string(),
        healthy,
    }
}

fn member(host: &str, priority: f64) -> MemberConfig {
    MemberConfig {
        host: host.to_string(),
        priority,
        tags: TagSet::new(),
    }
}

#[tokio::test]
async fn test_summary_of_simulated_replica_set() {
    let store = Arc::new(ReplicatedMemoryStore::three_member(
        MemoryStoreConfig::default(),
    ));
    store.set_healthy("mongo2:27017", false).unwrap();

    let reporter = ClusterSummaryReporter::new(store);
    let members = reporter.summarize().await.unwrap();

    assert_eq!(
        members,
        vec![
            MemberSnapshot {
                name: "mongo1:27017".into(),
                state_str: "PRIMARY".into(),
                health: true,
                priority: 2.0,
            },
            MemberSnapshot {
                name: "mongo2:27017".into(),
                state_str: "(not reachable/healthy)".into(),
                health: false,
                priority: 1.0,
            },
            MemberSnapshot {
                name: "mongo3:27017".into(),
                state_str: "SECONDARY".into(),
                health: true,
                priority: 0.0,
            },
        ]
    );
}

#[tokio::test]
async fn test_status_and_config_length_mismatch() {
    let topology = FixedTopology(ClusterSnapshot {
        status: vec![
            status("mongo1:27017", "PRIMARY", true),
            status("mongo2:27017", "SECONDARY", true),
            status("mongo3:27017", "SECONDARY", true),
        ],
        config: vec![member("mongo1:27017", 1.0), member("mongo2:27017", 1.0)],
    });

    let reporter = ClusterSummaryReporter::new(Arc::new(topology));
    assert_matches!(
        reporter.summarize().await,
        Err(Error::InconsistentTopology(_))
    );
    assert_matches!(
        reporter.report(ReportFormat::Json).await,
        Err(Error::InconsistentTopology(_))
    );
}

#[tokio::test]
async fn test_reordered_listings_are_rejected() {
    let topology = FixedTopology(ClusterSnapshot {
        status: vec![
            status("mongo1:27017", "PRIMARY", true),
            status("mongo2:27017", "SECONDARY", true),
        ],
        config: vec![member("mongo2:27017", 1.0), member("mongo1:27017", 2.0)],
    });

    let reporter = ClusterSummaryReporter::new(Arc::new(topology));
    assert_matches!(
        reporter.summarize().await,
        Err(Error::InconsistentTopology(msg)) if msg.contains("mongo1:27017")
    );
}

#[tokio::test]
async fn test_json_report_round_trips() {
    let store = Arc::new(ReplicatedMemoryStore::three_member(
        MemoryStoreConfig::default(),
    ));
    let reporter = ClusterSummaryReporter::new(store);

    let json = reporter.report(ReportFormat::Json).await.unwrap();
    let parsed: Vec<MemberSnapshot> = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.len(), 3);
    assert_eq!(parsed[0].state_str, "PRIMARY");

    let yaml = reporter.report(ReportFormat::Yaml).await.unwrap();
    assert!(yaml.contains("mongo3:27017"));
}
