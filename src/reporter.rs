//! Cluster Summary Reporter
//!
//! Read-only diagnostic that joins the replica set's member status listing
//! with its member configuration listing. The two listings are matched by
//! position, so the join checks that they actually line up and refuses to
//! guess when they do not.

use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::domain::ports::{ClusterSnapshot, ClusterTopology, MemberSnapshot};
use crate::error::{Error, Result};

/// Output format for a rendered summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    /// Pretty-printed JSON, two-space indent
    #[default]
    Json,
    Yaml,
}

impl FromStr for ReportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ReportFormat::Json),
            "yaml" | "yml" => Ok(ReportFormat::Yaml),
            other => Err(Error::Config(format!(
                "Unknown report format '{}', expected json or yaml",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportFormat::Json => write!(f, "json"),
            ReportFormat::Yaml => write!(f, "yaml"),
        }
    }
}

/// Produces per-member summaries from a cluster topology source.
pub struct ClusterSummaryReporter {
    topology: Arc<dyn ClusterTopology>,
}

impl ClusterSummaryReporter {
    pub fn new(topology: Arc<dyn ClusterTopology>) -> Self {
        Self { topology }
    }

    /// Fetch both listings and join them.
    #[instrument(skip(self))]
    pub async fn summarize(&self) -> Result<Vec<MemberSnapshot>> {
        let snapshot = self.topology.cluster_snapshot().await?;
        debug!(
            status_members = snapshot.status.len(),
            config_members = snapshot.config.len(),
            "Fetched cluster listings"
        );
        join_members(&snapshot)
    }

    /// Fetch, join and render in one step.
    pub async fn report(&self, format: ReportFormat) -> Result<String> {
        let members = self.summarize().await?;
        render(&members, format)
    }
}

impl std::fmt::Debug for ClusterSummaryReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterSummaryReporter").finish_non_exhaustive()
    }
}

/// Join status and configuration entries by index.
///
/// Fails with `InconsistentTopology` when the listings differ in length or
/// when a configured host does not match the status name at the same index.
pub fn join_members(snapshot: &ClusterSnapshot) -> Result<Vec<MemberSnapshot>> {
    if snapshot.status.len() != snapshot.config.len() {
        return Err(Error::InconsistentTopology(format!(
            "status lists {} members but configuration lists {}",
            snapshot.status.len(),
            snapshot.config.len()
        )));
    }

    snapshot
        .status
        .iter()
        .zip(&snapshot.config)
        .enumerate()
        .map(|(index, (status, config))| {
            if !config.host.is_empty() && config.host != status.name {
                return Err(Error::InconsistentTopology(format!(
                    "member {} is '{}' in status but '{}' in configuration",
                    index, status.name, config.host
                )));
            }
            Ok(MemberSnapshot {
                name: status.name.clone(),
                state_str: status.state_str.clone(),
                health: status.healthy,
                priority: config.priority,
            })
        })
        .collect()
}

/// Render joined members in the requested format.
pub fn render(members: &[MemberSnapshot], format: ReportFormat) -> Result<String> {
    match format {
        ReportFormat::Json => Ok(serde_json::to_string_pretty(members)?),
        ReportFormat::Yaml => Ok(serde_yaml::to_string(members)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{MemberConfig, MemberStatus};
    use crate::domain::TagSet;
    use assert_matches::assert_matches;

    fn status(name: &str, state: &str) -> MemberStatus {
        MemberStatus {
            name: name.to_string(),
            state_str: state.to_string(),
            healthy: true,
        }
    }

    fn config(host: &str, priority: f64) -> MemberConfig {
        MemberConfig {
            host: host.to_string(),
            priority,
            tags: TagSet::new(),
        }
    }

    #[test]
    fn test_join_by_position() {
        let snapshot = ClusterSnapshot {
            status: vec![
                status("mongo1:27017", "PRIMARY"),
                status("mongo2:27017", "SECONDARY"),
            ],
            config: vec![config("mongo1:27017", 2.0), config("mongo2:27017", 1.0)],
        };

        let members = join_members(&snapshot).unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].state_str, "PRIMARY");
        assert_eq!(members[0].priority, 2.0);
        assert_eq!(members[1].name, "mongo2:27017");
    }

    #[test]
    fn test_length_mismatch() {
        let snapshot = ClusterSnapshot {
            status: vec![status("a:1", "PRIMARY"), status("b:1", "SECONDARY")],
            config: vec![config("a:1", 1.0)],
        };
        assert_matches!(
            join_members(&snapshot),
            Err(Error::InconsistentTopology(msg)) if msg.contains("2") && msg.contains("1")
        );
    }

    #[test]
    fn test_host_mismatch() {
        let snapshot = ClusterSnapshot {
            status: vec![status("a:1", "PRIMARY"), status("b:1", "SECONDARY")],
            config: vec![config("b:1", 1.0), config("a:1", 1.0)],
        };
        assert_matches!(
            join_members(&snapshot),
            Err(Error::InconsistentTopology(_))
        );
    }

    #[test]
    fn test_missing_config_host_is_not_checked() {
        let snapshot = ClusterSnapshot {
            status: vec![status("a:1", "PRIMARY")],
            config: vec![config("", 0.5)],
        };
        let members = join_members(&snapshot).unwrap();
        assert_eq!(members[0].priority, 0.5);
    }

    #[test]
    fn test_render_json_uses_camel_case() {
        let members = vec![MemberSnapshot {
            name: "mongo1:27017".into(),
            state_str: "PRIMARY".into(),
            health: true,
            priority: 1.0,
        }];

        let json = render(&members, ReportFormat::Json).unwrap();
        assert!(json.starts_with("[\n  {"));
        assert!(json.contains("\"stateStr\": \"PRIMARY\""));

        let yaml = render(&members, ReportFormat::Yaml).unwrap();
        assert!(yaml.contains("stateStr: PRIMARY"));
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("JSON".parse::<ReportFormat>().unwrap(), ReportFormat::Json);
        assert_eq!("yml".parse::<ReportFormat>().unwrap(), ReportFormat::Yaml);
        assert!("xml".parse::<ReportFormat>().is_err());
    }
}
