//! Configuration
//!
//! The recognized options of the counter service. Values come from an
//! optional YAML file (camelCase keys) and are then overridden by CLI flags
//! or environment variables in `main`. Credentials are never part of this
//! struct; they are read from the environment only.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::ReadTarget;
use crate::error::{Error, Result};

// =============================================================================
// Reader Configuration
// =============================================================================

/// One reader task: which replicas to ask, and how often.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReaderConfig {
    /// Interval between reads in milliseconds
    pub interval_ms: u64,

    /// Read target for this reader
    pub target: ReadTarget,
}

impl ReaderConfig {
    pub fn new(target: ReadTarget, interval: Duration) -> Self {
        Self {
            interval_ms: interval.as_millis() as u64,
            target,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Parses `<target>@<interval_ms>`, e.g. `secondary:role=analytics@1000`.
impl FromStr for ReaderConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (target, interval) = s.rsplit_once('@').ok_or_else(|| {
            Error::Config(format!(
                "Invalid reader '{}', expected <target>@<interval_ms>",
                s
            ))
        })?;

        let interval_ms = interval.trim().parse::<u64>().map_err(|e| {
            Error::Config(format!("Invalid reader interval '{}': {}", interval, e))
        })?;

        Ok(Self {
            interval_ms,
            target: target.parse()?,
        })
    }
}

impl std::fmt::Display for ReaderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.target, self.interval_ms)
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Full configuration surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    /// Initially-known replica addresses (`host:port`)
    pub seed_endpoints: Vec<String>,

    /// Replica set name used for topology discovery
    pub replica_set_id: String,

    /// Database holding the counter collection
    pub database_name: String,

    /// Collection holding the counter record
    pub collection_name: String,

    /// Key (`_id`) of the counter record
    pub counter_key: String,

    /// Value written when the record is first created
    pub initial_value: i64,

    /// Writer tick interval in milliseconds
    pub writer_interval_ms: u64,

    /// Reader tasks, one per entry
    pub reader_configs: Vec<ReaderConfig>,

    /// Bound on every backend call in milliseconds
    pub backend_timeout_ms: u64,

    /// How long `stop` waits for in-flight ticks
    pub shutdown_grace_ms: u64,

    /// Extra attempts for the seed insert before giving up
    pub seed_retries: u32,

    /// Delay between seed attempts in milliseconds
    pub seed_retry_backoff_ms: u64,

    /// Authentication database
    pub auth_source: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            seed_endpoints: vec!["localhost:27017".to_string()],
            replica_set_id: "rs0".to_string(),
            database_name: "test".to_string(),
            collection_name: "counter".to_string(),
            counter_key: "counter".to_string(),
            initial_value: 0,
            writer_interval_ms: 1000,
            reader_configs: vec![ReaderConfig {
                interval_ms: 1000,
                target: ReadTarget::PrimaryPreferred,
            }],
            backend_timeout_ms: 5000,
            shutdown_grace_ms: 5000,
            seed_retries: 3,
            seed_retry_backoff_ms: 500,
            auth_source: "admin".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file; missing keys take defaults.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&raw)
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let config: AppConfig = serde_yaml::from_str(raw)
            .map_err(|e| Error::Config(format!("Invalid configuration: {}", e)))?;
        Ok(config)
    }

    /// Check the configuration for values the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.seed_endpoints.is_empty() {
            return Err(Error::Config("At least one seed endpoint is required".into()));
        }
        if let Some(bad) = self.seed_endpoints.iter().find(|e| e.trim().is_empty()) {
            return Err(Error::Config(format!("Empty seed endpoint '{}'", bad)));
        }
        if self.replica_set_id.trim().is_empty() {
            return Err(Error::Config("replicaSetId must not be empty".into()));
        }
        if self.database_name.trim().is_empty() || self.collection_name.trim().is_empty() {
            return Err(Error::Config(
                "databaseName and collectionName must not be empty".into(),
            ));
        }
        if self.counter_key.is_empty() {
            return Err(Error::Config("counterKey must not be empty".into()));
        }
        if self.writer_interval_ms == 0 {
            return Err(Error::Config("writerIntervalMs must be positive".into()));
        }
        if let Some(reader) = self.reader_configs.iter().find(|r| r.interval_ms == 0) {
            return Err(Error::Config(format!(
                "Reader '{}' has a zero interval",
                reader
            )));
        }
        if self.backend_timeout_ms == 0 {
            return Err(Error::Config("backendTimeoutMs must be positive".into()));
        }
        Ok(())
    }

    pub fn writer_interval(&self) -> Duration {
        Duration::from_millis(self.writer_interval_ms)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn seed_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.seed_retry_backoff_ms)
    }

    /// Outer bound on one scheduled backend call.
    ///
    /// Sits above `backend_timeout`, which the driver uses for server
    /// selection, so a target no member satisfies surfaces as a connection
    /// error rather than racing the outer timer.
    pub fn operation_deadline(&self) -> Duration {
        let timeout = self.backend_timeout();
        timeout.saturating_add(timeout / 2)
    }

    /// Outer bound on seeding: every attempt plus the backoff between them.
    pub fn seed_deadline(&self) -> Duration {
        let attempts = self.seed_retries.saturating_add(1);
        self.operation_deadline()
            .saturating_mul(attempts)
            .saturating_add(self.seed_retry_backoff().saturating_mul(self.seed_retries))
    }

    /// Connection string without credentials.
    pub fn connection_uri(&self) -> String {
        format!(
            "mongodb://{}/?replicaSet={}&authSource={}",
            self.seed_endpoints.join(","),
            self.replica_set_id,
            self.auth_source
        )
    }
}

/// Credentials supplied through the environment.
#[derive(Clone, Default)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(username: Option<String>, password: Option<String>) -> Self {
        Self { username, password }
    }

    pub fn is_set(&self) -> bool {
        self.username.is_some()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.writer_interval(), Duration::from_secs(1));
        assert_eq!(config.reader_configs.len(), 1);
    }

    #[test]
    fn test_yaml_config() {
        let yaml = r#"
seedEndpoints:
  - mongo1:27017
  - mongo2:27017
  - mongo3:27017
replicaSetId: mongodb-repl-set
writerIntervalMs: 1000
readerConfigs:
  - intervalMs: 500
    target: primaryPreferred
  - intervalMs: 1000
    target: "secondary:role=analytics"
backendTimeoutMs: 2000
"#;
        let config = AppConfig::from_yaml_str(yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.seed_endpoints.len(), 3);
        assert_eq!(config.replica_set_id, "mongodb-repl-set");
        assert_eq!(config.database_name, "test");
        assert_eq!(config.reader_configs[0].target, ReadTarget::PrimaryPreferred);
        assert_eq!(
            config.reader_configs[1].target,
            ReadTarget::tagged_secondary([("role", "analytics")])
        );
        assert_eq!(config.backend_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_yaml_rejects_unknown_target() {
        let yaml = "readerConfigs:\n  - intervalMs: 500\n    target: nearest\n";
        assert_matches!(AppConfig::from_yaml_str(yaml), Err(Error::Config(_)));
    }

    #[test]
    fn test_validation_failures() {
        let mut config = AppConfig::default();
        config.seed_endpoints.clear();
        assert_matches!(config.validate(), Err(Error::Config(_)));

        let mut config = AppConfig::default();
        config.writer_interval_ms = 0;
        assert_matches!(config.validate(), Err(Error::Config(_)));

        let mut config = AppConfig::default();
        config.reader_configs.push(ReaderConfig {
            interval_ms: 0,
            target: ReadTarget::Primary,
        });
        assert_matches!(config.validate(), Err(Error::Config(msg)) if msg.contains("primary@0"));
    }

    #[test]
    fn test_reader_config_from_str() {
        let reader: ReaderConfig = "secondary:role=analytics@1000".parse().unwrap();
        assert_eq!(reader.interval(), Duration::from_secs(1));
        assert_eq!(
            reader.target,
            ReadTarget::tagged_secondary([("role", "analytics")])
        );
        assert_eq!(reader.to_string(), "secondary:role=analytics@1000");

        assert!("primary".parse::<ReaderConfig>().is_err());
        assert!("primary@soon".parse::<ReaderConfig>().is_err());
    }

    #[test]
    fn test_connection_uri_has_no_credentials() {
        let config = AppConfig {
            seed_endpoints: vec!["mongo1:27017".into(), "mongo2:27017".into()],
            replica_set_id: "mongodb-repl-set".into(),
            ..Default::default()
        };
        assert_eq!(
            config.connection_uri(),
            "mongodb://mongo1:27017,mongo2:27017/?replicaSet=mongodb-repl-set&authSource=admin"
        );
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::new(Some("billy".into()), Some("fish".into()));
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("billy"));
        assert!(!rendered.contains("fish"));
        assert!(creds.is_set());
    }

    #[test]
    fn test_deadlines_cover_backend_timeouts() {
        let config = AppConfig {
            backend_timeout_ms: 300,
            seed_retries: 3,
            seed_retry_backoff_ms: 50,
            ..Default::default()
        };
        assert_eq!(config.operation_deadline(), Duration::from_millis(450));
        assert!(config.operation_deadline() > config.backend_timeout());
        // 4 attempts at 450ms plus 3 backoffs of 50ms
        assert_eq!(config.seed_deadline(), Duration::from_millis(1950));
    }
}
