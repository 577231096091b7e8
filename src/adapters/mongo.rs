//! MongoDB Store Adapter
//!
//! Implements the `CounterStore` and `ClusterTopology` ports against a
//! MongoDB replica set using the official driver. Replica discovery,
//! server selection and connection pooling are left to the driver; this
//! adapter maps read targets to read preferences and driver errors to the
//! crate's error kinds.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use mongodb::bson::{doc, Bson, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{
    ClientOptions, Credential, ReadPreference, ReadPreferenceOptions, SelectionCriteria,
};
use mongodb::{Client, Collection};
use serde::Deserialize;
use tracing::{debug, info, instrument};

use super::seed_retry::seed_with_retry;
use crate::config::{AppConfig, Credentials};
use crate::domain::ports::{
    ClusterSnapshot, ClusterTopology, CounterStore, MemberConfig, MemberStatus, ReadTarget,
};
use crate::error::{Error, Result};

const DUPLICATE_KEY: i32 = 11000;
const APP_NAME: &str = "replica-counter";

/// Counter store backed by a MongoDB replica set.
#[derive(Clone)]
pub struct MongoCounterStore {
    client: Client,
    collection: Collection<Document>,
    replica_set_id: String,
    endpoints: String,
    seed_retries: u32,
    seed_retry_backoff: Duration,
}

impl MongoCounterStore {
    /// Build a client for the configured replica set.
    ///
    /// No round-trip happens here; the driver connects lazily and the first
    /// operation surfaces connectivity problems.
    pub async fn connect(config: &AppConfig, credentials: &Credentials) -> Result<Self> {
        config.validate()?;

        let uri = config.connection_uri();
        let mut options = ClientOptions::parse(uri.as_str()).await?;
        options.app_name = Some(APP_NAME.to_string());
        options.server_selection_timeout = Some(config.backend_timeout());
        options.connect_timeout = Some(config.backend_timeout());
        if credentials.is_set() {
            options.credential = Some(
                Credential::builder()
                    .username(credentials.username.clone())
                    .password(credentials.password.clone())
                    .source(Some(config.auth_source.clone()))
                    .build(),
            );
        }

        let client = Client::with_options(options)?;
        let collection = client
            .database(&config.database_name)
            .collection::<Document>(&config.collection_name);

        info!(
            replica_set = %config.replica_set_id,
            endpoints = %config.seed_endpoints.join(","),
            database = %config.database_name,
            collection = %config.collection_name,
            authenticated = credentials.is_set(),
            "MongoDB client configured"
        );

        Ok(Self {
            client,
            collection,
            replica_set_id: config.replica_set_id.clone(),
            endpoints: config.seed_endpoints.join(","),
            seed_retries: config.seed_retries,
            seed_retry_backoff: config.seed_retry_backoff(),
        })
    }

    async fn seed_once(&self, key: &str, initial: i64) -> Result<()> {
        let result = self
            .collection
            .update_one(
                doc! { "_id": key },
                doc! { "$setOnInsert": { "value": initial } },
            )
            .upsert(true)
            .await;

        match result {
            Ok(outcome) => {
                if outcome.upserted_id.is_some() {
                    info!(key, initial, "Counter record inserted");
                } else {
                    debug!(key, "Counter record already present");
                }
                Ok(())
            }
            // Lost an upsert race against another seeder: the record exists.
            Err(e) if is_duplicate_key(&e) => {
                debug!(key, "Concurrent seed detected, record exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn admin_command<T: for<'de> Deserialize<'de>>(&self, command: Document) -> Result<T> {
        let reply = self.client.database("admin").run_command(command).await?;
        mongodb::bson::from_document(reply)
            .map_err(|e| Error::Serialization(format!("Unexpected admin reply: {}", e)))
    }
}

impl std::fmt::Debug for MongoCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoCounterStore")
            .field("replica_set_id", &self.replica_set_id)
            .field("endpoints", &self.endpoints)
            .field("collection", &self.collection.namespace().to_string())
            .finish()
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(e)) => e.code == DUPLICATE_KEY,
        ErrorKind::Command(e) => e.code == DUPLICATE_KEY,
        _ => false,
    }
}

/// Map a read target to the driver's selection criteria.
fn selection_criteria(target: &ReadTarget) -> SelectionCriteria {
    let preference = match target {
        ReadTarget::Primary => ReadPreference::Primary,
        ReadTarget::PrimaryPreferred => ReadPreference::PrimaryPreferred { options: None },
        ReadTarget::SecondaryPreferred => ReadPreference::SecondaryPreferred { options: None },
        ReadTarget::Secondary { tags: None } => ReadPreference::Secondary { options: None },
        ReadTarget::Secondary { tags: Some(tags) } => {
            let tag_set: HashMap<String, String> = tags.clone().into_iter().collect();
            ReadPreference::Secondary {
                options: Some(
                    ReadPreferenceOptions::builder()
                        .tag_sets(vec![tag_set])
                        .build(),
                ),
            }
        }
    };
    SelectionCriteria::ReadPreference(preference)
}

fn counter_value(key: &str, document: &Document) -> Result<i64> {
    match document.get("value") {
        Some(Bson::Int32(v)) => Ok(i64::from(*v)),
        Some(Bson::Int64(v)) => Ok(*v),
        Some(Bson::Double(v)) => Ok(*v as i64),
        Some(other) => Err(Error::Backend(format!(
            "Counter '{}' holds a non-numeric value: {}",
            key, other
        ))),
        None => Err(Error::Backend(format!(
            "Counter '{}' has no value field",
            key
        ))),
    }
}

// =============================================================================
// Admin Command Replies
// =============================================================================

#[derive(Debug, Deserialize)]
struct ReplSetStatusReply {
    members: Vec<StatusMember>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusMember {
    name: String,
    state_str: String,
    health: f64,
}

#[derive(Debug, Deserialize)]
struct ReplSetConfigReply {
    config: ReplSetConfig,
}

#[derive(Debug, Deserialize)]
struct ReplSetConfig {
    members: Vec<ConfigMember>,
}

#[derive(Debug, Deserialize)]
struct ConfigMember {
    host: String,
    #[serde(default = "default_priority")]
    priority: f64,
    #[serde(default)]
    tags: BTreeMap<String, String>,
}

fn default_priority() -> f64 {
    1.0
}

// =============================================================================
// Port Implementations
// =============================================================================

#[async_trait]
impl ClusterTopology for MongoCounterStore {
    #[instrument(skip(self), fields(replica_set = %self.replica_set_id))]
    async fn cluster_snapshot(&self) -> Result<ClusterSnapshot> {
        let status: ReplSetStatusReply = self.admin_command(doc! { "replSetGetStatus": 1 }).await?;
        let config: ReplSetConfigReply = self.admin_command(doc! { "replSetGetConfig": 1 }).await?;

        Ok(ClusterSnapshot {
            status: status
                .members
                .into_iter()
                .map(|m| MemberStatus {
                    name: m.name,
                    state_str: m.state_str,
                    healthy: m.health >= 1.0,
                })
                .collect(),
            config: config
                .config
                .members
                .into_iter()
                .map(|m| MemberConfig {
                    host: m.host,
                    priority: m.priority,
                    tags: m.tags,
                })
                .collect(),
        })
    }
}

#[async_trait]
impl CounterStore for MongoCounterStore {
    #[instrument(skip(self))]
    async fn ensure_seed(&self, key: &str, initial: i64) -> Result<()> {
        seed_with_retry(key, self.seed_retries, self.seed_retry_backoff, || {
            self.seed_once(key, initial)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn increment(&self, key: &str, delta: i64) -> Result<()> {
        let outcome = self
            .collection
            .update_one(doc! { "_id": key }, doc! { "$inc": { "value": delta } })
            .await?;

        if outcome.matched_count == 0 {
            return Err(Error::NotFound {
                key: key.to_string(),
            });
        }
        Ok(())
    }

    #[instrument(skip(self), fields(target = %target))]
    async fn read(&self, key: &str, target: &ReadTarget) -> Result<Option<i64>> {
        let document = self
            .collection
            .find_one(doc! { "_id": key })
            .selection_criteria(selection_criteria(target))
            .await?;

        document.map(|d| counter_value(key, &d)).transpose()
    }

    fn describe(&self) -> String {
        format!(
            "MongoDB replica set '{}' ({}) collection {}",
            self.replica_set_id,
            self.endpoints,
            self.collection.namespace()
        )
    }
}
