//! Replica Counter
//!
//! Maintains a shared counter on a replicated document store and observes it
//! under configurable read preferences.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Replica Counter                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │  Scheduler   │───▶│   Counter    │───▶│   Counter    │       │
//! │  │   (Clock)    │    │   Service    │    │    Store     │       │
//! │  └──────────────┘    └──────┬───────┘    └──────────────┘       │
//! │                             ▼                                    │
//! │                   Logging │ Prometheus                           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use replica_counter::adapters::{
    CompositeEventPublisher, LoggingEventPublisher, MemoryStoreConfig, PrometheusEventPublisher,
    ReplicatedMemoryStore,
};
use replica_counter::domain::{ClusterTopology, CounterStore};
use replica_counter::server::{self, HttpState};
use replica_counter::{
    AppConfig, ClusterSummaryReporter, CounterService, Credentials, ReaderConfig, ReportFormat,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Replica Counter - shared counter with tunable read consistency
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file; flags and env vars override its values
    #[arg(long, short, env = "COUNTER_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Seed endpoints (host:port), comma separated
    #[arg(long, env = "COUNTER_SEED_ENDPOINTS", value_delimiter = ',', global = true)]
    seed_endpoints: Vec<String>,

    /// Replica set name
    #[arg(long, env = "COUNTER_REPLICA_SET", global = true)]
    replica_set_id: Option<String>,

    /// Database holding the counter collection
    #[arg(long, env = "COUNTER_DATABASE", global = true)]
    database_name: Option<String>,

    /// Collection holding the counter record
    #[arg(long, env = "COUNTER_COLLECTION", global = true)]
    collection_name: Option<String>,

    /// Backend call timeout in milliseconds
    #[arg(long, env = "COUNTER_BACKEND_TIMEOUT_MS", global = true)]
    backend_timeout_ms: Option<u64>,

    /// Store backend
    #[arg(long, env = "COUNTER_BACKEND", value_enum, default_value_t = Backend::Mongo, global = true)]
    backend: Backend,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the writer and readers until interrupted
    Run {
        /// Counter record key
        #[arg(long, env = "COUNTER_KEY")]
        counter_key: Option<String>,

        /// Writer interval in milliseconds
        #[arg(long, env = "COUNTER_WRITER_INTERVAL_MS")]
        writer_interval_ms: Option<u64>,

        /// Reader as <target>@<interval_ms>; repeat for several readers
        #[arg(long = "reader")]
        readers: Vec<ReaderConfig>,

        /// Drain grace period on shutdown in milliseconds
        #[arg(long, env = "COUNTER_SHUTDOWN_GRACE_MS")]
        shutdown_grace_ms: Option<u64>,

        /// Metrics and health server bind address
        #[arg(long, env = "METRICS_ADDR")]
        metrics_addr: Option<String>,

        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[arg(long)]
        duration_secs: Option<u64>,
    },

    /// Print each member's state, health and priority
    ClusterSummary {
        /// Output format (json, yaml)
        #[arg(long, default_value = "json")]
        format: ReportFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// MongoDB replica set
    Mongo,
    /// In-process simulated replica set
    Memory,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    let mut config = match &args.config {
        Some(path) => AppConfig::from_yaml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => AppConfig::default(),
    };
    apply_overrides(&mut config, &args);
    config.validate().context("invalid configuration")?;

    let credentials = Credentials::new(
        std::env::var("COUNTER_DB_USERNAME").ok(),
        std::env::var("COUNTER_DB_PASSWORD").ok(),
    );

    let (store, topology) = open_store(args.backend, &config, &credentials).await?;

    match args.command {
        Command::Run {
            metrics_addr,
            duration_secs,
            ..
        } => run(config, store, metrics_addr, duration_secs).await,
        Command::ClusterSummary { format } => {
            let reporter = ClusterSummaryReporter::new(topology);
            let report = reporter
                .report(format)
                .await
                .context("building cluster summary")?;
            println!("{}", report);
            Ok(())
        }
    }
}

fn apply_overrides(config: &mut AppConfig, args: &Args) {
    if !args.seed_endpoints.is_empty() {
        config.seed_endpoints = args.seed_endpoints.clone();
    }
    if let Some(v) = &args.replica_set_id {
        config.replica_set_id = v.clone();
    }
    if let Some(v) = &args.database_name {
        config.database_name = v.clone();
    }
    if let Some(v) = &args.collection_name {
        config.collection_name = v.clone();
    }
    if let Some(v) = args.backend_timeout_ms {
        config.backend_timeout_ms = v;
    }

    if let Command::Run {
        counter_key,
        writer_interval_ms,
        readers,
        shutdown_grace_ms,
        ..
    } = &args.command
    {
        if let Some(v) = counter_key {
            config.counter_key = v.clone();
        }
        if let Some(v) = writer_interval_ms {
            config.writer_interval_ms = *v;
        }
        if !readers.is_empty() {
            config.reader_configs = readers.clone();
        }
        if let Some(v) = shutdown_grace_ms {
            config.shutdown_grace_ms = *v;
        }
    }
}

async fn open_store(
    backend: Backend,
    config: &AppConfig,
    credentials: &Credentials,
) -> anyhow::Result<(Arc<dyn CounterStore>, Arc<dyn ClusterTopology>)> {
    match backend {
        Backend::Memory => {
            let store = Arc::new(ReplicatedMemoryStore::three_member(MemoryStoreConfig {
                seed_retries: config.seed_retries,
                seed_retry_backoff: config.seed_retry_backoff(),
                ..Default::default()
            }));
            let counter: Arc<dyn CounterStore> = store.clone();
            let topology: Arc<dyn ClusterTopology> = store;
            Ok((counter, topology))
        }
        #[cfg(feature = "mongodb")]
        Backend::Mongo => {
            let store = Arc::new(
                replica_counter::adapters::MongoCounterStore::connect(config, credentials)
                    .await
                    .context("configuring MongoDB client")?,
            );
            let counter: Arc<dyn CounterStore> = store.clone();
            let topology: Arc<dyn ClusterTopology> = store;
            Ok((counter, topology))
        }
        #[cfg(not(feature = "mongodb"))]
        Backend::Mongo => {
            let _ = (config, credentials);
            anyhow::bail!("built without the `mongodb` feature; use --backend memory")
        }
    }
}

async fn run(
    config: AppConfig,
    store: Arc<dyn CounterStore>,
    metrics_addr: Option<String>,
    duration_secs: Option<u64>,
) -> anyhow::Result<()> {
    info!("Starting Replica Counter");
    info!("  Backend: {}", store.describe());
    info!("  Counter key: {}", config.counter_key);
    info!("  Writer interval: {}ms", config.writer_interval_ms);
    for reader in &config.reader_configs {
        info!("  Reader: {}", reader);
    }

    let metrics = PrometheusEventPublisher::new()?;
    let publisher = CompositeEventPublisher::new()
        .with_publisher(LoggingEventPublisher::info_level())
        .with_publisher(metrics.clone());

    let service = Arc::new(CounterService::new(config, store, Arc::new(publisher))?);
    service.start().await.context("starting counter service")?;

    let cancel = CancellationToken::new();
    let server = match metrics_addr {
        Some(addr) => {
            let listener = server::bind(&addr).await?;
            let state = Arc::new(HttpState {
                service: Arc::clone(&service),
                metrics,
            });
            let cancel = cancel.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = server::serve(listener, state, cancel).await {
                    error!("Metrics server error: {}", e);
                }
            }))
        }
        None => None,
    };

    match duration_secs {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => {
            tokio::signal::ctrl_c()
                .await
                .context("listening for Ctrl-C")?;
            info!("Interrupt received");
        }
    }

    let report = service.stop().await?;
    if !report.is_clean() {
        warn!(abandoned = ?report.abandoned, "Some ticks were abandoned");
    }

    cancel.cancel();
    if let Some(server) = server {
        if let Err(e) = server.await {
            error!("Metrics server task failed: {}", e);
        }
    }

    info!("Replica Counter shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?)
        .add_directive("mongodb=warn".parse()?);

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
    Ok(())
}
