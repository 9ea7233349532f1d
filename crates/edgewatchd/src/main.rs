//! edgewatchd: the EdgeWatch daemon.
//!
//! Single binary around the health subsystem:
//! - State store (redb)
//! - One-shot cluster checks
//! - Periodic health monitors
//! - Inventory import and DNS task draining
//!
//! # Usage
//!
//! ```text
//! edgewatchd --config /etc/edgewatch/edgewatch.toml run
//! edgewatchd check --cluster 1
//! edgewatchd --data-dir /var/lib/edgewatch config
//! ```

mod inventory;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use edgewatch_core::EdgeWatchConfig;
use edgewatch_health::{HealthCheckExecutor, HealthMonitor, HttpProber};
use edgewatch_state::{ClusterId, StateStore, TrackingMode};

use crate::inventory::Inventory;

const DEFAULT_LOG_FILTER: &str = "info,edgewatchd=debug,edgewatch=debug";

#[derive(Parser)]
#[command(name = "edgewatchd", about = "EdgeWatch edge node health daemon")]
struct Cli {
    /// Configuration file; defaults apply when it does not exist.
    #[arg(long, global = true, default_value = "edgewatch.toml")]
    config: PathBuf,

    /// Data directory for persistent state. Overrides the config file.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one health check over a cluster and print the results as JSON.
    Check {
        #[arg(long)]
        cluster: ClusterId,

        /// Concurrent probe workers. Overrides the config file.
        #[arg(long)]
        pool_size: Option<usize>,

        /// Track health per address or per node. Overrides the config file.
        #[arg(long, value_parser = parse_tracking_mode)]
        tracking_mode: Option<TrackingMode>,
    },

    /// Check every configured cluster on its interval until Ctrl-C.
    Run,

    /// Load clusters, nodes, addresses and thresholds from a JSON file.
    Import {
        #[arg(long)]
        file: PathBuf,
    },

    /// Print pending DNS tasks as JSON and remove them from the queue.
    DnsTasks {
        /// Leave the tasks in the queue.
        #[arg(long)]
        peek: bool,
    },

    /// Print the effective configuration, after defaults and overrides, as TOML.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = EdgeWatchConfig::load_or_default(&cli.config)?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    match cli.command {
        Command::Check {
            cluster,
            pool_size,
            tracking_mode,
        } => {
            if let Some(pool_size) = pool_size {
                config.worker_pool_size = pool_size;
            }
            if let Some(mode) = tracking_mode {
                config.tracking_mode = mode;
            }
            run_check(&config, cluster).await
        }
        Command::Run => run_monitors(&config).await,
        Command::Import { file } => run_import(&config, &file),
        Command::DnsTasks { peek } => run_dns_tasks(&config, peek),
        Command::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    // Logs go to stderr so JSON results on stdout stay machine-readable.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn parse_tracking_mode(value: &str) -> Result<TrackingMode, String> {
    match value {
        "address" => Ok(TrackingMode::Address),
        "node" => Ok(TrackingMode::Node),
        other => Err(format!("unknown tracking mode '{other}', expected 'address' or 'node'")),
    }
}

fn open_store(config: &EdgeWatchConfig) -> anyhow::Result<Arc<StateStore>> {
    std::fs::create_dir_all(&config.data_dir)?;
    let db_path = config.db_path();
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");
    Ok(Arc::new(store))
}

fn build_executor(
    config: &EdgeWatchConfig,
    store: Arc<StateStore>,
) -> anyhow::Result<HealthCheckExecutor<HttpProber>> {
    let prober = Arc::new(HttpProber::new()?);
    Ok(HealthCheckExecutor::for_store(store, prober)
        .with_pool_size(config.worker_pool_size)
        .with_tracking_mode(config.tracking_mode))
}

async fn run_check(config: &EdgeWatchConfig, cluster_id: ClusterId) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let executor = build_executor(config, store)?;

    let mut results = executor.run_cluster(cluster_id).await?;
    results.sort_by_key(|r| r.node_id);
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

async fn run_monitors(config: &EdgeWatchConfig) -> anyhow::Result<()> {
    if config.monitors.is_empty() {
        bail!("no clusters configured under [[monitors]]");
    }
    info!("EdgeWatch daemon starting");

    let store = open_store(config)?;
    let executor = Arc::new(build_executor(config, store.clone())?);
    let monitor = HealthMonitor::new(executor);

    for entry in &config.monitors {
        match store.find_enabled_cluster(entry.cluster_id)? {
            Some(cluster) if cluster.health_check.is_none() => {
                warn!(cluster_id = entry.cluster_id, "cluster has no health check policy yet");
            }
            Some(_) => {}
            None => warn!(cluster_id = entry.cluster_id, "cluster is missing or disabled"),
        }
        monitor
            .start_monitor(entry.cluster_id, Duration::from_secs(entry.interval_secs))
            .await;
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    monitor.stop_all().await;

    info!("EdgeWatch daemon stopped");
    Ok(())
}

fn run_import(config: &EdgeWatchConfig, file: &Path) -> anyhow::Result<()> {
    let inventory = Inventory::from_file(file)?;
    let store = open_store(config)?;
    let summary = inventory.load_into(&store)?;
    info!(
        clusters = summary.clusters,
        nodes = summary.nodes,
        addresses = summary.addresses,
        thresholds = summary.thresholds,
        "inventory imported"
    );
    Ok(())
}

fn run_dns_tasks(config: &EdgeWatchConfig, peek: bool) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let tasks = if peek {
        store.list_dns_tasks()?
    } else {
        store.take_dns_tasks()?
    };
    println!("{}", serde_json::to_string_pretty(&tasks)?);
    Ok(())
}
