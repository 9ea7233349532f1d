//! edgewatch.toml configuration parser.

use std::path::{Path, PathBuf};

use anyhow::bail;
use serde::{Deserialize, Serialize};

use edgewatch_state::{ClusterId, TrackingMode};

pub const DEFAULT_DATA_DIR: &str = "edgewatch-data";
pub const DEFAULT_WORKER_POOL_SIZE: usize = 128;
pub const DEFAULT_INTERVAL_SECS: u64 = 60;

const DB_FILE: &str = "edgewatch.redb";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EdgeWatchConfig {
    /// Directory holding the state database.
    pub data_dir: PathBuf,
    /// Concurrent probe workers per run.
    pub worker_pool_size: usize,
    pub tracking_mode: TrackingMode,
    /// Clusters checked periodically by `edgewatchd run`.
    pub monitors: Vec<MonitorConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitorConfig {
    pub cluster_id: ClusterId,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_interval_secs() -> u64 {
    DEFAULT_INTERVAL_SECS
}

impl Default for EdgeWatchConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            tracking_mode: TrackingMode::default(),
            monitors: Vec::new(),
        }
    }
}

impl EdgeWatchConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EdgeWatchConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.worker_pool_size == 0 {
            bail!("worker_pool_size must be at least 1");
        }
        let mut seen = Vec::with_capacity(self.monitors.len());
        for monitor in &self.monitors {
            if monitor.interval_secs == 0 {
                bail!(
                    "monitor for cluster {} has a zero interval",
                    monitor.cluster_id
                );
            }
            if seen.contains(&monitor.cluster_id) {
                bail!("cluster {} is monitored twice", monitor.cluster_id);
            }
            seen.push(monitor.cluster_id);
        }
        Ok(())
    }

    /// Path of the redb database inside `data_dir`.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE)
    }
}
