//! Background loops that run cluster health checks on an interval.
//!
//! The `HealthMonitor` spawns one background task per cluster that runs a
//! full health-check run, waits for the configured interval, and repeats
//! until stopped. Runs for the same cluster never overlap.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use edgewatch_state::ClusterId;

use crate::checker::Prober;
use crate::executor::HealthCheckExecutor;

/// Per-cluster monitor state.
struct MonitorSlot {
    /// Handle to the background run loop.
    handle: JoinHandle<()>,
    /// Shutdown signal for this monitor.
    shutdown_tx: watch::Sender<bool>,
}

/// Manages periodic health-check runs for a set of clusters.
pub struct HealthMonitor<P> {
    executor: Arc<HealthCheckExecutor<P>>,
    /// Active monitors: cluster_id → slot.
    monitors: Arc<RwLock<HashMap<ClusterId, MonitorSlot>>>,
}

impl<P: Prober> HealthMonitor<P> {
    pub fn new(executor: Arc<HealthCheckExecutor<P>>) -> Self {
        Self {
            executor,
            monitors: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start checking a cluster every `interval`, beginning immediately.
    ///
    /// Replaces any monitor already running for the cluster.
    pub async fn start_monitor(&self, cluster_id: ClusterId, interval: Duration) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let executor = self.executor.clone();

        let handle = tokio::spawn(async move {
            run_check_loop(cluster_id, interval, executor, shutdown_rx).await;
        });

        let mut monitors = self.monitors.write().await;
        if let Some(old) = monitors.insert(
            cluster_id,
            MonitorSlot {
                handle,
                shutdown_tx,
            },
        ) {
            let _ = old.shutdown_tx.send(true);
            old.handle.abort();
        }

        info!(cluster_id, interval_secs = interval.as_secs(), "health monitor started");
    }

    /// Stop monitoring a cluster.
    pub async fn stop_monitor(&self, cluster_id: ClusterId) {
        let mut monitors = self.monitors.write().await;
        if let Some(slot) = monitors.remove(&cluster_id) {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            info!(cluster_id, "health monitor stopped");
        }
    }

    /// Stop all monitors (for graceful shutdown).
    pub async fn stop_all(&self) {
        let mut monitors = self.monitors.write().await;
        for (cluster_id, slot) in monitors.drain() {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            debug!(cluster_id, "health monitor stopped");
        }
        info!("all health monitors stopped");
    }

    /// Cluster ids with an active monitor, in ascending order.
    pub async fn active_monitors(&self) -> Vec<ClusterId> {
        let monitors = self.monitors.read().await;
        let mut ids: Vec<ClusterId> = monitors.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub async fn is_monitoring(&self, cluster_id: ClusterId) -> bool {
        let monitors = self.monitors.read().await;
        monitors.contains_key(&cluster_id)
    }
}

/// The run loop for a single cluster.
async fn run_check_loop<P: Prober>(
    cluster_id: ClusterId,
    interval: Duration,
    executor: Arc<HealthCheckExecutor<P>>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(cluster_id, "health loop starting");

    loop {
        tokio::select! {
            result = executor.run_cluster(cluster_id) => {
                if let Err(e) = result {
                    warn!(cluster_id, error = %e, "health check run aborted");
                }
            }
            _ = shutdown.changed() => break,
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => break,
        }
    }

    debug!(cluster_id, "health loop shutting down");
}
