//! edgewatch-health: health checking and state propagation for edge nodes.
//!
//! Probes every enabled node of a cluster over HTTP(S), turns the outcomes
//! into up/down state with a hysteresis state machine, and reports confirmed
//! changes to notifications, DNS and backup-address thresholds.
//!
//! # Architecture
//!
//! ```text
//! HealthMonitor (one background loop per cluster)
//!   └── HealthCheckExecutor::run_cluster()
//!       ├── resolve_targets()      FleetDirectory → (node, address) list
//!       ├── worker pool (JoinSet)  shared queue, min(pool, targets) workers
//!       │   ├── retry::attempt()   Prober × max_attempts, delay between
//!       │   └── HealthLedger       HealthTracker applied in one write
//!       └── PropagationPipeline    on transition only
//!           ├── NotificationHandler
//!           ├── DnsTaskHandler
//!           └── ThresholdHandler
//! ```
//!
//! # Hysteresis
//!
//! An address goes up after `count_up` consecutive passing runs and, when
//! `auto_down` is enabled, down after `count_down` consecutive failing runs.
//! Counters persist across runs and restarts. A node without an eligible
//! address is reported as failed but never touches the counters.

pub mod checker;
pub mod error;
pub mod executor;
pub mod monitor;
pub mod policy;
pub mod propagation;
pub mod resolver;
pub mod retry;
pub mod tracker;

#[cfg(test)]
mod test_support;

pub use checker::{HttpProber, ProbeOutcome, Prober};
pub use error::{HealthError, HealthResult, PropagationError, PropagationResult};
pub use executor::{DEFAULT_POOL_SIZE, HealthCheckExecutor, HealthCheckResult};
pub use monitor::HealthMonitor;
pub use policy::EffectivePolicy;
pub use propagation::{PropagationPipeline, StateTransitionEvent, TransitionHandler};
pub use resolver::{FleetDirectory, Target, resolve_targets};
pub use retry::ProbeResult;
pub use tracker::{HealthLedger, HealthTracker, Transition};
