//! edgewatch-state: embedded state store for EdgeWatch.
//!
//! Backed by [redb](https://docs.rs/redb), holds the fleet model the health
//! subsystem reads and writes: clusters with their health-check policies,
//! nodes, node addresses with their hysteresis counters, and the downstream
//! records produced on state transitions (notifications, DNS tasks, backup
//! address assignments).
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Numeric ids are stored as zero-padded keys so table iteration follows id
//! order. DNS tasks use the composite key `{node_id}:{task_type}`, which makes
//! re-enqueueing the same task an idempotent upsert.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
