//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     One task per destination, own interval
//!     → Check (HTTP GET or TCP connect)
//!     → Destination::set_alive
//!
//! Broadcast (broadcast.rs):
//!     Periodic timer
//!     → Gateway::health() snapshot
//!     → Bounded channel per subscriber
//! ```
//!
//! # Design Decisions
//! - No thresholds: one check decides liveness until the next check
//! - Health state is per-destination, written only by its own task
//! - Tasks belong to their balancer's pool and die with it

pub mod active;
pub mod broadcast;

use std::collections::BTreeMap;

/// `domain → destination url → alive`.
pub type HealthSnapshot = BTreeMap<String, BTreeMap<String, bool>>;

pub use active::HealthChecker;
pub use broadcast::HealthBroadcaster;
