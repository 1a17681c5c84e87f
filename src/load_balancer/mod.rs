//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Route loaded from config
//!     → destination.rs (parse each destination)
//!     → pool.rs (own destinations, spawn health checks)
//!     → build() picks the strategy named in config:
//!         - round_robin.rs (rotate through destinations)
//!         - weighted.rs (smooth weighted round-robin)
//!         - ip_hash.rs (client IP affinity)
//!
//! Request arrives
//!     → Balancer::select_alive(client_ip)
//!     → Destination or None (all down)
//! ```
//!
//! # Design Decisions
//! - One trait, three strategies; the pool carries the shared lifecycle
//! - Selection state sits behind one mutex per balancer
//! - Liveness is a relaxed atomic written only by health checks

pub mod destination;
pub mod ip_hash;
pub mod pool;
pub mod round_robin;
pub mod weighted;

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::health::active::HealthChecker;
use crate::load_balancer::destination::Destination;
use crate::load_balancer::ip_hash::IpHash;
use crate::load_balancer::pool::DestinationPool;
use crate::load_balancer::round_robin::RoundRobin;
use crate::load_balancer::weighted::WeightedRoundRobin;

/// Error type for balancer construction.
#[derive(Debug, Error)]
pub enum BalancerError {
    #[error("unknown balancer `{0}`, expected rr, wrr or ih")]
    UnknownKind(String),

    #[error("a balancer needs at least one destination")]
    NoDestinations,
}

/// Balancing strategy, named `rr`, `wrr` or `ih` in config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum BalancerKind {
    RoundRobin,
    WeightedRoundRobin,
    IpHash,
}

impl FromStr for BalancerKind {
    type Err = BalancerError;

    /// An empty name means round-robin.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "rr" => Ok(BalancerKind::RoundRobin),
            "wrr" => Ok(BalancerKind::WeightedRoundRobin),
            "ih" => Ok(BalancerKind::IpHash),
            other => Err(BalancerError::UnknownKind(other.to_string())),
        }
    }
}

impl TryFrom<String> for BalancerKind {
    type Error = BalancerError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        name.parse()
    }
}

impl From<BalancerKind> for String {
    fn from(kind: BalancerKind) -> Self {
        kind.to_string()
    }
}

impl std::fmt::Display for BalancerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BalancerKind::RoundRobin => f.write_str("rr"),
            BalancerKind::WeightedRoundRobin => f.write_str("wrr"),
            BalancerKind::IpHash => f.write_str("ih"),
        }
    }
}

/// A strategy for picking one destination of a route.
pub trait Balancer: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> BalancerKind;

    fn pool(&self) -> &DestinationPool;

    /// Pick regardless of liveness.
    fn select(&self, client_ip: &str) -> Option<Arc<Destination>>;

    /// Pick among alive destinations. None when all are down.
    fn select_alive(&self, client_ip: &str) -> Option<Arc<Destination>>;

    fn first(&self) -> Option<Arc<Destination>> {
        self.pool().dests().first().cloned()
    }

    fn dests(&self) -> &[Arc<Destination>] {
        self.pool().dests()
    }

    /// Stop the health-check tasks. Returns false if already stopped.
    fn stop_health_checks(&self) -> bool {
        self.pool().stop()
    }
}

/// Build a balancer of the given kind and start its health checks.
pub fn build(
    kind: BalancerKind,
    dests: Vec<Destination>,
    checker: Option<&HealthChecker>,
) -> Result<Arc<dyn Balancer>, BalancerError> {
    if dests.is_empty() {
        return Err(BalancerError::NoDestinations);
    }
    let pool = DestinationPool::new(dests, checker);
    let balancer: Arc<dyn Balancer> = match kind {
        BalancerKind::RoundRobin => Arc::new(RoundRobin::new(pool)),
        BalancerKind::WeightedRoundRobin => Arc::new(WeightedRoundRobin::new(pool)),
        BalancerKind::IpHash => Arc::new(IpHash::new(pool)),
    };
    Ok(balancer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::pool::Lifecycle;

    fn dests() -> Vec<Destination> {
        vec![
            Destination::http("http://127.0.0.1:7001", 1).unwrap(),
            Destination::http("http://127.0.0.1:7002", 1).unwrap(),
        ]
    }

    #[test]
    fn kind_names() {
        assert_eq!("".parse::<BalancerKind>().unwrap(), BalancerKind::RoundRobin);
        assert_eq!("rr".parse::<BalancerKind>().unwrap(), BalancerKind::RoundRobin);
        assert_eq!("wrr".parse::<BalancerKind>().unwrap(), BalancerKind::WeightedRoundRobin);
        assert_eq!("ih".parse::<BalancerKind>().unwrap(), BalancerKind::IpHash);
        assert!(matches!("random".parse::<BalancerKind>(), Err(BalancerError::UnknownKind(_))));
        assert_eq!(String::from(BalancerKind::IpHash), "ih");
    }

    #[test]
    fn factory() {
        for kind in [BalancerKind::RoundRobin, BalancerKind::WeightedRoundRobin, BalancerKind::IpHash] {
            assert_eq!(build(kind, dests(), None).unwrap().kind(), kind);
        }
        assert!(matches!(
            build(BalancerKind::RoundRobin, Vec::new(), None),
            Err(BalancerError::NoDestinations)
        ));
    }

    #[test]
    fn first_and_stop() {
        let lb = build(BalancerKind::IpHash, dests(), None).unwrap();
        assert_eq!(lb.first().unwrap().url, "http://127.0.0.1:7001");
        assert_eq!(lb.dests().len(), 2);
        assert!(lb.stop_health_checks());
        assert!(!lb.stop_health_checks());
        assert_eq!(lb.pool().lifecycle(), Lifecycle::Stopped);
    }
}
