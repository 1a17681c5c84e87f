//! Round-robin load balancing strategy.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::load_balancer::destination::Destination;
use crate::load_balancer::pool::DestinationPool;
use crate::load_balancer::{Balancer, BalancerKind};

/// Round-robin selector.
/// Stores a cursor to rotate through destinations.
#[derive(Debug)]
pub struct RoundRobin {
    pool: DestinationPool,
    cursor: Mutex<usize>,
}

impl RoundRobin {
    pub fn new(pool: DestinationPool) -> Self {
        Self {
            pool,
            cursor: Mutex::new(0),
        }
    }
}

impl Balancer for RoundRobin {
    fn kind(&self) -> BalancerKind {
        BalancerKind::RoundRobin
    }

    fn pool(&self) -> &DestinationPool {
        &self.pool
    }

    fn select(&self, _client_ip: &str) -> Option<Arc<Destination>> {
        let dests = self.pool.dests();
        if dests.is_empty() {
            return None;
        }

        let mut cursor = self.cursor.lock();
        let dest = &dests[*cursor % dests.len()];
        *cursor = (*cursor + 1) % dests.len();
        Some(Arc::clone(dest))
    }

    fn select_alive(&self, _client_ip: &str) -> Option<Arc<Destination>> {
        let dests = self.pool.dests();
        let len = dests.len();

        let mut cursor = self.cursor.lock();
        for i in 0..len {
            let index = (*cursor + i) % len;
            if dests[index].is_alive() {
                *cursor = (index + 1) % len;
                return Some(Arc::clone(&dests[index]));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balancer(n: u16) -> RoundRobin {
        let dests = (0..n)
            .map(|i| Destination::http(&format!("http://127.0.0.1:{}", 8080 + i), 1).unwrap())
            .collect();
        RoundRobin::new(DestinationPool::new(dests, None))
    }

    #[test]
    fn test_round_robin() {
        let lb = balancer(3);

        let picks: Vec<String> = (0..4)
            .map(|_| lb.select("10.0.0.1").unwrap().url.clone())
            .collect();
        assert_eq!(
            picks,
            [
                "http://127.0.0.1:8080",
                "http://127.0.0.1:8081",
                "http://127.0.0.1:8082",
                "http://127.0.0.1:8080",
            ]
        );
    }

    #[test]
    fn each_alive_destination_once_per_cycle() {
        let lb = balancer(4);
        let mut seen: Vec<String> = (0..4)
            .map(|_| lb.select_alive("10.0.0.1").unwrap().url.clone())
            .collect();
        let first = seen[0].clone();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 4);
        assert_eq!(lb.select_alive("10.0.0.1").unwrap().url, first);
    }

    #[test]
    fn skips_dead_destinations() {
        let lb = balancer(3);
        lb.dests()[1].set_alive(false);

        let picks: Vec<String> = (0..4)
            .map(|_| lb.select_alive("10.0.0.1").unwrap().url.clone())
            .collect();
        assert_eq!(
            picks,
            [
                "http://127.0.0.1:8080",
                "http://127.0.0.1:8082",
                "http://127.0.0.1:8080",
                "http://127.0.0.1:8082",
            ]
        );
    }

    #[test]
    fn none_when_all_dead() {
        let lb = balancer(2);
        for d in lb.dests() {
            d.set_alive(false);
        }
        assert!(lb.select_alive("10.0.0.1").is_none());
        assert!(lb.select("10.0.0.1").is_some());
    }
}
