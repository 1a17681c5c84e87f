//! Smooth weighted round-robin.
//!
//! Every pick adds each candidate's weight to its running score, takes the
//! highest score (first on ties) and subtracts the total weight from the
//! winner. Weights 3/2/1 yield `A B A C B A`.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::load_balancer::destination::Destination;
use crate::load_balancer::pool::DestinationPool;
use crate::load_balancer::{Balancer, BalancerKind};

#[derive(Debug)]
pub struct WeightedRoundRobin {
    pool: DestinationPool,
    /// Running score per destination, same order as the pool.
    current: Mutex<Vec<i64>>,
}

impl WeightedRoundRobin {
    pub fn new(pool: DestinationPool) -> Self {
        let current = Mutex::new(vec![0; pool.len()]);
        Self { pool, current }
    }

    fn pick(&self, alive_only: bool) -> Option<Arc<Destination>> {
        let dests = self.pool.dests();
        let mut current = self.current.lock();

        let mut total = 0i64;
        let mut best: Option<usize> = None;
        for (i, dest) in dests.iter().enumerate() {
            if alive_only && !dest.is_alive() {
                continue;
            }
            let weight = i64::from(dest.weight.max(1));
            current[i] += weight;
            total += weight;
            if best.map_or(true, |b| current[i] > current[b]) {
                best = Some(i);
            }
        }

        let best = best?;
        current[best] -= total;
        Some(Arc::clone(&dests[best]))
    }
}

impl Balancer for WeightedRoundRobin {
    fn kind(&self) -> BalancerKind {
        BalancerKind::WeightedRoundRobin
    }

    fn pool(&self) -> &DestinationPool {
        &self.pool
    }

    fn select(&self, _client_ip: &str) -> Option<Arc<Destination>> {
        self.pick(false)
    }

    fn select_alive(&self, _client_ip: &str) -> Option<Arc<Destination>> {
        self.pick(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balancer(weights: &[u32]) -> WeightedRoundRobin {
        let dests = weights
            .iter()
            .enumerate()
            .map(|(i, w)| Destination::http(&format!("http://backend-{}.internal", i), *w).unwrap())
            .collect();
        WeightedRoundRobin::new(DestinationPool::new(dests, None))
    }

    fn label(dest: &Destination) -> char {
        match dest.url.as_str() {
            "http://backend-0.internal" => 'A',
            "http://backend-1.internal" => 'B',
            "http://backend-2.internal" => 'C',
            other => panic!("unexpected destination {}", other),
        }
    }

    #[test]
    fn interleaves_by_weight() {
        let lb = balancer(&[3, 2, 1]);
        let picks: String = (0..6).map(|_| label(&lb.select("ip").unwrap())).collect();
        assert_eq!(picks, "ABACBA");

        // The cycle repeats.
        let picks: String = (0..6).map(|_| label(&lb.select("ip").unwrap())).collect();
        assert_eq!(picks, "ABACBA");
    }

    #[test]
    fn zero_weight_counts_as_one() {
        let lb = balancer(&[0, 1]);
        let picks: String = (0..4).map(|_| label(&lb.select("ip").unwrap())).collect();
        assert_eq!(picks, "ABAB");
    }

    #[test]
    fn alive_only_redistributes() {
        let lb = balancer(&[3, 2, 1]);
        lb.dests()[0].set_alive(false);

        let picks: String = (0..6).map(|_| label(&lb.select_alive("ip").unwrap())).collect();
        assert_eq!(picks.matches('B').count(), 4);
        assert_eq!(picks.matches('C').count(), 2);
        assert!(!picks.contains('A'));
    }

    #[test]
    fn none_when_all_dead() {
        let lb = balancer(&[1, 1]);
        for d in lb.dests() {
            d.set_alive(false);
        }
        assert!(lb.select_alive("ip").is_none());
    }
}
