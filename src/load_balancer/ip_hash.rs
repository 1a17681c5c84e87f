//! IP-hash load balancing strategy.
//!
//! The same client IP maps to the same destination while the pool is unchanged.

use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::load_balancer::destination::Destination;
use crate::load_balancer::pool::DestinationPool;
use crate::load_balancer::{Balancer, BalancerKind};

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// FNV-1a, 32 bit.
pub fn fnv1a_32(data: &[u8]) -> u32 {
    data.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Drop a trailing port so `ip:port` and `ip` hash alike.
fn client_key(client: &str) -> Cow<'_, str> {
    match client.parse::<SocketAddr>() {
        Ok(addr) => Cow::Owned(addr.ip().to_string()),
        Err(_) => Cow::Borrowed(client),
    }
}

#[derive(Debug)]
pub struct IpHash {
    pool: DestinationPool,
}

impl IpHash {
    pub fn new(pool: DestinationPool) -> Self {
        Self { pool }
    }

    fn index(&self, client_ip: &str) -> Option<usize> {
        let len = self.pool.len();
        if len == 0 {
            return None;
        }
        let hash = fnv1a_32(client_key(client_ip).as_bytes());
        Some(hash as usize % len)
    }
}

impl Balancer for IpHash {
    fn kind(&self) -> BalancerKind {
        BalancerKind::IpHash
    }

    fn pool(&self) -> &DestinationPool {
        &self.pool
    }

    fn select(&self, client_ip: &str) -> Option<Arc<Destination>> {
        let index = self.index(client_ip)?;
        Some(Arc::clone(&self.pool.dests()[index]))
    }

    fn select_alive(&self, client_ip: &str) -> Option<Arc<Destination>> {
        let start = self.index(client_ip)?;
        let dests = self.pool.dests();
        (0..dests.len())
            .map(|i| &dests[(start + i) % dests.len()])
            .find(|d| d.is_alive())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balancer(n: u16) -> IpHash {
        let dests = (0..n)
            .map(|i| Destination::http(&format!("http://127.0.0.1:{}", 9000 + i), 1).unwrap())
            .collect();
        IpHash::new(DestinationPool::new(dests, None))
    }

    #[test]
    fn fnv_reference_values() {
        assert_eq!(fnv1a_32(b""), 0x811c9dc5);
        assert_eq!(fnv1a_32(b"a"), 0xe40c292c);
        assert_eq!(fnv1a_32(b"foobar"), 0xbf9cf968);
    }

    #[test]
    fn same_ip_same_destination() {
        let lb = balancer(5);
        let first = lb.select("192.168.1.20").unwrap();
        for _ in 0..10 {
            assert_eq!(lb.select("192.168.1.20").unwrap().url, first.url);
        }
        assert_eq!(lb.select("192.168.1.20:51234").unwrap().url, first.url);
    }

    #[test]
    fn spreads_clients() {
        let lb = balancer(3);
        let mut urls: Vec<String> = (0..64)
            .map(|i| lb.select(&format!("10.0.0.{}", i)).unwrap().url.clone())
            .collect();
        urls.sort();
        urls.dedup();
        assert!(urls.len() > 1);
    }

    #[test]
    fn walks_forward_past_dead_destination() {
        let lb = balancer(3);
        let preferred = lb.index("172.16.0.9").unwrap();
        lb.dests()[preferred].set_alive(false);

        let picked = lb.select_alive("172.16.0.9").unwrap();
        assert_eq!(picked.url, lb.dests()[(preferred + 1) % 3].url);
    }
}
