//! Reversed-label domain trie.
//!
//! Hostnames are split on `.` and walked right to left, so `api.example.com`
//! lives at `com → example → api`. A `*` label is a wildcard child matching
//! exactly one label. Matching prefers the exact child, falls back to the
//! wildcard child, and never backtracks.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::schema::Protocol;
use crate::health::HealthSnapshot;
use crate::routing::domain::Domain;

const WILDCARD: &str = "*";

#[derive(Debug, Default)]
struct Node {
    children: HashMap<String, Node>,
    domain: Option<Arc<Domain>>,
}

impl Node {
    fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Arc<Domain>)) {
        if let Some(domain) = &self.domain {
            f(domain);
        }
        for child in self.children.values() {
            child.visit(f);
        }
    }
}

/// Maps hostnames to their domain configuration.
#[derive(Debug, Default)]
pub struct DomainTrie {
    root: RwLock<Node>,
}

fn labels(name: &str) -> Vec<String> {
    name.trim_end_matches('.')
        .to_ascii_lowercase()
        .rsplit('.')
        .map(str::to_string)
        .collect()
}

impl DomainTrie {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a domain under `pattern`, replacing any previous entry.
    pub fn insert(&self, pattern: &str, domain: Arc<Domain>) {
        let mut root = self.root.write();
        let mut node = &mut *root;
        for label in labels(pattern) {
            node = node.children.entry(label).or_default();
        }
        node.domain = Some(domain);
    }

    /// Resolve a hostname.
    pub fn match_host(&self, host: &str) -> Option<Arc<Domain>> {
        let root = self.root.read();
        let mut node = &*root;
        for label in labels(host) {
            node = match node.children.get(&label) {
                Some(child) => child,
                None => node.children.get(WILDCARD)?,
            };
        }
        node.domain.clone()
    }

    /// Resolve a hostname served by the given protocol.
    pub fn match_with_protocol(&self, host: &str, protocol: Protocol) -> Option<Arc<Domain>> {
        self.match_host(host).filter(|d| d.protocol == protocol)
    }

    /// Exact lookup by pattern, wildcards included literally.
    pub fn get(&self, pattern: &str) -> Option<Arc<Domain>> {
        let root = self.root.read();
        let mut node = &*root;
        for label in labels(pattern) {
            node = node.children.get(&label)?;
        }
        node.domain.clone()
    }

    /// Remove the domain stored under `pattern` and prune empty nodes.
    ///
    /// The removed domain's health checks are stopped. Other patterns,
    /// including an exact domain next to a wildcard, are untouched.
    pub fn remove(&self, pattern: &str) -> bool {
        fn remove_at(node: &mut Node, labels: &[String]) -> Option<Arc<Domain>> {
            let Some((label, rest)) = labels.split_first() else {
                return node.domain.take();
            };
            let child = node.children.get_mut(label)?;
            let removed = remove_at(child, rest);
            if removed.is_some() && child.domain.is_none() && child.children.is_empty() {
                node.children.remove(label);
            }
            removed
        }

        let removed = {
            let mut root = self.root.write();
            remove_at(&mut root, &labels(pattern))
        };
        match removed {
            Some(domain) => {
                domain.stop_health_checks();
                true
            }
            None => false,
        }
    }

    /// Toggle a domain. Returns whether the flag changed.
    pub fn set_enabled(&self, pattern: &str, enabled: bool) -> bool {
        self.get(pattern)
            .map(|domain| domain.set_enabled(enabled))
            .unwrap_or(false)
    }

    /// Every stored domain keyed by its pattern.
    pub fn get_all(&self) -> BTreeMap<String, Arc<Domain>> {
        let root = self.root.read();
        let mut all = BTreeMap::new();
        root.visit(&mut |domain| {
            all.insert(domain.name.clone(), Arc::clone(domain));
        });
        all
    }

    /// Point-in-time `domain → url → alive` map.
    pub fn get_health(&self) -> HealthSnapshot {
        let root = self.root.read();
        let mut health = BTreeMap::new();
        root.visit(&mut |domain| {
            health.insert(domain.name.clone(), domain.health());
        });
        health
    }

    /// Stop the health checks of every balancer in the trie.
    pub fn stop_health_checks(&self) {
        let root = self.root.read();
        root.visit(&mut |domain| domain.stop_health_checks());
    }

    pub fn len(&self) -> usize {
        let root = self.root.read();
        let mut count = 0;
        root.visit(&mut |_| count += 1);
        count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
