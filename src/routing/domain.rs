//! Per-domain routing configuration.
//!
//! # Responsibilities
//! - Hold a domain's routes, each with its rewrite rule and balancer
//! - Keep route keys pre-sorted for most-specific-prefix matching
//! - Carry the enable flag, the only field mutated after load

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::config::schema::{DomainConfig, Protocol, RateLimitSettings};
use crate::health::active::HealthChecker;
use crate::load_balancer::destination::{Destination, DestinationError};
use crate::load_balancer::{self, Balancer, BalancerError, BalancerKind};
use crate::routing::matcher::{longest_prefix, sort_paths};
use crate::routing::rewrite::Rewriter;

/// Error type for building a domain from configuration.
#[derive(Debug, Error)]
pub enum DomainBuildError {
    #[error("{domain}{path}: destination `{url}`: {source}")]
    Destination {
        domain: String,
        path: String,
        url: String,
        source: DestinationError,
    },

    #[error("{domain}{path}: rewrite: {source}")]
    Rewrite {
        domain: String,
        path: String,
        source: regex::Error,
    },

    #[error("{domain}{path}: {source}")]
    Balancer {
        domain: String,
        path: String,
        source: BalancerError,
    },
}

/// One path prefix of a domain.
#[derive(Debug)]
pub struct PathRoute {
    pub path: String,
    pub rewriter: Rewriter,
    /// As configured; TCP routing uses the first destination when unset.
    pub balancer_kind: Option<BalancerKind>,
    pub balancer: Arc<dyn Balancer>,
}

/// A virtual host and its routes.
#[derive(Debug)]
pub struct Domain {
    /// Pattern as configured, e.g. `*.example.com`.
    pub name: String,
    pub protocol: Protocol,
    pub rate_limit: RateLimitSettings,
    enabled: AtomicBool,
    routes: HashMap<String, PathRoute>,
    sorted_paths: Vec<String>,
}

impl Domain {
    /// Build every route's balancer and start its health checks.
    pub fn build(
        name: &str,
        config: &DomainConfig,
        checker: Option<&HealthChecker>,
    ) -> Result<Self, DomainBuildError> {
        let mut routes = HashMap::with_capacity(config.routes.len());

        for (path, route) in &config.routes {
            let rewriter =
                Rewriter::from_config(&route.rewrite).map_err(|source| DomainBuildError::Rewrite {
                    domain: name.to_string(),
                    path: path.clone(),
                    source,
                })?;

            let dests = route
                .dests
                .iter()
                .map(|d| {
                    Destination::from_config(d, config.protocol).map_err(|source| {
                        DomainBuildError::Destination {
                            domain: name.to_string(),
                            path: path.clone(),
                            url: d.url.clone(),
                            source,
                        }
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            let kind = route.balancer.unwrap_or(BalancerKind::RoundRobin);
            let balancer = load_balancer::build(kind, dests, checker).map_err(|source| {
                DomainBuildError::Balancer {
                    domain: name.to_string(),
                    path: path.clone(),
                    source,
                }
            })?;

            routes.insert(
                path.clone(),
                PathRoute {
                    path: path.clone(),
                    rewriter,
                    balancer_kind: route.balancer,
                    balancer,
                },
            );
        }

        let mut sorted_paths: Vec<String> = routes.keys().cloned().collect();
        sort_paths(&mut sorted_paths);

        Ok(Self {
            name: name.to_string(),
            protocol: config.protocol,
            rate_limit: config.rate_limit,
            enabled: AtomicBool::new(config.enabled),
            routes,
            sorted_paths,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Set the enable flag. Returns whether the value changed.
    pub fn set_enabled(&self, enabled: bool) -> bool {
        self.enabled
            .compare_exchange(!enabled, enabled, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Route registered under exactly `path`.
    pub fn route(&self, path: &str) -> Option<&PathRoute> {
        self.routes.get(path)
    }

    /// Most specific route whose key prefixes `path`.
    pub fn match_path(&self, path: &str) -> Option<&PathRoute> {
        longest_prefix(&self.sorted_paths, path).and_then(|key| self.routes.get(key))
    }

    pub fn sorted_paths(&self) -> &[String] {
        &self.sorted_paths
    }

    pub fn routes(&self) -> impl Iterator<Item = &PathRoute> {
        self.routes.values()
    }

    /// `destination url → alive` across all routes.
    pub fn health(&self) -> BTreeMap<String, bool> {
        self.routes
            .values()
            .flat_map(|route| route.balancer.dests().iter())
            .map(|dest| (dest.url.clone(), dest.is_alive()))
            .collect()
    }

    pub fn stop_health_checks(&self) {
        for route in self.routes.values() {
            route.balancer.stop_health_checks();
        }
    }
}
