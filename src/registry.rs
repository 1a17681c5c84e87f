//! Registry and gateway state.
//!
//! # Responsibilities
//! - Registry: one immutable routing generation (trie, global limits, config)
//! - Gateway: the live Registry behind an atomic pointer, plus state that
//!   outlives reloads (rate-limit clients, outbound HTTP client)
//! - Reload: build a new generation, retire the old one, swap
//!
//! # Design Decisions
//! - A reload that fails leaves the running generation untouched
//! - In-flight requests keep the generation they loaded until they finish

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::config::schema::{ProxyConfig, RateLimitSettings};
use crate::config::validation::{validate_config, ValidationError};
use crate::health::{HealthChecker, HealthSnapshot};
use crate::http::client::HttpClient;
use crate::routing::{Domain, DomainBuildError, DomainTrie};
use crate::security::RateLimiter;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid configuration: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Validation(Vec<ValidationError>),

    #[error(transparent)]
    Domain(#[from] DomainBuildError),
}

/// One routing generation.
#[derive(Debug)]
pub struct Registry {
    trie: DomainTrie,
    config: ProxyConfig,
}

impl Registry {
    /// Build every domain, start its health checks and index it.
    ///
    /// On error, health checks already started for this generation are
    /// stopped before returning.
    pub fn build(config: ProxyConfig, checker: Option<&HealthChecker>) -> Result<Self, RegistryError> {
        validate_config(&config).map_err(RegistryError::Validation)?;

        let trie = DomainTrie::new();
        for (name, domain_config) in &config.domains {
            match Domain::build(name, domain_config, checker) {
                Ok(domain) => trie.insert(name, Arc::new(domain)),
                Err(e) => {
                    trie.stop_health_checks();
                    return Err(e.into());
                }
            }
        }

        tracing::info!(domains = trie.len(), "Registry built");
        Ok(Self { trie, config })
    }

    pub fn trie(&self) -> &DomainTrie {
        &self.trie
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn global_limit(&self) -> RateLimitSettings {
        self.config.rate_limit.settings()
    }

    /// Budget for one forwarding attempt.
    pub fn attempt_timeout(&self) -> Duration {
        self.config.timeouts.attempt()
    }

    /// Forwarding attempts per request, at least one.
    pub fn max_attempts(&self) -> u32 {
        self.config.retries.max_attempts.max(1)
    }
}

/// The process-wide gateway state.
pub struct Gateway {
    current: ArcSwap<Registry>,
    limiter: Arc<RateLimiter>,
    client: HttpClient,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("registry", &self.current.load())
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Build the first generation. Must run inside a Tokio runtime when
    /// health checks are enabled.
    pub fn new(config: ProxyConfig, client: HttpClient) -> Result<Self, RegistryError> {
        let checker = Self::checker_for(&config, &client);
        let registry = Registry::build(config, checker.as_ref())?;
        Ok(Self {
            current: ArcSwap::from_pointee(registry),
            limiter: Arc::new(RateLimiter::new()),
            client,
        })
    }

    fn checker_for(config: &ProxyConfig, client: &HttpClient) -> Option<HealthChecker> {
        config
            .health_check
            .enabled
            .then(|| HealthChecker::new(client.clone(), &config.health_check))
    }

    /// The current generation.
    pub fn registry(&self) -> Arc<Registry> {
        self.current.load_full()
    }

    /// Replace the routing generation.
    ///
    /// The new generation is fully built before the old one's health checks
    /// stop; on error nothing changes.
    pub fn reload(&self, config: ProxyConfig) -> Result<(), RegistryError> {
        let checker = Self::checker_for(&config, &self.client);
        let next = Registry::build(config, checker.as_ref())?;

        let previous = self.current.load_full();
        previous.trie().stop_health_checks();
        self.current.store(Arc::new(next));

        tracing::info!(
            domains = self.current.load().trie().len(),
            "Configuration reloaded"
        );
        Ok(())
    }

    /// Toggle a domain in the current generation. Returns whether it changed.
    pub fn set_enabled(&self, domain: &str, enabled: bool) -> bool {
        let changed = self.current.load().trie().set_enabled(domain, enabled);
        if changed {
            tracing::info!(domain, enabled, "Domain toggled");
        }
        changed
    }

    pub fn health(&self) -> HealthSnapshot {
        self.current.load().trie().get_health()
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    /// Stop every health check of the current generation.
    pub fn stop(&self) {
        self.current.load().trie().stop_health_checks();
    }
}

/// Apply configs from the watcher until shutdown.
pub async fn run_reloader(
    gateway: Arc<Gateway>,
    mut updates: mpsc::UnboundedReceiver<ProxyConfig>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(config) = update else {
                    tracing::warn!("Config watcher closed, reloads disabled");
                    break;
                };
                if let Err(e) = gateway.reload(config) {
                    tracing::error!(error = %e, "Reload rejected, keeping the running configuration");
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Reloader received shutdown signal, exiting loop");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::load_balancer::pool::Lifecycle;
    use std::time::Duration;

    const CONFIG: &str = r#"
        [health_check]
        enabled = false

        [domains."a.test".routes."/"]
        dests = [{ url = "http://127.0.0.1:3001" }]

        [domains."*.b.test".routes."/"]
        dests = [{ url = "http://127.0.0.1:3002" }]
    "#;

    fn client() -> HttpClient {
        let tls = crate::net::tls::client_config(&[]).unwrap();
        crate::http::client::build_client(Duration::from_secs(1), tls)
    }

    #[tokio::test]
    async fn builds_and_matches() {
        let gateway = Gateway::new(parse_config(CONFIG).unwrap(), client()).unwrap();
        let registry = gateway.registry();
        assert_eq!(registry.trie().len(), 2);
        assert!(registry.trie().match_host("x.b.test").is_some());
        assert_eq!(registry.max_attempts(), 3);
        assert!(!registry.global_limit().is_enabled());
    }

    #[tokio::test]
    async fn reload_swaps_and_retires_old_generation() {
        let gateway = Gateway::new(parse_config(CONFIG).unwrap(), client()).unwrap();
        let old = gateway.registry();

        let next = parse_config(
            r#"
            [health_check]
            enabled = false
            [domains."c.test".routes."/"]
            dests = [{ url = "http://127.0.0.1:3003" }]
            "#,
        )
        .unwrap();
        gateway.reload(next).unwrap();

        let current = gateway.registry();
        assert!(current.trie().match_host("c.test").is_some());
        assert!(current.trie().match_host("a.test").is_none());

        let retired = old.trie().get("a.test").unwrap();
        assert_eq!(
            retired.route("/").unwrap().balancer.pool().lifecycle(),
            Lifecycle::Stopped
        );
    }

    #[tokio::test]
    async fn failed_reload_keeps_running_generation() {
        let gateway = Gateway::new(parse_config(CONFIG).unwrap(), client()).unwrap();

        let mut broken = parse_config(CONFIG).unwrap();
        broken.domains.get_mut("a.test").unwrap().routes.get_mut("/").unwrap().dests.clear();
        assert!(matches!(gateway.reload(broken), Err(RegistryError::Validation(_))));

        let current = gateway.registry();
        let domain = current.trie().get("a.test").unwrap();
        assert_eq!(domain.route("/").unwrap().balancer.pool().lifecycle(), Lifecycle::Running);
    }

    #[tokio::test]
    async fn toggle_and_health() {
        let gateway = Gateway::new(parse_config(CONFIG).unwrap(), client()).unwrap();
        assert!(gateway.set_enabled("a.test", false));
        assert!(!gateway.set_enabled("a.test", false));
        assert!(!gateway.registry().trie().match_host("a.test").unwrap().is_enabled());

        let health = gateway.health();
        assert!(health["a.test"]["http://127.0.0.1:3001"]);
        assert!(health["*.b.test"]["http://127.0.0.1:3002"]);
    }
}
