//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::load_balancer::BalancerKind;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// HTTP/HTTPS listener configuration.
    pub listener: ListenerConfig,

    /// Certificate material shared by the HTTPS listener and the TCP router.
    pub tls: Option<TlsConfig>,

    /// SNI-routed TCP listener.
    pub tcp: TcpConfig,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Global (per client IP) rate limiting.
    pub rate_limit: RateLimitConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Virtual hosts keyed by domain pattern (`example.com`, `*.example.com`).
    pub domains: BTreeMap<String, DomainConfig>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Plain HTTP bind address (e.g., "0.0.0.0:80").
    pub http_address: Option<String>,

    /// HTTPS bind address. Requires `[tls]`.
    pub https_address: Option<String>,

    /// Reject unknown hosts with 403 on the HTTPS listener.
    pub enforce_allowed_hosts_https: bool,

    /// Reject unknown hosts with 403 on the plain HTTP listener.
    pub enforce_allowed_hosts_http: bool,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            http_address: Some("0.0.0.0:80".to_string()),
            https_address: None,
            enforce_allowed_hosts_https: true,
            enforce_allowed_hosts_http: false,
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

/// TLS certificate configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate chain file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// How the TCP router treats the TLS session of an inbound connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TcpMode {
    /// Terminate TLS locally, read SNI from the handshake.
    #[default]
    Terminate,
    /// Sniff SNI from the ClientHello and forward the encrypted bytes untouched.
    Passthrough,
}

/// SNI-routed TCP listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TcpConfig {
    pub enabled: bool,

    /// Bind address (e.g., "0.0.0.0:8443").
    pub bind_address: String,

    pub mode: TcpMode,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Backend dial timeout in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: "0.0.0.0:8443".to_string(),
            mode: TcpMode::Terminate,
            max_connections: 10_000,
            connect_timeout_ms: 5_000,
        }
    }
}

impl TcpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Check interval in seconds, per destination.
    pub interval_secs: u64,

    /// Budget for one HTTP check in milliseconds.
    pub http_timeout_ms: u64,

    /// Budget for one TCP connect check in milliseconds.
    pub tcp_timeout_ms: u64,

    /// How often health snapshots are pushed to subscribers.
    pub broadcast_interval_secs: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 10,
            http_timeout_ms: 3_000,
            tcp_timeout_ms: 1_000,
            broadcast_interval_secs: 5,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,

    /// Budget for one forwarding attempt in milliseconds. An attempt that
    /// runs out counts as failed and the next destination is tried.
    pub attempt_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
            attempt_ms: 10_000,
        }
    }
}

impl TimeoutConfig {
    pub fn attempt(&self) -> Duration {
        Duration::from_millis(self.attempt_ms.max(1))
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Upper bound on forwarding attempts per request (first try included).
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

/// Cooldown applied after a violation when none is configured.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(1);

/// Token bucket parameters for one rate-limit scope.
///
/// A scope with `burst == 0` or `rate == 0` is disabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Bucket capacity.
    pub burst: u32,

    /// Refill rate in tokens per second.
    pub rate: f64,

    /// Rejection window after a violation, in milliseconds. 0 uses the default.
    pub cooldown_ms: u64,
}

impl RateLimitSettings {
    pub fn is_enabled(&self) -> bool {
        self.burst > 0 && self.rate > 0.0
    }

    pub fn cooldown(&self) -> Duration {
        if self.cooldown_ms == 0 {
            DEFAULT_COOLDOWN
        } else {
            Duration::from_millis(self.cooldown_ms)
        }
    }
}

/// Global rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub burst: u32,
    pub rate: f64,
    pub cooldown_ms: u64,

    /// Client entries idle longer than this are evicted.
    pub idle_eviction_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            burst: 0,
            rate: 0.0,
            cooldown_ms: 0,
            idle_eviction_secs: 600,
        }
    }
}

impl RateLimitConfig {
    pub fn settings(&self) -> RateLimitSettings {
        RateLimitSettings {
            burst: self.burst,
            rate: self.rate,
            cooldown_ms: self.cooldown_ms,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` takes precedence.
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Which router serves a domain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Tcp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Http => f.write_str("http"),
            Protocol::Tcp => f.write_str("tcp"),
        }
    }
}

/// One virtual host.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DomainConfig {
    pub enabled: bool,
    pub protocol: Protocol,

    /// Per (domain, client IP) limit.
    pub rate_limit: RateLimitSettings,

    /// Routes keyed by path prefix. TCP domains use the `/` route only.
    pub routes: BTreeMap<String, RouteConfig>,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            protocol: Protocol::Http,
            rate_limit: RateLimitSettings::default(),
            routes: BTreeMap::new(),
        }
    }
}

/// A path prefix and the pool serving it.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RouteConfig {
    pub dests: Vec<DestConfig>,
    pub rewrite: RewriteConfig,

    /// Balancing strategy. Unset means round-robin for HTTP and
    /// first-destination for TCP.
    pub balancer: Option<BalancerKind>,
}

/// Backend destination.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DestConfig {
    /// `http(s)://host:port[/base]` for HTTP domains, `host:port` for TCP.
    pub url: String,

    /// Weight for weighted round-robin (minimum 1).
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Dial the backend over TLS (TCP domains).
    #[serde(default)]
    pub with_tls: bool,

    /// Server name presented to a TLS backend. Defaults to the client SNI.
    #[serde(default)]
    pub server_name: Option<String>,
}

fn default_weight() -> u32 {
    1
}

impl DestConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            weight: default_weight(),
            with_tls: false,
            server_name: None,
        }
    }
}

/// Path rewrite strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RewriteKind {
    #[default]
    #[serde(alias = "")]
    None,
    Prefix,
    Regex,
}

/// Path rewrite rule applied before forwarding.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RewriteConfig {
    #[serde(rename = "type")]
    pub kind: RewriteKind,

    /// Prefix to replace, or the regex pattern.
    pub value: String,

    /// Replacement text. Regex rules default to `/$1` when empty.
    pub replace_val: String,
}
