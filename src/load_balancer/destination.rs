//! Destination abstraction.
//!
//! # Responsibilities
//! - Represent a single backend endpoint (HTTP base URL or TCP address)
//! - Carry per-destination weight and TLS dial settings
//! - Track liveness, written only by the destination's health-check task

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use url::Url;

use crate::config::schema::{DestConfig, Protocol};

/// Error type for destination parsing.
#[derive(Debug, Error)]
pub enum DestinationError {
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("unsupported scheme `{0}`, expected http or https")]
    UnsupportedScheme(String),

    #[error("url has no host")]
    MissingHost,

    #[error("expected host:port, got `{0}`")]
    InvalidAddress(String),
}

/// Where a destination lives on the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Base URL of an HTTP backend. Its path is prepended to forwarded paths.
    Http(Url),
    /// `host:port` of a TCP backend.
    Tcp { host: String, port: u16 },
}

impl Target {
    /// Parse a destination string for a domain of the given protocol.
    pub fn parse(raw: &str, protocol: Protocol) -> Result<Self, DestinationError> {
        match protocol {
            Protocol::Http => {
                let url = Url::parse(raw)?;
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(DestinationError::UnsupportedScheme(url.scheme().to_string()));
                }
                if url.host_str().map_or(true, str::is_empty) {
                    return Err(DestinationError::MissingHost);
                }
                Ok(Target::Http(url))
            }
            Protocol::Tcp => parse_host_port(raw),
        }
    }

    /// `host:port` as dialed, for both kinds.
    pub fn authority(&self) -> String {
        match self {
            Target::Http(url) => {
                let host = url.host_str().unwrap_or_default();
                match url.port_or_known_default() {
                    Some(port) => format!("{}:{}", host, port),
                    None => host.to_string(),
                }
            }
            Target::Tcp { host, port } => {
                if host.contains(':') {
                    format!("[{}]:{}", host, port)
                } else {
                    format!("{}:{}", host, port)
                }
            }
        }
    }

    /// Host part without port or brackets.
    pub fn host(&self) -> &str {
        match self {
            Target::Http(url) => url
                .host_str()
                .unwrap_or_default()
                .trim_start_matches('[')
                .trim_end_matches(']'),
            Target::Tcp { host, .. } => host,
        }
    }
}

fn parse_host_port(raw: &str) -> Result<Target, DestinationError> {
    if let Ok(addr) = raw.parse::<SocketAddr>() {
        return Ok(Target::Tcp {
            host: addr.ip().to_string(),
            port: addr.port(),
        });
    }
    let invalid = || DestinationError::InvalidAddress(raw.to_string());
    let (host, port) = raw.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() || host.contains(':') || host.contains('/') {
        return Err(invalid());
    }
    let port = port.parse::<u16>().map_err(|_| invalid())?;
    Ok(Target::Tcp {
        host: host.to_string(),
        port,
    })
}

/// A single backend destination owned by one balancer.
#[derive(Debug)]
pub struct Destination {
    /// The destination as configured, used as its identity in health maps.
    pub url: String,
    pub target: Target,
    /// Weight for weighted round-robin, at least 1.
    pub weight: u32,
    /// Dial the backend over TLS (TCP routes).
    pub with_tls: bool,
    /// TLS server name for the backend dial.
    pub server_name: Option<String>,
    alive: AtomicBool,
}

impl Destination {
    /// Build from configuration. Destinations start alive.
    pub fn from_config(config: &DestConfig, protocol: Protocol) -> Result<Self, DestinationError> {
        let target = Target::parse(&config.url, protocol)?;
        Ok(Self {
            url: config.url.clone(),
            target,
            weight: config.weight.max(1),
            with_tls: config.with_tls,
            server_name: config.server_name.clone(),
            alive: AtomicBool::new(true),
        })
    }

    /// Convenience constructor for an HTTP destination with the given weight.
    pub fn http(url: &str, weight: u32) -> Result<Self, DestinationError> {
        let config = DestConfig {
            weight,
            ..DestConfig::new(url)
        };
        Self::from_config(&config, Protocol::Http)
    }

    /// Convenience constructor for a raw TCP destination.
    pub fn tcp(addr: &str) -> Result<Self, DestinationError> {
        Self::from_config(&DestConfig::new(addr), Protocol::Tcp)
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    /// Record a health check result. Returns the previous value.
    pub fn set_alive(&self, alive: bool) -> bool {
        self.alive.swap(alive, Ordering::Relaxed)
    }
}
