//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Domain and path syntax, wildcard placement
//! - Destinations parse for their domain's protocol
//! - Rewrite regexes compile
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::config::schema::{Protocol, ProxyConfig, RateLimitSettings, RewriteKind, TcpMode};
use crate::load_balancer::destination::Target;

static DOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-zA-Z0-9\*]+(-[a-zA-Z0-9\*]+)*\.)+[a-zA-Z0-9]{2,}$").expect("domain regex")
});

static PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/([a-zA-Z0-9\-._~]+(?:/[a-zA-Z0-9\-._~]+)*)?/?$").expect("path regex")
});

/// A single semantic problem in a configuration document.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("invalid domain `{0}`")]
    InvalidDomain(String),

    #[error("wildcard in `{0}` must be the whole leftmost label")]
    MisplacedWildcard(String),

    #[error("invalid path `{path}` on `{domain}`")]
    InvalidPath { domain: String, path: String },

    #[error("route `{path}` on `{domain}` has no destinations")]
    NoDestinations { domain: String, path: String },

    #[error("destination `{url}` on `{domain}{path}`: {reason}")]
    InvalidDestination {
        domain: String,
        path: String,
        url: String,
        reason: String,
    },

    #[error("rewrite on `{domain}{path}`: {reason}")]
    InvalidRewrite {
        domain: String,
        path: String,
        reason: String,
    },

    #[error("tcp domain `{0}` needs a `/` route")]
    MissingTcpRoute(String),

    #[error("rate limit for {scope}: rate must be a finite, non-negative number")]
    InvalidRateLimit { scope: String },

    #[error("`{field}` is not a socket address: `{value}`")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{0} requires a [tls] section")]
    MissingTls(&'static str),

    #[error("retries.max_attempts must be at least 1")]
    InvalidRetries,
}

/// Check a domain pattern. Wildcards are allowed only as `*.rest`.
pub fn validate_domain(domain: &str) -> Result<(), ValidationError> {
    if !DOMAIN_RE.is_match(domain) {
        return Err(ValidationError::InvalidDomain(domain.to_string()));
    }
    if domain.contains('*') && (!domain.starts_with("*.") || domain[1..].contains('*')) {
        return Err(ValidationError::MisplacedWildcard(domain.to_string()));
    }
    Ok(())
}

/// Check a route path (`/`, `/api`, `/api/v1/`).
pub fn is_valid_path(path: &str) -> bool {
    PATH_RE.is_match(path)
}

fn validate_limits(scope: String, settings: &RateLimitSettings, errors: &mut Vec<ValidationError>) {
    if !settings.rate.is_finite() || settings.rate < 0.0 {
        errors.push(ValidationError::InvalidRateLimit { scope });
    }
}

fn validate_address(field: &'static str, value: &str, errors: &mut Vec<ValidationError>) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}

/// Validate a whole configuration document.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Some(addr) = &config.listener.http_address {
        validate_address("listener.http_address", addr, &mut errors);
    }
    if let Some(addr) = &config.listener.https_address {
        validate_address("listener.https_address", addr, &mut errors);
        if config.tls.is_none() {
            errors.push(ValidationError::MissingTls("listener.https_address"));
        }
    }
    if config.tcp.enabled {
        validate_address("tcp.bind_address", &config.tcp.bind_address, &mut errors);
        if config.tcp.mode == TcpMode::Terminate && config.tls.is_none() {
            errors.push(ValidationError::MissingTls("tcp terminate mode"));
        }
    }
    if config.retries.max_attempts == 0 {
        errors.push(ValidationError::InvalidRetries);
    }
    validate_limits("global".to_string(), &config.rate_limit.settings(), &mut errors);

    for (domain, domain_config) in &config.domains {
        if let Err(e) = validate_domain(domain) {
            errors.push(e);
        }
        validate_limits(domain.clone(), &domain_config.rate_limit, &mut errors);

        if domain_config.protocol == Protocol::Tcp && !domain_config.routes.contains_key("/") {
            errors.push(ValidationError::MissingTcpRoute(domain.clone()));
        }

        for (path, route) in &domain_config.routes {
            if !is_valid_path(path) {
                errors.push(ValidationError::InvalidPath {
                    domain: domain.clone(),
                    path: path.clone(),
                });
            }
            if route.dests.is_empty() {
                errors.push(ValidationError::NoDestinations {
                    domain: domain.clone(),
                    path: path.clone(),
                });
            }
            for dest in &route.dests {
                if let Err(e) = Target::parse(&dest.url, domain_config.protocol) {
                    errors.push(ValidationError::InvalidDestination {
                        domain: domain.clone(),
                        path: path.clone(),
                        url: dest.url.clone(),
                        reason: e.to_string(),
                    });
                }
            }
            if route.rewrite.kind == RewriteKind::Regex && !route.rewrite.value.is_empty() {
                if let Err(e) = Regex::new(&route.rewrite.value) {
                    errors.push(ValidationError::InvalidRewrite {
                        domain: domain.clone(),
                        path: path.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{DestConfig, DomainConfig, RouteConfig};

    fn route(url: &str) -> RouteConfig {
        RouteConfig {
            dests: vec![DestConfig::new(url)],
            ..Default::default()
        }
    }

    #[test]
    fn domain_syntax() {
        assert!(validate_domain("example.com").is_ok());
        assert!(validate_domain("api.example.com").is_ok());
        assert!(validate_domain("my-app.example.io").is_ok());
        assert!(validate_domain("*.example.com").is_ok());

        assert!(validate_domain("localhost").is_err());
        assert!(validate_domain("-bad.example.com").is_err());
        assert!(validate_domain("example.c").is_err());
    }

    #[test]
    fn wildcard_must_lead() {
        assert_eq!(
            validate_domain("api.*.example.com"),
            Err(ValidationError::MisplacedWildcard("api.*.example.com".into()))
        );
        assert!(validate_domain("a*.example.com").is_err());
        assert!(validate_domain("*.*.example.com").is_err());
    }

    #[test]
    fn path_syntax() {
        assert!(is_valid_path("/"));
        assert!(is_valid_path("/api"));
        assert!(is_valid_path("/api/v1/"));
        assert!(is_valid_path("/socket.io"));

        assert!(!is_valid_path("api"));
        assert!(!is_valid_path("//api"));
        assert!(!is_valid_path("/api/<v1>"));
    }

    #[test]
    fn collects_every_error() {
        let mut config = ProxyConfig::default();
        let mut bad = DomainConfig::default();
        bad.routes.insert("nope".into(), route("not a url"));
        bad.routes.insert("/empty".into(), RouteConfig::default());
        config.domains.insert("localhost".into(), bad);
        config.retries.max_attempts = 0;

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::InvalidDomain("localhost".into())));
        assert!(errors.contains(&ValidationError::InvalidRetries));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::InvalidPath { .. })));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::NoDestinations { .. })));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::InvalidDestination { .. })));
    }

    #[test]
    fn bad_regex_fails_fast() {
        let mut config = ProxyConfig::default();
        let mut domain = DomainConfig::default();
        let mut r = route("http://127.0.0.1:3000");
        r.rewrite.kind = RewriteKind::Regex;
        r.rewrite.value = "^/api/(".into();
        domain.routes.insert("/api".into(), r);
        config.domains.insert("a.test".into(), domain);

        let errors = validate_config(&config).unwrap_err();
        assert!(matches!(errors[0], ValidationError::InvalidRewrite { .. }));
    }

    #[test]
    fn tcp_domain_needs_root_route() {
        let mut config = ProxyConfig::default();
        let mut domain = DomainConfig {
            protocol: Protocol::Tcp,
            ..Default::default()
        };
        domain.routes.insert("/db".into(), route("127.0.0.1:5432"));
        config.domains.insert("db.example.com".into(), domain);

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors, vec![ValidationError::MissingTcpRoute("db.example.com".into())]);
    }

    #[test]
    fn https_requires_tls() {
        let mut config = ProxyConfig::default();
        config.listener.https_address = Some("0.0.0.0:443".into());
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors, vec![ValidationError::MissingTls("listener.https_address")]);
    }

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&ProxyConfig::default()).is_ok());
    }
}
