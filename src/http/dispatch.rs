//! The request dispatcher.
//!
//! # Responsibilities
//! - Resolve the domain and enforce its admission checks
//! - Pick the most specific route and rewrite the path
//! - Forward with a bounded number of attempts
//!
//! Order: host → disabled (404) → allow-list (403) → global limit (429)
//! → route limit (429) → path → rewrite → balancer → forward (502 when
//! nothing answers).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, State};
use axum::http::Request;
use axum::response::{IntoResponse, Response};
use http_body_util::LengthLimitError;
use tokio::time;

use crate::config::schema::Protocol;
use crate::http::forward::Outbound;
use crate::http::request::{request_host, request_id};
use crate::http::response::{from_upstream, Rejection};
use crate::load_balancer::destination::Target;
use crate::observability::metrics;
use crate::registry::Gateway;
use crate::routing::matcher::RequestPath;

/// Per-listener dispatch state.
#[derive(Clone)]
pub struct DispatchState {
    pub gateway: Arc<Gateway>,
    /// `http` or `https`, forwarded as `X-Forwarded-Proto`.
    pub proto: &'static str,
    /// Reject hosts with no configured domain.
    pub enforce_allowed_hosts: bool,
    pub max_body_bytes: usize,
}

pub async fn dispatch(
    State(state): State<DispatchState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let (response, dest) = handle(&state, peer, request).await;
    metrics::record_request(&method, response.status().as_u16(), dest.as_deref().unwrap_or("none"), start);
    response
}

/// Returns the response and the destination that produced it, if any.
async fn handle(state: &DispatchState, peer: SocketAddr, request: Request<Body>) -> (Response, Option<String>) {
    let request_id = request_id(&request).to_string();
    let client_ip = peer.ip().to_string();
    let host = request_host(&request).unwrap_or_default();

    let registry = state.gateway.registry();
    let limiter = state.gateway.limiter();
    let domain = registry.trie().match_with_protocol(&host, Protocol::Http);

    match &domain {
        Some(domain) if !domain.is_enabled() => {
            tracing::debug!(request_id = %request_id, domain = %domain.name, "Domain disabled");
            return (Rejection::DomainDisabled.into_response(), None);
        }
        None if state.enforce_allowed_hosts => {
            tracing::debug!(request_id = %request_id, host = %host, "Host not allowed");
            return (Rejection::HostNotAllowed.into_response(), None);
        }
        _ => {}
    }

    if let Err(limited) = limiter.check_global(&client_ip, &registry.global_limit()) {
        tracing::debug!(request_id = %request_id, client_ip = %client_ip, "Global rate limit exceeded");
        return (Rejection::RateLimited(limited).into_response(), None);
    }

    let Some(domain) = domain else {
        return (Rejection::Banner.into_response(), None);
    };

    if let Err(limited) = limiter.check_route(&host, &client_ip, &domain.rate_limit) {
        tracing::debug!(request_id = %request_id, domain = %domain.name, client_ip = %client_ip, "Route rate limit exceeded");
        return (Rejection::RateLimited(limited).into_response(), None);
    }

    let requested = RequestPath::parse(request.uri().path());
    let Some(route) = domain.match_path(requested.as_str()) else {
        return (Rejection::Banner.into_response(), None);
    };
    let path = requested.with_text(route.rewriter.rewrite(requested.as_str()));

    let (parts, body) = request.into_parts();
    let body = match read_body(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(rejection) => {
            tracing::debug!(request_id = %request_id, status = %rejection.status(), "Request body rejected");
            return (rejection.into_response(), None);
        }
    };

    let forwarded_host = parts
        .headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(host.as_str())
        .to_string();
    let outbound = Outbound {
        parts: &parts,
        body,
        path: &path,
        client_ip: peer.ip(),
        host: &forwarded_host,
        proto: state.proto,
    };

    let max_attempts = registry.max_attempts();
    let attempt_timeout = registry.attempt_timeout();
    for attempt in 1..=max_attempts {
        let Some(dest) = route.balancer.select_alive(&client_ip) else {
            tracing::warn!(request_id = %request_id, domain = %domain.name, path = %route.path, "No alive destination");
            break;
        };
        let Target::Http(target) = &dest.target else {
            break;
        };

        let upstream = match outbound.to_request(target) {
            Ok(upstream) => upstream,
            Err(e) => {
                tracing::warn!(request_id = %request_id, dest = %dest.url, error = %e, "Cannot build upstream request");
                continue;
            }
        };

        let outcome = match time::timeout(attempt_timeout, state.gateway.client().request(upstream)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(
                    request_id = %request_id,
                    dest = %dest.url,
                    timeout_ms = attempt_timeout.as_millis() as u64,
                    attempt,
                    max_attempts,
                    "Destination timed out, retrying"
                );
                continue;
            }
        };

        match outcome {
            Ok(response) if response.status().is_server_error() => {
                tracing::warn!(
                    request_id = %request_id,
                    dest = %dest.url,
                    status = %response.status(),
                    attempt,
                    max_attempts,
                    "Destination failed, retrying"
                );
            }
            Ok(response) => {
                tracing::debug!(request_id = %request_id, dest = %dest.url, status = %response.status(), "Forwarded");
                return (from_upstream(response.map(Body::new)), Some(dest.url.clone()));
            }
            Err(e) => {
                tracing::warn!(
                    request_id = %request_id,
                    dest = %dest.url,
                    error = %e,
                    attempt,
                    max_attempts,
                    "Upstream error, retrying"
                );
            }
        }
    }

    (Rejection::AllDestinationsDown.into_response(), None)
}

/// Buffer the request body so every attempt can replay it.
///
/// Only a body over `limit` is 413; a body that cannot be read (client gone
/// mid-upload, broken chunking) is 400.
async fn read_body(body: Body, limit: usize) -> Result<Bytes, Rejection> {
    axum::body::to_bytes(body, limit).await.map_err(|e| {
        if exceeds_limit(&e) {
            Rejection::PayloadTooLarge
        } else {
            tracing::debug!(error = %e, "Failed to read request body");
            Rejection::BadRequest
        }
    })
}

fn exceeds_limit(error: &axum::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(error);
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return true;
        }
        source = e.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn body_within_limit_is_buffered() {
        let bytes = read_body(Body::from("hello"), 5).await.unwrap();
        assert_eq!(&bytes[..], b"hello");
    }

    #[tokio::test]
    async fn oversized_body_is_413() {
        let rejection = read_body(Body::from("x".repeat(64)), 16).await.unwrap_err();
        assert_eq!(rejection.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn unreadable_body_is_not_a_size_error() {
        let broken = axum::Error::new(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "client went away",
        ));
        assert!(!exceeds_limit(&broken));
    }
}
