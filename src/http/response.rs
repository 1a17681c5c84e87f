//! Gateway-generated responses.
//!
//! # Responsibilities
//! - Map dispatch outcomes that never reach a backend to status codes
//! - Strip hop-by-hop headers from proxied responses
//!
//! # Design Decisions
//! - Plain-text bodies; clients of a gateway rarely parse them
//! - Retry-After is an absolute HTTP date, not a delta

use axum::body::Body;
use axum::http::{header, HeaderValue, Response as HttpResponse, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::security::headers::strip_hop_by_hop;
use crate::security::RateLimited;

/// Body served when no route matches.
pub const BANNER: &str = "Hello from hostgate 🚀";

/// A response produced by the gateway itself.
#[derive(Debug)]
pub enum Rejection {
    /// No domain or path matched.
    Banner,
    DomainDisabled,
    HostNotAllowed,
    RateLimited(RateLimited),
    /// The request body could not be read.
    BadRequest,
    PayloadTooLarge,
    AllDestinationsDown,
}

impl Rejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Rejection::Banner => StatusCode::OK,
            Rejection::DomainDisabled => StatusCode::NOT_FOUND,
            Rejection::HostNotAllowed => StatusCode::FORBIDDEN,
            Rejection::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Rejection::BadRequest => StatusCode::BAD_REQUEST,
            Rejection::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Rejection::AllDestinationsDown => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            Rejection::Banner => (status, BANNER).into_response(),
            Rejection::DomainDisabled => (status, "Not Found").into_response(),
            Rejection::HostNotAllowed => (status, "Forbidden").into_response(),
            Rejection::RateLimited(limited) => {
                let mut response = (status, "Too Many Requests").into_response();
                if let Ok(value) = HeaderValue::from_str(&limited.retry_after_header()) {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
                response
            }
            Rejection::BadRequest => (status, "Bad Request").into_response(),
            Rejection::PayloadTooLarge => (status, "Payload Too Large").into_response(),
            Rejection::AllDestinationsDown => (status, "All backend servers are down").into_response(),
        }
    }
}

/// Hand a backend response to the client.
pub fn from_upstream(response: HttpResponse<Body>) -> Response {
    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    Response::from_parts(parts, body)
}
