//! Upstream request construction.
//!
//! # Responsibilities
//! - Join the destination's base path with the rewritten request path
//! - Carry the query string through unchanged
//! - Set `Host` to the destination and add the forwarding headers
//!
//! The body is buffered once per request and cloned per attempt, so a
//! retry replays exactly what the client sent.

use std::net::IpAddr;

use axum::body::{Body, Bytes};
use axum::http::request::Parts;
use axum::http::uri::InvalidUri;
use axum::http::{header, HeaderValue, Request, Uri};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use thiserror::Error;
use url::Url;

use crate::routing::matcher::RequestPath;
use crate::security::headers::{set_forwarded, strip_hop_by_hop};

/// Characters escaped when a decoded path goes back on the wire.
const PATH: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("invalid upstream uri: {0}")]
    Uri(#[from] InvalidUri),

    #[error("invalid upstream request: {0}")]
    Request(#[from] axum::http::Error),
}

/// `host[:port]` as it belongs in a `Host` header; default ports are omitted.
pub fn host_header(target: &Url) -> String {
    let host = target.host_str().unwrap_or_default();
    match target.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

/// Absolute upstream URI for `path` and `query` (raw).
///
/// A decoded path is encoded again; a raw one goes out untouched.
pub fn upstream_uri(target: &Url, path: &RequestPath, query: Option<&str>) -> Result<Uri, ForwardError> {
    let base = target.path().trim_end_matches('/');
    let mut uri = format!("{}://{}{}", target.scheme(), host_header(target), base);
    match path {
        RequestPath::Decoded(path) => uri.extend(utf8_percent_encode(path, PATH)),
        RequestPath::Raw(path) => uri.push_str(path),
    }
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        uri.push('?');
        uri.push_str(query);
    }
    Ok(uri.parse()?)
}

/// Everything about the client request that every attempt reuses.
#[derive(Debug)]
pub struct Outbound<'a> {
    pub parts: &'a Parts,
    pub body: Bytes,
    /// Rewritten path.
    pub path: &'a RequestPath,
    pub client_ip: IpAddr,
    /// The `Host` the client asked for.
    pub host: &'a str,
    pub proto: &'static str,
}

impl Outbound<'_> {
    /// Build the request for one attempt against `target`.
    pub fn to_request(&self, target: &Url) -> Result<Request<Body>, ForwardError> {
        let uri = upstream_uri(target, self.path, self.parts.uri.query())?;

        let mut headers = self.parts.headers.clone();
        strip_hop_by_hop(&mut headers);
        set_forwarded(&mut headers, self.client_ip, self.host, self.proto);
        if let Ok(value) = HeaderValue::from_str(&host_header(target)) {
            headers.insert(header::HOST, value);
        }

        let mut request = Request::builder()
            .method(self.parts.method.clone())
            .uri(uri)
            .body(Body::from(self.body.clone()))?;
        *request.headers_mut() = headers;
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::headers::{X_FORWARDED_FOR, X_FORWARDED_HOST};

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    #[test]
    fn joins_base_path_and_query() {
        let users = RequestPath::Decoded("/users".into());
        let uri = upstream_uri(&url("http://10.0.0.1:3000"), &users, Some("page=2")).unwrap();
        assert_eq!(uri, "http://10.0.0.1:3000/users?page=2");

        let uri = upstream_uri(&url("https://api.internal/base/"), &users, None).unwrap();
        assert_eq!(uri, "https://api.internal/base/users");
    }

    #[test]
    fn reencodes_decoded_path() {
        let path = RequestPath::Decoded("/a b/100%".into());
        let uri = upstream_uri(&url("http://10.0.0.1:3000"), &path, Some("")).unwrap();
        assert_eq!(uri, "http://10.0.0.1:3000/a%20b/100%25");
    }

    #[test]
    fn undecodable_path_is_forwarded_as_received() {
        let path = RequestPath::parse("/file%FF");
        let uri = upstream_uri(&url("http://10.0.0.1:3000"), &path, None).unwrap();
        assert_eq!(uri, "http://10.0.0.1:3000/file%FF");

        let path = RequestPath::parse("/a%20b");
        let uri = upstream_uri(&url("http://10.0.0.1:3000"), &path, None).unwrap();
        assert_eq!(uri, "http://10.0.0.1:3000/a%20b");
    }

    #[test]
    fn host_header_omits_default_port() {
        assert_eq!(host_header(&url("http://10.0.0.1:3000")), "10.0.0.1:3000");
        assert_eq!(host_header(&url("https://api.internal:443")), "api.internal");
    }

    #[test]
    fn request_headers() {
        let (parts, _) = Request::builder()
            .method("POST")
            .uri("/api/v1/users?id=7")
            .header(header::HOST, "a.test")
            .header(header::CONNECTION, "keep-alive")
            .header("x-custom", "kept")
            .body(())
            .unwrap()
            .into_parts();

        let outbound = Outbound {
            parts: &parts,
            body: Bytes::from_static(b"payload"),
            path: &RequestPath::Decoded("/users".into()),
            client_ip: "10.0.0.9".parse().unwrap(),
            host: "a.test",
            proto: "http",
        };
        let request = outbound.to_request(&url("http://127.0.0.1:4000")).unwrap();

        assert_eq!(request.method(), "POST");
        assert_eq!(request.uri(), "http://127.0.0.1:4000/users?id=7");
        assert_eq!(request.headers()[header::HOST], "127.0.0.1:4000");
        assert_eq!(request.headers()[X_FORWARDED_FOR], "10.0.0.9");
        assert_eq!(request.headers()[X_FORWARDED_HOST], "a.test");
        assert_eq!(request.headers()["x-custom"], "kept");
        assert!(request.headers().get(header::CONNECTION).is_none());
    }
}
