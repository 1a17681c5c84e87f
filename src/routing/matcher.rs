//! Host and path matching helpers.
//!
//! # Design Decisions
//! - Host matching is case-insensitive; ports and a trailing
//!   dot are ignored
//! - Path matching is case-sensitive, on the percent-decoded path
//! - No regex in the hot path: a linear scan over pre-sorted prefixes

use std::borrow::Cow;

use percent_encoding::percent_decode_str;

/// Lowercase a host, drop its port and any trailing dot.
pub fn normalize_host(raw: &str) -> String {
    let raw = raw.trim();
    let host = if let Some(rest) = raw.strip_prefix('[') {
        // [v6]:port
        rest.split(']').next().unwrap_or(rest)
    } else if raw.matches(':').count() == 1 {
        raw.split(':').next().unwrap_or(raw)
    } else {
        raw
    };
    host.trim_end_matches('.').to_ascii_lowercase()
}

/// A request path as it is matched, rewritten and forwarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestPath {
    /// Percent-decoded. Encoded again on the way upstream.
    Decoded(String),
    /// Decodes to invalid UTF-8, so it is kept exactly as received.
    Raw(String),
}

impl RequestPath {
    pub fn parse(path: &str) -> Self {
        match percent_decode_str(path).decode_utf8() {
            Ok(decoded) => RequestPath::Decoded(decoded.into_owned()),
            Err(_) => RequestPath::Raw(path.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RequestPath::Decoded(path) | RequestPath::Raw(path) => path,
        }
    }

    /// Same form, new text.
    pub fn with_text(&self, text: Cow<'_, str>) -> Self {
        match self {
            RequestPath::Decoded(_) => RequestPath::Decoded(text.into_owned()),
            RequestPath::Raw(_) => RequestPath::Raw(text.into_owned()),
        }
    }
}

/// Order route keys so the first prefix hit in a scan is the most specific:
/// more `/` segments first, then longer strings.
pub fn sort_paths<S: AsRef<str>>(paths: &mut [S]) {
    paths.sort_by(|a, b| {
        let (a, b) = (a.as_ref(), b.as_ref());
        b.matches('/')
            .count()
            .cmp(&a.matches('/').count())
            .then_with(|| b.len().cmp(&a.len()))
            .then_with(|| a.cmp(b))
    });
}

/// First entry of `sorted_paths` that prefixes `path`.
pub fn longest_prefix<'a>(sorted_paths: &'a [String], path: &str) -> Option<&'a str> {
    sorted_paths
        .iter()
        .find(|prefix| path.starts_with(prefix.as_str()))
        .map(String::as_str)
}
