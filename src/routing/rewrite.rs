//! Path rewriting before forwarding.

use std::borrow::Cow;

use regex::Regex;

use crate::config::schema::{RewriteConfig, RewriteKind};

/// Replacement used by regex rules without one.
pub const DEFAULT_REGEX_REPLACEMENT: &str = "/$1";

/// A compiled rewrite rule.
#[derive(Debug, Clone, Default)]
pub enum Rewriter {
    #[default]
    Noop,
    /// Replace the first occurrence of `from` with `to`.
    Prefix { from: String, to: String },
    /// Replace every match of `pattern` using a capture template.
    Regex { pattern: Regex, replacement: String },
}

impl Rewriter {
    /// Compile a rule. An empty value or kind yields a no-op.
    pub fn from_config(config: &RewriteConfig) -> Result<Self, regex::Error> {
        if config.value.is_empty() {
            return Ok(Rewriter::Noop);
        }
        match config.kind {
            RewriteKind::None => Ok(Rewriter::Noop),
            RewriteKind::Prefix => Ok(Rewriter::Prefix {
                from: config.value.clone(),
                to: config.replace_val.clone(),
            }),
            RewriteKind::Regex => {
                let replacement = if config.replace_val.is_empty() {
                    DEFAULT_REGEX_REPLACEMENT.to_string()
                } else {
                    config.replace_val.clone()
                };
                Ok(Rewriter::Regex {
                    pattern: Regex::new(&config.value)?,
                    replacement,
                })
            }
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, Rewriter::Noop)
    }

    /// Rewrite a request path. An emptied path becomes `/`.
    pub fn rewrite<'a>(&self, path: &'a str) -> Cow<'a, str> {
        let rewritten = match self {
            Rewriter::Noop => return Cow::Borrowed(path),
            Rewriter::Prefix { from, to } => Cow::Owned(path.replacen(from.as_str(), to, 1)),
            Rewriter::Regex {
                pattern,
                replacement,
            } => pattern.replace_all(path, replacement.as_str()),
        };
        if rewritten.is_empty() {
            Cow::Borrowed("/")
        } else {
            rewritten
        }
    }
}
