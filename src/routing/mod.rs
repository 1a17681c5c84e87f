//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (host, path)
//!     → matcher.rs (normalize host, decode path)
//!     → trie.rs (host → Domain, exact before wildcard)
//!     → domain.rs (most specific path prefix → PathRoute)
//!     → rewrite.rs (prefix or regex rewrite)
//!     → Return: PathRoute or NoMatch
//!
//! Domain Compilation (at load):
//!     DomainConfig
//!     → Build balancers, compile rewrites
//!     → Sort paths (depth, then length)
//!     → Insert into the trie
//! ```
//!
//! # Design Decisions
//! - Wildcards match exactly one label, and matching never backtracks
//! - The trie is rebuilt wholesale on reload, never patched in place
//! - Deterministic: same input always matches same route

pub mod domain;
pub mod matcher;
pub mod rewrite;
pub mod trie;

pub use domain::{Domain, DomainBuildError, PathRoute};
pub use rewrite::Rewriter;
pub use trie::DomainTrie;
