//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → Registry::build (trie + balancers)
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → Gateway::reload builds a new Registry
//!     → atomic swap of Arc<Registry>
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    DestConfig, DomainConfig, HealthCheckConfig, ListenerConfig, Protocol, ProxyConfig,
    RateLimitConfig, RateLimitSettings, RetryConfig, RewriteConfig, RewriteKind, RouteConfig,
    TcpConfig, TcpMode, TlsConfig,
};
