//! hostgate: a multi-host TLS gateway.
//!
//! Routes HTTP(S) requests by host and path prefix to load-balanced
//! destinations, and raw TLS streams by SNI to TCP backends.

pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod net;
pub mod observability;
pub mod registry;
pub mod routing;
pub mod security;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::{Shutdown, Startup};
pub use registry::{Gateway, Registry};
