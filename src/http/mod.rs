//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, middleware)
//!     → request.rs (request ID, routing host)
//!     → dispatch.rs (admission checks, route match, rewrite)
//!     → forward.rs (upstream URI and headers)
//!     → client.rs (pooled HTTP/HTTPS client, bounded attempts)
//!     → response.rs (strip hop-by-hop, or a gateway rejection)
//!     → Send to client
//! ```
//!
//! # Design Decisions
//! - Request bodies are buffered so every attempt replays the same bytes
//! - Response bodies stream straight through
//! - A 5xx from a destination counts as a failed attempt

pub mod client;
pub mod dispatch;
pub mod forward;
pub mod request;
pub mod response;
pub mod server;

pub use client::{build_client, HttpClient};
pub use request::X_REQUEST_ID;
pub use server::HttpServer;
