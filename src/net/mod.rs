//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limit)
//!     → terminate: tls.rs handshake, SNI from the session
//!       passthrough: sni.rs sniffs the ClientHello, bytes kept for replay
//!     → Domain trie (TCP domains only), `/` route, destination
//!     → stream.rs (bidirectional copy, optional TLS to the backend)
//!     → connection.rs (tracked until both directions finish)
//! ```
//!
//! # Design Decisions
//! - Bounded accept: a semaphore permit per live connection
//! - Protocol errors drop the connection before any byte is forwarded
//! - Every connection logs inside its own span

pub mod connection;
pub mod listener;
pub mod sni;
pub mod stream;
pub mod tls;

pub use listener::{Listener, ListenerError, RouteError, TcpRouter};
