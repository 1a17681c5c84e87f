//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → TLS material → Gateway (first Registry) → background tasks
//!     → listeners (HTTP, HTTPS, TCP)
//!
//! Shutdown (shutdown.rs):
//!     Signal received → broadcast → loops exit, listeners drain → exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - Shutdown has a deadline: tasks still running after it are abandoned

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{Running, Startup, StartupError};
