//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events with structured fields (domain, dest, client_ip, sni)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → logging.rs (fmt layer on stdout, EnvFilter)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through the HTTP path as `x-request-id`
//! - TCP streams log inside a `connection` span
//! - Metrics are cheap and recorded even when not exported

pub mod logging;
pub mod metrics;
