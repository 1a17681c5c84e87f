//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → allow-list (unknown host → 403, per listener)
//!     → rate_limit.rs (global:<ip>, then <host>:<ip>)
//!     → headers.rs (strip hop-by-hop, add X-Forwarded-*)
//!     → Pass to forwarding
//! ```
//!
//! # Design Decisions
//! - Fail closed: a rejected check ends the request before forwarding
//! - Cooldown penalties outlast the bucket refill
//! - No trust in client-supplied X-Real-IP

pub mod headers;
pub mod rate_limit;

pub use rate_limit::{RateLimited, RateLimiter};
