//! Structured logging.
//!
//! # Responsibilities
//! - Install the global `tracing` subscriber
//! - Resolve the filter: `RUST_LOG` wins over `observability.log_level`

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset.
pub fn default_filter(log_level: &str) -> String {
    format!("hostgate={level},tower_http={level}", level = log_level)
}

pub fn init(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(log_level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_covers_crate_and_tower_http() {
        let filter = default_filter("debug");
        assert_eq!(filter, "hostgate=debug,tower_http=debug");
        assert!(EnvFilter::try_new(filter).is_ok());
    }
}
