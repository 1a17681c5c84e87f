//! hostgate: multi-host TLS gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────────────────────────────┐
//!                        │                     HOSTGATE                      │
//!                        │                                                   │
//!   HTTP / HTTPS         │  ┌──────────┐   ┌──────────┐   ┌──────────────┐   │
//!   ─────────────────────┼─▶│   http   │──▶│ security │──▶│   routing    │   │
//!                        │  │  server  │   │  limits  │   │ trie + paths │   │
//!                        │  └──────────┘   └──────────┘   └──────┬───────┘   │
//!                        │                                       ▼           │
//!   TLS (SNI)            │  ┌──────────┐                  ┌──────────────┐   │
//!   ─────────────────────┼─▶│   net    │─────────────────▶│load_balancer │───┼──▶ Backends
//!                        │  │tcp router│                  │ rr / wrr / ih│   │
//!                        │  └──────────┘                  └──────┬───────┘   │
//!                        │                                       │ checks    │
//!                        │  ┌──────────┐ ┌──────────┐ ┌──────────┴───────┐   │
//!                        │  │  config  │ │lifecycle │ │      health      │   │
//!                        │  │ + reload │ │ shutdown │ │ checks/broadcast │   │
//!                        │  └──────────┘ └──────────┘ └──────────────────┘   │
//!                        └──────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use hostgate::config::load_config;
use hostgate::lifecycle::{signals, Shutdown, Startup};
use hostgate::observability::{logging, metrics};

/// Multi-host TLS gateway.
#[derive(Debug, Parser)]
#[command(name = "hostgate", version, about)]
struct Cli {
    /// Path to the TOML configuration.
    #[arg(short, long, default_value = "hostgate.toml")]
    config: PathBuf,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    if cli.check {
        println!(
            "{}: ok, {} domain(s)",
            cli.config.display(),
            config.domains.len()
        );
        return Ok(());
    }

    logging::init(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "hostgate starting");

    // Every config we build names ring explicitly; this covers anything that doesn't.
    let _ = rustls::crypto::ring::default_provider().install_default();

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let shutdown = Shutdown::new();
    let running = Startup::new(config)
        .watch(&cli.config)
        .start(&shutdown)
        .await?;

    let signal = signals::wait_for_signal().await?;
    tracing::info!(signal = %signal, "Shutdown signal received");
    shutdown.trigger();

    running.join(Duration::from_secs(15)).await;
    tracing::info!("Shutdown complete");
    Ok(())
}
