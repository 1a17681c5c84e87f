//! Active health checking.
//!
//! # Responsibilities
//! - Periodically check each destination on its own task
//! - Update destination liveness from the check result
//!
//! HTTP destinations get one GET (any response counts as alive), TCP
//! destinations one connect that is closed immediately. No retries inside
//! a check.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::config::HealthCheckConfig;
use crate::http::client::HttpClient;
use crate::load_balancer::destination::{Destination, Target};
use crate::observability::metrics;

/// Checks destinations and records their liveness.
#[derive(Clone)]
pub struct HealthChecker {
    client: HttpClient,
    interval: Duration,
    http_timeout: Duration,
    tcp_timeout: Duration,
}

impl HealthChecker {
    pub fn new(client: HttpClient, config: &HealthCheckConfig) -> Self {
        Self {
            client,
            interval: Duration::from_secs(config.interval_secs.max(1)),
            http_timeout: Duration::from_millis(config.http_timeout_ms),
            tcp_timeout: Duration::from_millis(config.tcp_timeout_ms),
        }
    }

    /// Override the check interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Spawn the check loop for one destination.
    ///
    /// The loop exits when `stop` flips to true or its sender is dropped.
    pub fn spawn(&self, dest: Arc<Destination>, mut stop: watch::Receiver<bool>) -> JoinHandle<()> {
        let checker = self.clone();
        tokio::spawn(async move {
            let mut ticker = time::interval(checker.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let alive = checker.check(&dest).await;
                        let was_alive = dest.set_alive(alive);
                        if was_alive != alive {
                            if alive {
                                tracing::info!(dest = %dest.url, "Destination is back up");
                            } else {
                                tracing::warn!(dest = %dest.url, "Destination is down");
                            }
                        }
                        metrics::record_backend_health(&dest.url, alive);
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            tracing::debug!(dest = %dest.url, "Health check stopped");
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Run one health check.
    pub async fn check(&self, dest: &Destination) -> bool {
        match &dest.target {
            Target::Http(url) => {
                let request = match Request::builder()
                    .method(Method::GET)
                    .uri(url.as_str())
                    .header(header::USER_AGENT, "hostgate-health-check")
                    .body(Body::empty())
                {
                    Ok(req) => req,
                    Err(e) => {
                        tracing::error!(dest = %dest.url, error = %e, "Failed to build health check request");
                        return false;
                    }
                };

                match time::timeout(self.http_timeout, self.client.request(request)).await {
                    Ok(Ok(_response)) => true,
                    Ok(Err(e)) => {
                        tracing::debug!(dest = %dest.url, error = %e, "Health check failed: connection error");
                        false
                    }
                    Err(_) => {
                        tracing::debug!(dest = %dest.url, "Health check failed: timeout");
                        false
                    }
                }
            }
            Target::Tcp { .. } => {
                let authority = dest.target.authority();
                match time::timeout(self.tcp_timeout, TcpStream::connect(&authority)).await {
                    Ok(Ok(_stream)) => true,
                    Ok(Err(e)) => {
                        tracing::debug!(dest = %dest.url, error = %e, "Health check failed: connect error");
                        false
                    }
                    Err(_) => {
                        tracing::debug!(dest = %dest.url, "Health check failed: timeout");
                        false
                    }
                }
            }
        }
    }
}
