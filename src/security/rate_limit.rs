//! Per-client rate limiting with cooldown penalties.
//!
//! Each scope key (`global:<ip>` or `<host>:<ip>`) owns a token bucket. A
//! request the bucket rejects starts a cooldown; until it expires every
//! request on that key is rejected without touching the bucket.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as Bucket};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};

use crate::config::schema::RateLimitSettings;
use crate::observability::metrics;

type DirectBucket = Bucket<NotKeyed, InMemoryState, DefaultClock>;

/// A rejected request.
#[derive(Debug, Clone, Error)]
#[error("rate limit exceeded for `{key}` until {}", .retry_after.to_rfc2822())]
pub struct RateLimited {
    pub key: String,
    pub retry_after: DateTime<Utc>,
}

impl RateLimited {
    /// `Retry-After` value as an HTTP date.
    pub fn retry_after_header(&self) -> String {
        self.retry_after
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string()
    }
}

fn bucket_for(settings: &RateLimitSettings) -> Option<DirectBucket> {
    let burst = NonZeroU32::new(settings.burst)?;
    let period = Duration::try_from_secs_f64(1.0 / settings.rate).ok()?;
    let quota = Quota::with_period(period)?.allow_burst(burst);
    Some(Bucket::direct(quota))
}

struct ClientLimiter {
    settings: RateLimitSettings,
    /// None when the rate is too high to express; admits everything.
    bucket: Option<DirectBucket>,
    last_request: Instant,
    cooldown_until: Option<DateTime<Utc>>,
}

impl ClientLimiter {
    fn new(settings: &RateLimitSettings) -> Self {
        Self {
            settings: *settings,
            bucket: bucket_for(settings),
            last_request: Instant::now(),
            cooldown_until: None,
        }
    }

    fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }
}

impl std::fmt::Debug for ClientLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientLimiter")
            .field("settings", &self.settings)
            .field("last_request", &self.last_request)
            .field("cooldown_until", &self.cooldown_until)
            .finish()
    }
}

/// Client limiter cache shared by every scope.
#[derive(Debug, Default)]
pub struct RateLimiter {
    clients: DashMap<String, ClientLimiter>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit or reject one request on `key`.
    pub fn check(&self, key: &str, settings: &RateLimitSettings) -> Result<(), RateLimited> {
        if !settings.is_enabled() {
            return Ok(());
        }

        let now = Utc::now();
        let mut client = self
            .clients
            .entry(key.to_string())
            .or_insert_with(|| ClientLimiter::new(settings));

        // Settings changed under a reload; start a fresh bucket.
        if client.settings != *settings {
            client.settings = *settings;
            client.bucket = bucket_for(settings);
        }

        let cooldown_until = client.cooldown_until;
        if let Some(until) = cooldown_until {
            if now < until {
                return Err(RateLimited {
                    key: key.to_string(),
                    retry_after: until,
                });
            }
            client.cooldown_until = None;
        }

        let denied = client
            .bucket
            .as_ref()
            .is_some_and(|bucket| bucket.check().is_err());
        if denied {
            let cooldown = chrono::Duration::from_std(settings.cooldown())
                .unwrap_or_else(|_| chrono::Duration::seconds(1));
            let until = now + cooldown;
            client.cooldown_until = Some(until);
            return Err(RateLimited {
                key: key.to_string(),
                retry_after: until,
            });
        }

        client.last_request = Instant::now();
        Ok(())
    }

    /// Global scope for a client IP.
    pub fn check_global(&self, client_ip: &str, settings: &RateLimitSettings) -> Result<(), RateLimited> {
        let result = self.check(&format!("global:{}", client_ip), settings);
        if result.is_err() {
            metrics::record_rate_limited("global");
        }
        result
    }

    /// Per-route scope for a (host, client IP) pair.
    pub fn check_route(
        &self,
        host: &str,
        client_ip: &str,
        settings: &RateLimitSettings,
    ) -> Result<(), RateLimited> {
        let result = self.check(&format!("{}:{}", host, client_ip), settings);
        if result.is_err() {
            metrics::record_rate_limited("route");
        }
        result
    }

    /// Forget clients idle longer than `max_idle` and not in cooldown.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let now = Utc::now();
        let before = self.clients.len();
        self.clients
            .retain(|_, client| client.in_cooldown(now) || client.last_request.elapsed() <= max_idle);
        before.saturating_sub(self.clients.len())
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Evict idle clients every `max_idle / 2` until shutdown.
    pub async fn run_sweeper(self: Arc<Self>, max_idle: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = time::interval((max_idle / 2).max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = self.evict_idle(max_idle);
                    if evicted > 0 {
                        tracing::debug!(evicted, remaining = self.len(), "Evicted idle rate limit entries");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Rate limit sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
