//! Per-route rate limiting.
//!
//! Routes opt in with [`Server::rate_limit`](crate::server::Server::rate_limit)
//! (or [`RouteTable::set_rate_limit`]). The plugin keeps one token bucket per
//! route pattern and peer IP: the bucket holds `burst_limit` tokens and
//! refills at `requests_per_minute / 60` tokens per second. A request that
//! finds the bucket empty is answered with `429 Too Many Requests` and a
//! `Retry-After` header, and the handler never runs.

use crate::context::ServerContext;
use crate::error::{Error, Result};
use crate::plugin::Plugin;
use crate::request::Request;
use crate::response::Response;
use crate::router::{Lookup, RateLimitConfig, RouteTable};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

/// Checks between automatic sweeps of refilled buckets.
const SWEEP_EVERY: u64 = 1024;

struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            tokens: capacity,
            capacity,
            refill_per_sec,
            last_update: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_update = now;
    }

    /// Takes one token, or returns the seconds until one is available.
    fn try_acquire(&mut self) -> std::result::Result<(), u64> {
        self.refill(Instant::now());

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else if self.refill_per_sec > 0.0 {
            Err(((1.0 - self.tokens) / self.refill_per_sec).ceil().max(1.0) as u64)
        } else {
            Err(60)
        }
    }

    /// A full bucket behaves exactly like a fresh one.
    fn is_full(&mut self, now: Instant) -> bool {
        self.refill(now);
        self.tokens >= self.capacity
    }
}

/// Token-bucket limiter driven by per-route [`RateLimitConfig`]s.
///
/// Buckets that have refilled completely are dropped every
/// 1024 checks, or on demand through [`cleanup`](Self::cleanup),
/// so the map only holds clients that are currently being throttled.
#[derive(Default)]
pub struct RateLimitPlugin {
    routes: OnceLock<Arc<RouteTable>>,
    buckets: DashMap<String, TokenBucket>,
    checks: AtomicU64,
}

impl RateLimitPlugin {
    /// Creates the plugin. It binds to the server's route table on `init`.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Checks one request against `config`. Returns the `Retry-After` delay
    /// when the request must be rejected.
    pub fn check(&self, pattern: &str, client: &str, config: &RateLimitConfig) -> Option<u64> {
        if !config.enabled {
            return None;
        }
        let capacity = f64::from(config.burst_limit);
        let refill = f64::from(config.requests_per_minute) / 60.0;

        let verdict = self
            .buckets
            .entry(format!("{pattern}|{client}"))
            .or_insert_with(|| TokenBucket::new(capacity, refill))
            .try_acquire()
            .err();

        if (self.checks.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_EVERY == 0 {
            self.cleanup();
        }
        verdict
    }

    /// Drops every bucket that has refilled to capacity. Returns how many
    /// were removed.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| !bucket.is_full(now));
        let removed = before.saturating_sub(self.buckets.len());
        if removed > 0 {
            tracing::debug!("Evicted {} idle rate-limit buckets", removed);
        }
        removed
    }

    /// Number of tracked buckets.
    pub fn tracked(&self) -> usize {
        self.buckets.len()
    }
}

#[async_trait]
impl Plugin for RateLimitPlugin {
    fn name(&self) -> &str {
        "rate-limit"
    }

    async fn init(&self, ctx: &ServerContext) -> Result<()> {
        let routes = ctx.routes();
        let bound = self.routes.get_or_init(|| routes.clone());
        if !Arc::ptr_eq(bound, routes) {
            return Err(Error::custom(
                "rate-limit plugin is already bound to another route table",
            ));
        }
        Ok(())
    }

    async fn pre_handler(&self, req: &mut Request, res: &mut Response) -> Result<()> {
        let Some(routes) = self.routes.get() else {
            return Ok(());
        };
        let Lookup::Found(matched) = routes.lookup(req.method(), req.path()) else {
            return Ok(());
        };
        let Some(config) = matched.rate_limit else {
            return Ok(());
        };

        let client = req
            .peer_addr()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        if let Some(retry_after) = self.check(&matched.pattern, &client, &config) {
            tracing::warn!(client = %client, route = %matched.pattern, "Rate limit exceeded");
            res.send_error(429, "Too Many Requests");
            res.set_header("Retry-After", retry_after.to_string());
            res.end();
        }
        Ok(())
    }
}
