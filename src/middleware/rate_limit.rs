//! Per-client token bucket admission control.
//!
//! Buckets live in a sharded map; every refill-and-debit runs while holding
//! the bucket's shard lock, so concurrent requests from the same client see a
//! consistent token count. Idle buckets are removed by a periodic sweep owned
//! by the limiter.

use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, Request, State, connect_info::MockConnectInfo},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::{DashMap, mapref::entry::Entry};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::AppError;

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(3 * 60);

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub enabled: bool,
    /// Bucket capacity.
    pub burst: u32,
    /// Steady-state refill rate.
    pub requests_per_second: f64,
    pub sweep_interval: Duration,
    /// Buckets not seen for longer than this are evicted by the sweep.
    pub idle_timeout: Duration,
    /// Prefer `X-Real-IP` / `X-Forwarded-For` over the socket address.
    pub trust_proxy_headers: bool,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            burst: 4,
            requests_per_second: 2.0,
            sweep_interval: SWEEP_INTERVAL,
            idle_timeout: IDLE_TIMEOUT,
            trust_proxy_headers: false,
        }
    }
}

#[derive(Debug)]
struct ClientBucket {
    tokens: f64,
    last_refill_at: Instant,
    last_seen_at: Instant,
}

impl ClientBucket {
    /// The first request is admitted as part of creating the bucket.
    fn first_request(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity - 1.0,
            last_refill_at: now,
            last_seen_at: now,
        }
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill_at).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_refill_at = now;
        self.last_seen_at = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

struct Sweeper {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct RateLimiter {
    config: RateLimiterConfig,
    clients: DashMap<String, ClientBucket>,
    sweep_lock: Mutex<()>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl RateLimiter {
    /// A zero burst is raised to one so a fresh bucket never starts negative.
    pub fn new(mut config: RateLimiterConfig) -> Self {
        config.burst = config.burst.max(1);
        Self {
            config,
            clients: DashMap::new(),
            sweep_lock: Mutex::new(()),
            sweeper: Mutex::new(None),
        }
    }

    /// Creates the limiter and starts its eviction sweep on the current
    /// runtime. Call [`RateLimiter::shutdown`] to stop the sweep.
    pub fn start(config: RateLimiterConfig) -> Arc<Self> {
        let limiter = Arc::new(Self::new(config));
        limiter.spawn_sweeper();
        limiter
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Decides whether one request from `client` may proceed.
    pub fn allow(&self, client: &str) -> bool {
        if !self.config.enabled {
            return true;
        }

        let capacity = f64::from(self.config.burst);
        let now = Instant::now();

        if let Some(mut bucket) = self.clients.get_mut(client) {
            return bucket.try_acquire(capacity, self.config.requests_per_second, now);
        }

        match self.clients.entry(client.to_owned()) {
            Entry::Occupied(mut entry) => {
                entry
                    .get_mut()
                    .try_acquire(capacity, self.config.requests_per_second, now)
            }
            Entry::Vacant(entry) => {
                entry.insert(ClientBucket::first_request(capacity, now));
                true
            }
        }
    }

    /// Removes buckets idle for longer than the configured timeout and returns
    /// how many were removed.
    pub fn evict_idle(&self) -> usize {
        let _guard = self.sweep_lock.lock();
        let now = Instant::now();
        let idle_timeout = self.config.idle_timeout;

        let before = self.clients.len();
        self.clients
            .retain(|_, bucket| now.saturating_duration_since(bucket.last_seen_at) <= idle_timeout);
        before.saturating_sub(self.clients.len())
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    fn spawn_sweeper(self: &Arc<Self>) {
        let mut slot = self.sweeper.lock();
        if slot.is_some() {
            return;
        }

        let (stop, mut stopped) = oneshot::channel();
        let limiter: Weak<Self> = Arc::downgrade(self);
        let period = self.config.sweep_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = ticker.tick() => {
                        let Some(limiter) = limiter.upgrade() else { break };
                        let removed = limiter.evict_idle();
                        if removed > 0 {
                            tracing::debug!(
                                removed,
                                remaining = limiter.client_count(),
                                "rate limiter evicted idle clients"
                            );
                        }
                    }
                }
            }
        });

        *slot = Some(Sweeper { stop, handle });
    }

    /// Stops the eviction sweep and waits for it to exit.
    pub async fn shutdown(&self) {
        let sweeper = self.sweeper.lock().take();
        if let Some(Sweeper { stop, handle }) = sweeper {
            let _ = stop.send(());
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "rate limiter sweeper ended abnormally");
            }
        }
    }
}

/// Derives the client key from the request. Fails when no origin is known.
pub fn client_identity(req: &Request, trust_proxy_headers: bool) -> Result<String, AppError> {
    if trust_proxy_headers {
        let forwarded = req
            .headers()
            .get("x-real-ip")
            .and_then(|h| h.to_str().ok())
            .or_else(|| {
                req.headers()
                    .get("x-forwarded-for")
                    .and_then(|h| h.to_str().ok())
                    .and_then(|s| s.split(',').find(|ip| !ip.trim().is_empty()))
            })
            .map(str::trim)
            .filter(|ip| !ip.is_empty());

        if let Some(ip) = forwarded {
            return Ok(ip.to_string());
        }
    }

    let extensions = req.extensions();
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
        .or_else(|| {
            extensions
                .get::<MockConnectInfo<SocketAddr>>()
                .map(|MockConnectInfo(addr)| *addr)
        })
        .map(|addr| addr.ip().to_string())
        .ok_or_else(|| AppError::internal("unable to determine client address"))
}

pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request,
    next: Next,
) -> Response {
    if !limiter.config().enabled {
        return next.run(req).await;
    }

    let client = match client_identity(&req, limiter.config().trust_proxy_headers) {
        Ok(client) => client,
        Err(err) => return err.into_response(),
    };

    if !limiter.allow(&client) {
        tracing::debug!(client = %client, "rate limit exceeded");
        return AppError::RateLimitExceeded.into_response();
    }

    next.run(req).await
}
