//! A registered proxy and its per-proxy state.

use crate::metrics::ProxyMetrics;

use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

pub(crate) type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Pool entry for one proxy.
pub(crate) struct ProxyEntry {
    /// The proxy identifier (e.g. "socks5://127.0.0.1:1080").
    pub url: String,
    /// Outcome counters and circuit state.
    pub metrics: ProxyMetrics,
    /// Rate limiter shared with in-flight attempts, if the pool is rate limited.
    pub(crate) limiter: Option<Arc<Limiter>>,
}

impl ProxyEntry {
    /// Create a new entry, rate limited when `max_rps` is given.
    pub(crate) fn new(url: String, max_rps: Option<f64>) -> Self {
        let limiter = max_rps.map(|rps| {
            let per_second = NonZeroU32::new(rps.ceil() as u32).unwrap_or(NonZeroU32::MIN);
            Arc::new(RateLimiter::direct(Quota::per_second(per_second)))
        });

        Self {
            url,
            metrics: ProxyMetrics::new(),
            limiter,
        }
    }
}
