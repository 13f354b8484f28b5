//! Middleware implementation for reqwest.

use crate::config::ProxyPoolConfig;
use crate::error::RetryError;
use crate::pool::ProxyPool;

use anyhow::anyhow;
use async_trait::async_trait;
use log::{info, warn};
use reqwest_middleware::{Error, Middleware, Next, Result};
use std::sync::Arc;
use std::time::Duration;

/// Middleware that sends each request through a proxy chosen by the pool.
///
/// Requests are retried on other proxies per the pool's retry policy. The
/// inner middleware chain is bypassed because every attempt needs its own
/// client routed through a different proxy.
#[derive(Clone)]
pub struct ProxyPoolMiddleware {
    /// The proxy pool.
    pool: Arc<ProxyPool>,
    /// Timeout applied by the per-proxy client.
    request_timeout: Duration,
}

impl ProxyPoolMiddleware {
    /// Wrap an existing pool.
    pub fn new(pool: Arc<ProxyPool>) -> Self {
        let request_timeout = pool.config.retry.attempt_timeout;
        Self {
            pool,
            request_timeout,
        }
    }

    /// Build a pool from `config` and wrap it.
    pub fn from_config(config: ProxyPoolConfig) -> Result<Self> {
        let pool = ProxyPool::new(config).map_err(|e| Error::Middleware(anyhow!(e)))?;
        let (total, available) = pool.stats();
        info!("Proxy pool initialized with {}/{} available proxies", available, total);
        if total == 0 {
            warn!("No proxies available in pool");
        }
        Ok(Self::new(pool))
    }

    /// The pool backing this middleware.
    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }
}

#[async_trait]
impl Middleware for ProxyPoolMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        _extensions: &mut http::Extensions,
        _next: Next<'_>,
    ) -> Result<reqwest::Response> {
        let timeout = self.request_timeout;

        let outcome = self
            .pool
            .run_with_retry(
                |proxy_url| {
                    let request = req.try_clone();
                    async move {
                        let request = request.ok_or_else(|| {
                            Error::Middleware(anyhow!(
                                "Request object is not cloneable. Are you passing a streaming body?"
                            ))
                        })?;
                        let client = reqwest::Client::builder()
                            .proxy(reqwest::Proxy::all(&proxy_url)?)
                            .timeout(timeout)
                            .build()?;
                        Ok::<_, Error>(client.execute(request).await?)
                    }
                },
                None,
            )
            .await;

        outcome.map_err(|e| match e {
            RetryError::Operation { error, .. } => error,
            other => Error::Middleware(anyhow!(other.to_string())),
        })
    }
}
