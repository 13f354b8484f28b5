//! Background health checks.
//!
//! The monitor probes every proxy whose circuit admits traffic (including
//! open circuits whose timeout has passed) and feeds the outcome back through
//! the same reporting path real requests use.

use crate::error::ProbeError;
use crate::pool::ProxyPool;

use async_trait::async_trait;
use futures::future;
use log::{debug, info, warn};
use std::sync::Weak;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Checks whether a proxy can reach a target.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Request `target` through `proxy`, giving up after `timeout`.
    async fn probe(&self, proxy: &str, target: &str, timeout: Duration) -> Result<(), ProbeError>;
}

/// Probe that issues an HTTP GET through the proxy and expects a 2xx status.
#[derive(Debug, Clone, Default)]
pub struct HttpProbe;

impl HttpProbe {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, proxy: &str, target: &str, timeout: Duration) -> Result<(), ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .proxy(reqwest::Proxy::all(proxy).map_err(ProbeError::Client)?)
            .build()
            .map_err(ProbeError::Client)?;

        let response = client.get(target).send().await.map_err(ProbeError::Request)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ProbeError::Status(response.status()))
        }
    }
}

impl ProxyPool {
    /// Run one round of health checks over the pool.
    ///
    /// Probes run concurrently; each is bounded by the configured probe timeout.
    pub async fn check_all_proxies(&self) {
        let targets = self.probe_targets();
        if targets.is_empty() {
            debug!("Health check skipped, no proxies due");
            return;
        }

        let health = &self.config.health_check;
        debug!("Starting health check for {} proxies", targets.len());

        let checks = targets.into_iter().map(|proxy| async move {
            let start = Instant::now();
            let outcome = match time::timeout(
                health.probe_timeout,
                self.probe.probe(&proxy, &health.url, health.probe_timeout),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(ProbeError::Timeout(health.probe_timeout)),
            };
            (proxy, outcome, start.elapsed())
        });
        let results = future::join_all(checks).await;

        let mut healthy_count = 0;
        let mut unhealthy_count = 0;
        for (proxy, outcome, elapsed) in results {
            match outcome {
                Ok(()) => {
                    healthy_count += 1;
                    debug!("Health check passed for {} in {:?}", proxy, elapsed);
                    self.report_success(&proxy, Some(elapsed));
                }
                Err(e) => {
                    unhealthy_count += 1;
                    debug!("Health check failed for {}: {}", proxy, e);
                    self.report_failure(&proxy, Some(&e.to_string()));
                }
            }
        }

        info!(
            "Health check completed: {} healthy, {} unhealthy",
            healthy_count, unhealthy_count
        );
    }
}

/// Handle to the background health check task.
pub(crate) struct HealthMonitor {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl HealthMonitor {
    /// Spawn the monitor loop. The first tick runs immediately.
    ///
    /// The task only holds a weak reference, so dropping the pool ends it.
    pub(crate) fn spawn(runtime: &Handle, pool: Weak<ProxyPool>, interval: Duration) -> Self {
        let token = CancellationToken::new();
        let cancelled = token.clone();

        let handle = runtime.spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let Some(pool) = pool.upgrade() else {
                    break;
                };
                pool.check_all_proxies().await;

                let (total, available) = pool.stats();
                info!("Proxy pool status update: {}/{} available proxies", available, total);
            }
            debug!("Health monitor loop exited");
        });

        Self { token, handle }
    }

    /// Signal the loop to stop without waiting for it.
    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }

    /// Signal the loop to stop and wait up to `grace` for the current tick.
    ///
    /// A tick still running after `grace` is aborted.
    pub(crate) async fn stop(self, grace: Duration) {
        self.token.cancel();
        let mut handle = self.handle;
        if time::timeout(grace, &mut handle).await.is_err() {
            warn!("Health check still running after {:?}, aborting it", grace);
            handle.abort();
        }
    }
}
