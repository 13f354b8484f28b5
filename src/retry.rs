//! Retry with exponential backoff, jitter and proxy substitution.

use crate::config::RetryConfig;
use crate::error::RetryError;
use crate::pool::ProxyPool;

use log::{debug, warn};
use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time;

impl RetryConfig {
    /// Delay before retrying after the `attempt`-th failure (zero-based),
    /// capped at `max_delay`, without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.exponential_base.powi(exponent);
        if secs.is_nan() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// [`base_delay`](Self::base_delay) scaled by `1 + U(jitter_range)` when jitter is on.
    ///
    /// Saturates at `Duration::MAX`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay = self.base_delay(attempt);
        if !self.jitter {
            return delay;
        }
        let (low, high) = self.jitter_range;
        let factor = if high > low {
            rand::rng().random_range(low..=high)
        } else {
            low
        };
        Duration::try_from_secs_f64(delay.as_secs_f64() * (1.0 + factor)).unwrap_or(Duration::MAX)
    }
}

impl ProxyPool {
    /// Run `operation` through a proxy, retrying on failure.
    ///
    /// At most `max_retries + 1` attempts are made. The first uses
    /// `initial_proxy` when given; later ones ask the pool for a proxy other
    /// than the one that just failed. A missing proxy counts as a failed
    /// attempt. Success and failure are reported to the pool, and the sleep
    /// between attempts never holds the pool lock.
    ///
    /// Once attempts are exhausted the last real failure is returned;
    /// [`RetryError::NoProxyAvailable`] only when no attempt got a proxy.
    pub async fn run_with_retry<F, Fut, T, E>(
        &self,
        mut operation: F,
        initial_proxy: Option<&str>,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let retry = &self.config.retry;
        let attempts = retry.max_retries.saturating_add(1);

        let mut next_proxy = initial_proxy.map(str::to_owned);
        let mut last_failed: Option<String> = None;
        let mut last_error: Option<RetryError<E>> = None;

        for attempt in 0..attempts {
            let proxy = match next_proxy.take() {
                Some(proxy) => Some(proxy),
                None => {
                    let exclude: Vec<&str> = last_failed.iter().map(String::as_str).collect();
                    self.get_proxy(&exclude)
                }
            };
            last_failed = None;

            match proxy {
                None => warn!("No proxy available (attempt {}/{})", attempt + 1, attempts),
                Some(proxy) => {
                    debug!("Using proxy: {} (attempt {}/{})", proxy, attempt + 1, attempts);

                    if let Some(limiter) = self.limiter(&proxy) {
                        limiter.until_ready().await;
                    }

                    let start = Instant::now();
                    match time::timeout(retry.attempt_timeout, operation(proxy.clone())).await {
                        Ok(Ok(value)) => {
                            self.report_success(&proxy, Some(start.elapsed()));
                            return Ok(value);
                        }
                        Ok(Err(error)) => {
                            let reason = error.to_string();
                            warn!(
                                "Request failed with proxy {} (attempt {}/{}): {}",
                                proxy,
                                attempt + 1,
                                attempts,
                                reason
                            );
                            self.report_failure(&proxy, Some(&reason));
                            last_error = Some(RetryError::Operation {
                                proxy: proxy.clone(),
                                error,
                            });
                        }
                        Err(_) => {
                            warn!(
                                "Request with proxy {} timed out after {:?} (attempt {}/{})",
                                proxy,
                                retry.attempt_timeout,
                                attempt + 1,
                                attempts
                            );
                            self.report_failure(&proxy, Some("timed out"));
                            last_error = Some(RetryError::Timeout {
                                proxy: proxy.clone(),
                                after: retry.attempt_timeout,
                            });
                        }
                    }
                    last_failed = Some(proxy);
                }
            }

            if attempt + 1 < attempts {
                let delay = retry.backoff_delay(attempt);
                debug!("Retrying in {:?}", delay);
                time::sleep(delay).await;
            }
        }

        warn!("All {} attempts exhausted", attempts);
        Err(last_error.unwrap_or(RetryError::NoProxyAvailable))
    }
}
