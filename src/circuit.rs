//! Circuit breaker for proxy availability.
//!
//! ```text
//! Closed   -> Open:     consecutive failures reach failure_threshold
//! Open     -> HalfOpen: availability checked after open_timeout (lazy)
//! HalfOpen -> Closed:   success_threshold successes while half-open
//! HalfOpen -> Open:     any failure
//! ```

use crate::config::CircuitBreakerConfig;
use crate::metrics::{CircuitState, ProxyMetrics};

use chrono::{DateTime, Utc};
use log::{info, warn};

/// A state change made by the breaker, returned so callers can log it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: CircuitState,
    pub to: CircuitState,
}

impl Transition {
    pub(crate) fn log(&self, proxy: &str) {
        match self.to {
            CircuitState::Open => warn!(
                "Proxy {} circuit opened ({} -> {})",
                proxy, self.from, self.to
            ),
            CircuitState::HalfOpen => {
                info!("Proxy {} circuit half-open, admitting trial requests", proxy)
            }
            CircuitState::Closed => info!("Proxy {} circuit closed after recovery", proxy),
        }
    }
}

/// Applies a [`CircuitBreakerConfig`] to the circuit state held in [`ProxyMetrics`].
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreaker<'a> {
    config: &'a CircuitBreakerConfig,
}

impl<'a> CircuitBreaker<'a> {
    pub fn new(config: &'a CircuitBreakerConfig) -> Self {
        Self { config }
    }

    fn timeout_elapsed(&self, metrics: &ProxyMetrics, now: DateTime<Utc>) -> bool {
        match metrics.circuit_opened_at {
            Some(opened_at) => (now - opened_at)
                .to_std()
                .map(|elapsed| elapsed >= self.config.open_timeout)
                .unwrap_or(false),
            // an open circuit without a timestamp has nothing to wait for
            None => true,
        }
    }

    /// Whether the proxy may be selected, without changing its state.
    pub fn peek(&self, metrics: &ProxyMetrics, now: DateTime<Utc>) -> bool {
        match metrics.circuit_state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => self.timeout_elapsed(metrics, now),
        }
    }

    /// Whether the proxy may be selected. An open circuit past its timeout is
    /// promoted to half-open as a side effect.
    pub fn check(
        &self,
        metrics: &mut ProxyMetrics,
        now: DateTime<Utc>,
    ) -> (bool, Option<Transition>) {
        match metrics.circuit_state {
            CircuitState::Closed | CircuitState::HalfOpen => (true, None),
            CircuitState::Open if self.timeout_elapsed(metrics, now) => {
                metrics.circuit_state = CircuitState::HalfOpen;
                metrics.circuit_opened_at = None;
                metrics.half_open_successes = 0;
                (
                    true,
                    Some(Transition {
                        from: CircuitState::Open,
                        to: CircuitState::HalfOpen,
                    }),
                )
            }
            CircuitState::Open => (false, None),
        }
    }

    /// Update circuit state after a success was recorded.
    pub fn on_success(&self, metrics: &mut ProxyMetrics) -> Option<Transition> {
        if metrics.circuit_state != CircuitState::HalfOpen {
            return None;
        }
        metrics.half_open_successes += 1;
        if metrics.half_open_successes < self.config.success_threshold {
            return None;
        }
        metrics.circuit_state = CircuitState::Closed;
        metrics.half_open_successes = 0;
        Some(Transition {
            from: CircuitState::HalfOpen,
            to: CircuitState::Closed,
        })
    }

    /// Update circuit state after a failure was recorded.
    pub fn on_failure(&self, metrics: &mut ProxyMetrics, now: DateTime<Utc>) -> Option<Transition> {
        let from = metrics.circuit_state;
        let trip = match from {
            CircuitState::Closed => metrics.consecutive_failures >= self.config.failure_threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };
        if !trip {
            return None;
        }
        metrics.circuit_state = CircuitState::Open;
        metrics.circuit_opened_at = Some(now);
        metrics.half_open_successes = 0;
        Some(Transition {
            from,
            to: CircuitState::Open,
        })
    }
}
