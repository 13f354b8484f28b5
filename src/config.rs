//! Configuration for the proxy pool.

use crate::error::ProxyPoolError;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Strategy for selecting a proxy from the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationStrategy {
    /// Cycle through available proxies in insertion order.
    RoundRobin,
    /// Draw proportionally to each proxy's health score.
    #[default]
    Weighted,
    /// Uniform random draw.
    Random,
    /// Pick the proxy that has been handed out the fewest times.
    LeastUsed,
}

impl RotationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::Weighted => "weighted",
            Self::Random => "random",
            Self::LeastUsed => "least_used",
        }
    }
}

impl fmt::Display for RotationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RotationStrategy {
    type Err = ProxyPoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "round_robin" | "roundrobin" => Ok(Self::RoundRobin),
            "weighted" => Ok(Self::Weighted),
            "random" => Ok(Self::Random),
            "least_used" | "leastused" => Ok(Self::LeastUsed),
            other => Err(ProxyPoolError::InvalidConfig(format!(
                "unknown rotation strategy `{other}`"
            ))),
        }
    }
}

/// Retry and backoff policy used by
/// [`ProxyPool::run_with_retry`](crate::ProxyPool::run_with_retry).
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt; total attempts are `max_retries + 1`.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on the delay before jitter is applied.
    pub max_delay: Duration,
    /// Growth factor applied per failed attempt.
    pub exponential_base: f64,
    /// Whether to perturb delays with random jitter.
    pub jitter: bool,
    /// Jitter multiplier range; the delay is scaled by `1 + U(min, max)`.
    pub jitter_range: (f64, f64),
    /// Bound on a single invocation of the caller's operation.
    pub attempt_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter: true,
            jitter_range: (0.1, 0.5),
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

/// Circuit breaker policy applied to every proxy.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open a closed circuit.
    pub failure_threshold: u32,
    /// Successes while half-open needed to close the circuit.
    pub success_threshold: u32,
    /// How long an open circuit rejects selection before going half-open.
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout: Duration::from_secs(60),
        }
    }
}

/// Background health check policy.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthCheckConfig {
    /// Whether the background monitor runs at all.
    pub enabled: bool,
    /// Interval between health check ticks.
    pub interval: Duration,
    /// Timeout for a single probe.
    pub probe_timeout: Duration,
    /// URL requested through each proxy.
    pub url: String,
    /// How long shutdown waits for an in-flight tick.
    pub shutdown_timeout: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(300),
            probe_timeout: Duration::from_secs(5),
            url: "http://httpbin.org/ip".to_string(),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Configuration for the proxy pool.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyPoolConfig {
    /// Proxies registered at construction, in rotation order.
    pub proxies: Vec<String>,
    /// Strategy for selecting proxies.
    pub rotation_strategy: RotationStrategy,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub health_check: HealthCheckConfig,
    /// Maximum requests per second per proxy, if rate limited.
    pub max_requests_per_second: Option<f64>,
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        ProxyPoolConfigBuilder::new().build()
    }
}

impl ProxyPoolConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ProxyPoolConfigBuilder {
        ProxyPoolConfigBuilder::new()
    }

    /// Check that the configuration is internally consistent.
    pub fn validate(&self) -> Result<(), ProxyPoolError> {
        let retry = &self.retry;
        if !retry.exponential_base.is_finite() || retry.exponential_base < 1.0 {
            return Err(invalid("retry.exponential_base must be a finite value >= 1.0"));
        }
        if retry.initial_delay > retry.max_delay {
            return Err(invalid("retry.initial_delay must not exceed retry.max_delay"));
        }
        let (jitter_min, jitter_max) = retry.jitter_range;
        if !(jitter_min.is_finite() && jitter_max.is_finite())
            || jitter_min < 0.0
            || jitter_min > jitter_max
        {
            return Err(invalid("retry.jitter_range must satisfy 0 <= min <= max"));
        }
        if retry.attempt_timeout.is_zero() {
            return Err(invalid("retry.attempt_timeout must be non-zero"));
        }

        let circuit = &self.circuit_breaker;
        if circuit.failure_threshold == 0 || circuit.success_threshold == 0 {
            return Err(invalid("circuit breaker thresholds must be at least 1"));
        }

        let health = &self.health_check;
        if health.enabled {
            if health.interval.is_zero() || health.probe_timeout.is_zero() {
                return Err(invalid("health check interval and probe_timeout must be non-zero"));
            }
            url::Url::parse(&health.url).map_err(|e| {
                invalid(format!("health check url `{}` is invalid: {e}", health.url))
            })?;
        }

        if let Some(rps) = self.max_requests_per_second {
            if !rps.is_finite() || rps <= 0.0 {
                return Err(invalid("max_requests_per_second must be positive"));
            }
        }

        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> ProxyPoolError {
    ProxyPoolError::InvalidConfig(msg.into())
}

/// Builder for `ProxyPoolConfig`.
#[derive(Default)]
pub struct ProxyPoolConfigBuilder {
    proxies: Vec<String>,
    rotation_strategy: Option<RotationStrategy>,
    retry: Option<RetryConfig>,
    circuit_breaker: Option<CircuitBreakerConfig>,
    health_check: Option<HealthCheckConfig>,
    max_requests_per_second: Option<f64>,
}

impl ProxyPoolConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the proxies registered at construction.
    pub fn proxies(mut self, proxies: Vec<impl Into<String>>) -> Self {
        self.proxies = proxies.into_iter().map(Into::into).collect();
        self
    }

    /// Set the strategy for selecting proxies.
    pub fn rotation_strategy(mut self, strategy: RotationStrategy) -> Self {
        self.rotation_strategy = Some(strategy);
        self
    }

    /// Set the retry and backoff policy.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Set the circuit breaker policy.
    pub fn circuit_breaker(mut self, circuit_breaker: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(circuit_breaker);
        self
    }

    /// Set the health check policy.
    pub fn health_check(mut self, health_check: HealthCheckConfig) -> Self {
        self.health_check = Some(health_check);
        self
    }

    /// Disable the background health monitor.
    pub fn without_health_check(mut self) -> Self {
        let mut health_check = self.health_check.take().unwrap_or_default();
        health_check.enabled = false;
        self.health_check = Some(health_check);
        self
    }

    /// Set the maximum requests per second per proxy.
    pub fn max_requests_per_second(mut self, rps: f64) -> Self {
        self.max_requests_per_second = Some(rps);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ProxyPoolConfig {
        ProxyPoolConfig {
            proxies: self.proxies,
            rotation_strategy: self.rotation_strategy.unwrap_or_default(),
            retry: self.retry.unwrap_or_default(),
            circuit_breaker: self.circuit_breaker.unwrap_or_default(),
            health_check: self.health_check.unwrap_or_default(),
            max_requests_per_second: self.max_requests_per_second,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ProxyPoolConfig::default();
        assert_eq!(config.rotation_strategy, RotationStrategy::Weighted);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.initial_delay, Duration::from_secs(1));
        assert_eq!(config.retry.max_delay, Duration::from_secs(60));
        assert_eq!(config.retry.jitter_range, (0.1, 0.5));
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.circuit_breaker.success_threshold, 2);
        assert_eq!(config.circuit_breaker.open_timeout, Duration::from_secs(60));
        assert_eq!(config.health_check.interval, Duration::from_secs(300));
        assert_eq!(config.health_check.probe_timeout, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn strategy_parses_common_spellings() {
        assert_eq!(
            "round-robin".parse::<RotationStrategy>().unwrap(),
            RotationStrategy::RoundRobin
        );
        assert_eq!("LEAST_USED".parse::<RotationStrategy>().unwrap(), RotationStrategy::LeastUsed);
        assert_eq!(RotationStrategy::Random.to_string(), "random");
        assert!("fastest".parse::<RotationStrategy>().is_err());
    }

    #[test]
    fn validation_rejects_inconsistent_values() {
        let mut config = ProxyPoolConfig::default();
        config.retry.initial_delay = Duration::from_secs(120);
        assert!(config.validate().is_err());

        let mut config = ProxyPoolConfig::default();
        config.retry.jitter_range = (0.5, 0.1);
        assert!(config.validate().is_err());

        let mut config = ProxyPoolConfig::default();
        config.circuit_breaker.failure_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = ProxyPoolConfig::default();
        config.health_check.url = "not a url".into();
        assert!(config.validate().is_err());

        // a bad url is irrelevant when the monitor is off
        config.health_check.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn without_health_check_keeps_other_settings() {
        let config = ProxyPoolConfig::builder()
            .health_check(HealthCheckConfig {
                interval: Duration::from_secs(10),
                ..Default::default()
            })
            .without_health_check()
            .build();
        assert!(!config.health_check.enabled);
        assert_eq!(config.health_check.interval, Duration::from_secs(10));
    }
}
