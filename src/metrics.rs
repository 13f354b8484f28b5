//! Per-proxy request metrics and the derived health score.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Circuit breaker state of a proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation.
    #[default]
    Closed,
    /// Failing; rejected by selection until the open timeout passes.
    Open,
    /// On probation after the open timeout.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Counters and timestamps accumulated for one proxy.
///
/// `success_count + failure_count == total_requests` after every update, and at
/// most one of the two consecutive counters is non-zero.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyMetrics {
    pub total_requests: u64,
    pub success_count: u64,
    pub failure_count: u64,

    /// Sum of all reported response times.
    pub cumulative_response_time: Duration,
    /// Fastest reported response, `None` until one is reported.
    pub min_response_time: Option<Duration>,
    pub max_response_time: Duration,

    pub first_used: Option<DateTime<Utc>>,
    pub last_used: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,

    pub consecutive_successes: u32,
    pub consecutive_failures: u32,

    /// How many times selection handed this proxy out.
    pub times_used: u64,

    pub circuit_state: CircuitState,
    /// Set only while the circuit is open.
    pub circuit_opened_at: Option<DateTime<Utc>>,

    /// Successes carrying a response time; the divisor for the average.
    pub(crate) timed_requests: u64,
    /// Successes recorded since the circuit last went half-open.
    pub(crate) half_open_successes: u32,
}

impl Default for ProxyMetrics {
    fn default() -> Self {
        Self {
            total_requests: 0,
            success_count: 0,
            failure_count: 0,
            cumulative_response_time: Duration::ZERO,
            min_response_time: None,
            max_response_time: Duration::ZERO,
            first_used: None,
            last_used: None,
            last_success: None,
            last_failure: None,
            consecutive_successes: 0,
            consecutive_failures: 0,
            times_used: 0,
            circuit_state: CircuitState::Closed,
            circuit_opened_at: None,
            timed_requests: 0,
            half_open_successes: 0,
        }
    }
}

impl ProxyMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful request, optionally with its response time.
    pub fn record_success(&mut self, response_time: Option<Duration>) {
        self.record_success_at(response_time, Utc::now());
    }

    /// Record a failed request.
    pub fn record_failure(&mut self) {
        self.record_failure_at(Utc::now());
    }

    pub(crate) fn record_success_at(
        &mut self,
        response_time: Option<Duration>,
        now: DateTime<Utc>,
    ) {
        self.total_requests += 1;
        self.success_count += 1;
        self.last_success = Some(now);
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;

        if let Some(elapsed) = response_time {
            self.timed_requests += 1;
            self.cumulative_response_time += elapsed;
            self.min_response_time = Some(match self.min_response_time {
                Some(min) => min.min(elapsed),
                None => elapsed,
            });
            self.max_response_time = self.max_response_time.max(elapsed);
        }
    }

    pub(crate) fn record_failure_at(&mut self, now: DateTime<Utc>) {
        self.total_requests += 1;
        self.failure_count += 1;
        self.last_failure = Some(now);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
    }

    /// Count a selection of this proxy.
    pub(crate) fn record_selection_at(&mut self, now: DateTime<Utc>) {
        self.times_used += 1;
        self.last_used = Some(now);
        self.first_used.get_or_insert(now);
    }

    /// Fraction of successful requests; 1.0 for a proxy that was never tried.
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 1.0;
        }
        self.success_count as f64 / self.total_requests as f64
    }

    /// Mean response time over the successes that reported one.
    pub fn average_response_time(&self) -> Duration {
        if self.timed_requests == 0 {
            return Duration::ZERO;
        }
        self.cumulative_response_time.div_f64(self.timed_requests as f64)
    }

    /// Health estimate in `[0, 1]`, recomputed on every call.
    pub fn health_score(&self) -> f64 {
        self.health_score_at(Utc::now())
    }

    pub(crate) fn health_score_at(&self, now: DateTime<Utc>) -> f64 {
        if self.total_requests == 0 {
            return 1.0;
        }

        // Missing timing or success data is neutral.
        let time_score = if self.timed_requests > 0 {
            1.0 / (1.0 + self.average_response_time().as_secs_f64())
        } else {
            1.0
        };

        let recency_score = match self.last_success {
            Some(at) => {
                let hours = (now - at).num_milliseconds().max(0) as f64 / 3_600_000.0;
                1.0 / (1.0 + hours)
            }
            None => 1.0,
        };

        let consistency_score = (self.consecutive_successes as f64 / 10.0).min(1.0);

        let score = 0.50 * self.success_rate()
            + 0.25 * time_score
            + 0.15 * recency_score
            + 0.10 * consistency_score;

        score.clamp(0.0, 1.0)
    }

    /// Zero every counter and close the circuit.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn untried_proxy_is_optimistically_healthy() {
        let metrics = ProxyMetrics::new();
        assert_eq!(metrics.success_rate(), 1.0);
        assert_eq!(metrics.health_score(), 1.0);
        assert_eq!(metrics.min_response_time, None);
        assert_eq!(metrics.average_response_time(), Duration::ZERO);
    }

    #[test]
    fn counters_stay_consistent() {
        let mut metrics = ProxyMetrics::new();
        for i in 0..25 {
            if i % 3 == 0 {
                metrics.record_failure();
                assert_eq!(metrics.consecutive_successes, 0);
                assert!(metrics.consecutive_failures > 0);
            } else {
                metrics.record_success(Some(Duration::from_millis(100 + i)));
                assert_eq!(metrics.consecutive_failures, 0);
                assert!(metrics.consecutive_successes > 0);
            }
            assert_eq!(
                metrics.success_count + metrics.failure_count,
                metrics.total_requests
            );
        }
        assert_eq!(metrics.total_requests, 25);
    }

    #[test]
    fn response_times_track_min_max_and_average() {
        let mut metrics = ProxyMetrics::new();
        metrics.record_success(Some(Duration::from_millis(200)));
        metrics.record_success(Some(Duration::from_millis(400)));
        metrics.record_success(None);

        assert_eq!(metrics.min_response_time, Some(Duration::from_millis(200)));
        assert_eq!(metrics.max_response_time, Duration::from_millis(400));
        assert_eq!(metrics.average_response_time(), Duration::from_millis(300));
        assert_eq!(metrics.success_count, 3);
    }

    #[test]
    fn health_score_blends_components() {
        let now = Utc::now();
        let mut metrics = ProxyMetrics::new();
        for _ in 0..10 {
            metrics.record_success_at(Some(Duration::from_secs(1)), now);
        }
        // 0.5 * 1 + 0.25 * 0.5 + 0.15 * 1 + 0.1 * 1
        let score = metrics.health_score_at(now);
        assert!((score - 0.875).abs() < 1e-9, "score was {score}");

        // an hour later the recency term halves
        let later = now + TimeDelta::hours(1);
        let score = metrics.health_score_at(later);
        assert!((score - 0.8).abs() < 1e-9, "score was {score}");
    }

    #[test]
    fn never_succeeded_proxy_keeps_neutral_terms() {
        let mut metrics = ProxyMetrics::new();
        for _ in 0..5 {
            metrics.record_failure();
        }
        assert_eq!(metrics.success_rate(), 0.0);
        // only the time and recency terms remain: 0.25 + 0.15
        let score = metrics.health_score();
        assert!((score - 0.40).abs() < 1e-9, "score was {score}");
    }

    #[test]
    fn slow_stale_failing_proxy_scores_near_zero() {
        let now = Utc::now();
        let mut metrics = ProxyMetrics::new();
        metrics.record_success_at(Some(Duration::from_secs(3600)), now - TimeDelta::days(30));
        for _ in 0..999 {
            metrics.record_failure_at(now);
        }
        let score = metrics.health_score_at(now);
        assert!(score < 0.01, "score was {score}");
    }

    #[test]
    fn selection_stamps_first_and_last_use() {
        let start = Utc::now();
        let mut metrics = ProxyMetrics::new();
        metrics.record_selection_at(start);
        metrics.record_selection_at(start + TimeDelta::seconds(5));

        assert_eq!(metrics.times_used, 2);
        assert_eq!(metrics.first_used, Some(start));
        assert_eq!(metrics.last_used, Some(start + TimeDelta::seconds(5)));
        // selection is independent of outcomes
        assert_eq!(metrics.total_requests, 0);
    }

    #[test]
    fn reset_zeroes_everything() {
        let mut metrics = ProxyMetrics::new();
        metrics.record_failure();
        metrics.circuit_state = CircuitState::Open;
        metrics.circuit_opened_at = Some(Utc::now());
        metrics.reset();
        assert_eq!(metrics, ProxyMetrics::default());
    }
}
