//! Serializable metrics export.

use crate::config::RotationStrategy;
use crate::metrics::{CircuitState, ProxyMetrics};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Point-in-time view of one proxy's metrics. Durations are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProxySnapshot {
    pub proxy: String,
    pub available: bool,
    pub success_rate: f64,
    pub health_score: f64,
    pub total_requests: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub cumulative_response_time: f64,
    pub avg_response_time: f64,
    pub min_response_time: Option<f64>,
    pub max_response_time: f64,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    pub times_used: u64,
    pub circuit_state: CircuitState,
    pub circuit_opened_at: Option<DateTime<Utc>>,
    pub first_used: Option<DateTime<Utc>>,
    pub last_used: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
}

impl ProxySnapshot {
    pub(crate) fn new(
        proxy: &str,
        metrics: &ProxyMetrics,
        available: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            proxy: proxy.to_string(),
            available,
            success_rate: metrics.success_rate(),
            health_score: metrics.health_score_at(now),
            total_requests: metrics.total_requests,
            success_count: metrics.success_count,
            failure_count: metrics.failure_count,
            cumulative_response_time: metrics.cumulative_response_time.as_secs_f64(),
            avg_response_time: metrics.average_response_time().as_secs_f64(),
            min_response_time: metrics.min_response_time.map(|d| d.as_secs_f64()),
            max_response_time: metrics.max_response_time.as_secs_f64(),
            consecutive_successes: metrics.consecutive_successes,
            consecutive_failures: metrics.consecutive_failures,
            times_used: metrics.times_used,
            circuit_state: metrics.circuit_state,
            circuit_opened_at: metrics.circuit_opened_at,
            first_used: metrics.first_used,
            last_used: metrics.last_used,
            last_success: metrics.last_success,
            last_failure: metrics.last_failure,
        }
    }
}

/// Pool-wide metrics with one entry per proxy in rotation order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolSnapshot {
    pub taken_at: DateTime<Utc>,
    pub rotation_strategy: RotationStrategy,
    pub total_proxies: usize,
    pub available_proxies: usize,
    pub total_requests: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub proxies: Vec<ProxySnapshot>,
}

impl PoolSnapshot {
    pub(crate) fn new(
        rotation_strategy: RotationStrategy,
        proxies: Vec<ProxySnapshot>,
        taken_at: DateTime<Utc>,
    ) -> Self {
        Self {
            taken_at,
            rotation_strategy,
            total_proxies: proxies.len(),
            available_proxies: proxies.iter().filter(|p| p.available).count(),
            total_requests: proxies.iter().map(|p| p.total_requests).sum(),
            success_count: proxies.iter().map(|p| p.success_count).sum(),
            failure_count: proxies.iter().map(|p| p.failure_count).sum(),
            proxies,
        }
    }

    /// Look up one proxy's entry.
    pub fn get(&self, proxy: &str) -> Option<&ProxySnapshot> {
        self.proxies.iter().find(|p| p.proxy == proxy)
    }

    /// Serialize to a JSON value for a monitoring sink.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn aggregates_and_serializes() {
        let now = Utc::now();
        let mut good = ProxyMetrics::new();
        good.record_success(Some(Duration::from_millis(250)));
        let mut bad = ProxyMetrics::new();
        bad.record_failure();
        bad.record_failure();

        let snapshot = PoolSnapshot::new(
            RotationStrategy::RoundRobin,
            vec![
                ProxySnapshot::new("http://good:1", &good, true, now),
                ProxySnapshot::new("http://bad:1", &bad, false, now),
            ],
            now,
        );
        assert_eq!(snapshot.total_proxies, 2);
        assert_eq!(snapshot.available_proxies, 1);
        assert_eq!(snapshot.total_requests, 3);
        assert_eq!(snapshot.failure_count, 2);

        let json = snapshot.to_json();
        assert_eq!(json["rotation_strategy"], "round_robin");
        assert_eq!(json["proxies"][0]["min_response_time"], 0.25);
        assert_eq!(json["proxies"][1]["min_response_time"], serde_json::Value::Null);
        assert_eq!(json["proxies"][1]["circuit_state"], "closed");
        assert!(json["proxies"][0]["last_success"].is_string());
    }
}
