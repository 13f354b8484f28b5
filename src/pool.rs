//! Core proxy pool implementation.

use crate::circuit::CircuitBreaker;
use crate::config::ProxyPoolConfig;
use crate::error::{NoProxyAvailable, ProxyPoolError};
use crate::health::{HealthMonitor, HealthProbe, HttpProbe};
use crate::proxy::{Limiter, ProxyEntry};
use crate::selector::Selector;
use crate::snapshot::{PoolSnapshot, ProxySnapshot};
use crate::utils;

use chrono::Utc;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// A pool of proxies with health tracking, rotation and circuit breaking.
///
/// Every read-modify-write of the proxy list, the metrics and the rotation
/// cursor happens under a single lock that is never held across I/O.
pub struct ProxyPool {
    state: Mutex<PoolState>,
    /// Configuration for the pool.
    pub config: ProxyPoolConfig,
    pub(crate) probe: Arc<dyn HealthProbe>,
    monitor: Mutex<Option<HealthMonitor>>,
}

struct PoolState {
    /// Registered proxies in insertion order.
    order: Vec<String>,
    entries: HashMap<String, ProxyEntry>,
    selector: Selector,
}

impl ProxyPool {
    /// Create a pool probing proxies over HTTP.
    ///
    /// When health checks are enabled this must be called inside a tokio
    /// runtime, which the background monitor is spawned on.
    pub fn new(config: ProxyPoolConfig) -> Result<Arc<Self>, ProxyPoolError> {
        Self::with_probe(config, Arc::new(HttpProbe::new()))
    }

    /// Create a pool with a custom health probe.
    pub fn with_probe(
        config: ProxyPoolConfig,
        probe: Arc<dyn HealthProbe>,
    ) -> Result<Arc<Self>, ProxyPoolError> {
        config.validate()?;

        let order = utils::dedup_in_order(config.proxies.clone());
        let entries = order
            .iter()
            .map(|url| {
                let entry = ProxyEntry::new(url.clone(), config.max_requests_per_second);
                (url.clone(), entry)
            })
            .collect();

        let pool = Arc::new(Self {
            state: Mutex::new(PoolState {
                order,
                entries,
                selector: Selector::new(config.rotation_strategy),
            }),
            config,
            probe,
            monitor: Mutex::new(None),
        });

        if pool.config.health_check.enabled {
            let runtime =
                tokio::runtime::Handle::try_current().map_err(|_| ProxyPoolError::NoRuntime)?;
            let monitor = HealthMonitor::spawn(
                &runtime,
                Arc::downgrade(&pool),
                pool.config.health_check.interval,
            );
            *pool.monitor.lock() = Some(monitor);
        }

        info!(
            "Proxy pool initialized with {} proxies ({} rotation)",
            pool.len(),
            pool.config.rotation_strategy
        );
        if pool.is_empty() {
            warn!("Proxy pool started without any proxies");
        }

        Ok(pool)
    }

    /// Create a pool from a comma-separated proxy list in an environment variable.
    ///
    /// Proxies from the variable are appended to those already in `config`.
    pub fn from_env(var: &str, mut config: ProxyPoolConfig) -> Result<Arc<Self>, ProxyPoolError> {
        match std::env::var(var) {
            Ok(value) => {
                let proxies = utils::parse_proxy_list(&value);
                info!("Loaded {} proxies from ${}", proxies.len(), var);
                config.proxies.extend(proxies);
            }
            Err(e) => warn!("Cannot read proxies from ${}: {}", var, e),
        }
        Self::with_probe(config, Arc::new(HttpProbe::new()))
    }

    /// Register a proxy. Returns `false` if it was already present.
    pub fn add_proxy(&self, proxy: impl Into<String>) -> bool {
        let proxy = proxy.into();
        let mut state = self.state.lock();
        if state.entries.contains_key(&proxy) {
            return false;
        }
        let entry = ProxyEntry::new(proxy.clone(), self.config.max_requests_per_second);
        state.entries.insert(proxy.clone(), entry);
        state.order.push(proxy.clone());
        info!("Added proxy {} to pool", proxy);
        true
    }

    /// Remove a proxy and discard its metrics. Returns `false` if unknown.
    pub fn remove_proxy(&self, proxy: &str) -> bool {
        let mut state = self.state.lock();
        if state.entries.remove(proxy).is_none() {
            return false;
        }
        state.order.retain(|p| p != proxy);
        info!("Removed proxy {} from pool", proxy);
        true
    }

    /// Select the next proxy according to the rotation strategy.
    ///
    /// Proxies in `exclude` are never returned. If every remaining proxy has an
    /// open circuit, selection ignores circuit state; `None` means the pool is
    /// empty once exclusions are applied.
    pub fn get_proxy(&self, exclude: &[&str]) -> Option<String> {
        let now = Utc::now();
        let breaker = CircuitBreaker::new(&self.config.circuit_breaker);

        let mut state = self.state.lock();
        let PoolState {
            order,
            entries,
            selector,
        } = &mut *state;

        let mut available = Vec::new();
        let mut eligible = Vec::new();
        for url in order.iter().filter(|url| !exclude.contains(&url.as_str())) {
            let Some(entry) = entries.get_mut(url) else {
                continue;
            };
            let (open_for_selection, transition) = breaker.check(&mut entry.metrics, now);
            if let Some(transition) = transition {
                transition.log(url);
            }
            if open_for_selection {
                available.push(url);
            }
            eligible.push(url);
        }

        let candidates = if available.is_empty() {
            if !eligible.is_empty() {
                debug!("All circuits open, selecting among {} proxies", eligible.len());
            }
            eligible
        } else {
            available
        };

        let index = {
            let metrics: Vec<_> = candidates.iter().map(|url| &entries[*url].metrics).collect();
            selector.select(&metrics, now)?
        };
        let url = candidates[index];
        if let Some(entry) = entries.get_mut(url) {
            entry.metrics.record_selection_at(now);
        }
        Some(url.clone())
    }

    /// Like [`get_proxy`](Self::get_proxy), as an error when nothing is selectable.
    pub fn try_get_proxy(&self, exclude: &[&str]) -> Result<String, NoProxyAvailable> {
        self.get_proxy(exclude).ok_or(NoProxyAvailable)
    }

    /// Report a successful request through a proxy.
    pub fn report_success(&self, proxy: &str, response_time: Option<Duration>) {
        let breaker = CircuitBreaker::new(&self.config.circuit_breaker);
        let mut state = self.state.lock();
        let Some(entry) = state.entries.get_mut(proxy) else {
            debug!("Ignoring success for unregistered proxy {}", proxy);
            return;
        };
        entry.metrics.record_success(response_time);
        if let Some(transition) = breaker.on_success(&mut entry.metrics) {
            transition.log(proxy);
        }
    }

    /// Report a failed request through a proxy.
    pub fn report_failure(&self, proxy: &str, reason: Option<&str>) {
        let breaker = CircuitBreaker::new(&self.config.circuit_breaker);
        let mut state = self.state.lock();
        let Some(entry) = state.entries.get_mut(proxy) else {
            debug!("Ignoring failure for unregistered proxy {}", proxy);
            return;
        };
        entry.metrics.record_failure();
        debug!(
            "Proxy {} failed ({} in a row): {}",
            proxy,
            entry.metrics.consecutive_failures,
            reason.unwrap_or("unknown error")
        );
        if let Some(transition) = breaker.on_failure(&mut entry.metrics, Utc::now()) {
            transition.log(proxy);
        }
    }

    /// Zero a proxy's metrics and close its circuit. Returns `false` if unknown.
    pub fn reset(&self, proxy: &str) -> bool {
        let mut state = self.state.lock();
        match state.entries.get_mut(proxy) {
            Some(entry) => {
                entry.metrics.reset();
                info!("Reset metrics for proxy {}", proxy);
                true
            }
            None => false,
        }
    }

    /// Metrics for every proxy, in rotation order.
    ///
    /// Taking a snapshot never changes circuit state.
    pub fn snapshot(&self) -> PoolSnapshot {
        let now = Utc::now();
        let breaker = CircuitBreaker::new(&self.config.circuit_breaker);
        let state = self.state.lock();
        let proxies = state
            .order
            .iter()
            .filter_map(|url| state.entries.get(url))
            .map(|entry| {
                let available = breaker.peek(&entry.metrics, now);
                ProxySnapshot::new(&entry.url, &entry.metrics, available, now)
            })
            .collect();
        PoolSnapshot::new(state.selector.strategy(), proxies, now)
    }

    /// Metrics for a single proxy.
    pub fn proxy_snapshot(&self, proxy: &str) -> Option<ProxySnapshot> {
        let now = Utc::now();
        let breaker = CircuitBreaker::new(&self.config.circuit_breaker);
        let state = self.state.lock();
        state.entries.get(proxy).map(|entry| {
            let available = breaker.peek(&entry.metrics, now);
            ProxySnapshot::new(&entry.url, &entry.metrics, available, now)
        })
    }

    /// Registered proxies in rotation order.
    pub fn proxies(&self) -> Vec<String> {
        self.state.lock().order.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get statistics about the proxy pool: (total, available).
    pub fn stats(&self) -> (usize, usize) {
        let now = Utc::now();
        let breaker = CircuitBreaker::new(&self.config.circuit_breaker);
        let state = self.state.lock();
        let available = state
            .entries
            .values()
            .filter(|entry| breaker.peek(&entry.metrics, now))
            .count();
        (state.order.len(), available)
    }

    /// Stop the health monitor, waiting for an in-flight tick to finish.
    ///
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        let monitor = self.monitor.lock().take();
        if let Some(monitor) = monitor {
            monitor.stop(self.config.health_check.shutdown_timeout).await;
            info!("Proxy pool health monitor stopped");
        }
    }

    /// Proxies the health monitor should probe this tick.
    ///
    /// Open circuits past their timeout are promoted to half-open here, the
    /// same way selection promotes them.
    pub(crate) fn probe_targets(&self) -> Vec<String> {
        let now = Utc::now();
        let breaker = CircuitBreaker::new(&self.config.circuit_breaker);
        let mut state = self.state.lock();
        let PoolState { order, entries, .. } = &mut *state;
        order
            .iter()
            .filter(|url| {
                let Some(entry) = entries.get_mut(*url) else {
                    return false;
                };
                let (due, transition) = breaker.check(&mut entry.metrics, now);
                if let Some(transition) = transition {
                    transition.log(url);
                }
                due
            })
            .cloned()
            .collect()
    }

    pub(crate) fn limiter(&self, proxy: &str) -> Option<Arc<Limiter>> {
        self.state
            .lock()
            .entries
            .get(proxy)
            .and_then(|entry| entry.limiter.clone())
    }
}

impl Drop for ProxyPool {
    fn drop(&mut self) {
        if let Some(monitor) = self.monitor.get_mut().take() {
            monitor.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CircuitBreakerConfig, RotationStrategy};
    use crate::metrics::CircuitState;

    fn pool(strategy: RotationStrategy, proxies: &[&str]) -> Arc<ProxyPool> {
        let config = ProxyPoolConfig::builder()
            .proxies(proxies.to_vec())
            .rotation_strategy(strategy)
            .circuit_breaker(CircuitBreakerConfig {
                failure_threshold: 2,
                success_threshold: 1,
                open_timeout: Duration::from_secs(3600),
            })
            .without_health_check()
            .build();
        ProxyPool::new(config).unwrap()
    }

    #[test]
    fn duplicate_registrations_collapse() {
        let pool = pool(RotationStrategy::RoundRobin, &["a", "b", "a"]);
        assert_eq!(pool.proxies(), vec!["a", "b"]);
        assert!(!pool.add_proxy("b"));
        assert!(pool.add_proxy("c"));
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn exclusion_can_empty_the_pool() {
        let pool = pool(RotationStrategy::RoundRobin, &["a"]);
        assert_eq!(pool.get_proxy(&["a"]), None);
        assert_eq!(pool.try_get_proxy(&["a"]), Err(NoProxyAvailable));
        assert_eq!(pool.get_proxy(&[]), Some("a".to_string()));
    }

    #[test]
    fn open_circuit_is_skipped_while_alternatives_exist() {
        let pool = pool(RotationStrategy::RoundRobin, &["a", "b"]);
        pool.report_failure("a", Some("refused"));
        pool.report_failure("a", None);
        assert_eq!(pool.proxy_snapshot("a").unwrap().circuit_state, CircuitState::Open);

        for _ in 0..5 {
            assert_eq!(pool.get_proxy(&[]).as_deref(), Some("b"));
        }
        assert_eq!(pool.stats(), (2, 1));
    }

    #[test]
    fn open_circuits_fall_back_to_any_proxy() {
        let pool = pool(RotationStrategy::RoundRobin, &["a", "b"]);
        for proxy in ["a", "b"] {
            pool.report_failure(proxy, None);
            pool.report_failure(proxy, None);
        }
        assert!(pool.get_proxy(&[]).is_some());
        assert_eq!(pool.get_proxy(&["a"]).as_deref(), Some("b"));
    }

    #[test]
    fn selection_counts_usage() {
        let pool = pool(RotationStrategy::LeastUsed, &["a", "b"]);
        assert_eq!(pool.get_proxy(&[]).as_deref(), Some("a"));
        assert_eq!(pool.get_proxy(&[]).as_deref(), Some("b"));
        assert_eq!(pool.get_proxy(&[]).as_deref(), Some("a"));
        let snapshot = pool.snapshot();
        assert_eq!(snapshot.get("a").unwrap().times_used, 2);
        assert!(snapshot.get("a").unwrap().first_used.is_some());
        assert_eq!(snapshot.get("b").unwrap().times_used, 1);
    }

    #[test]
    fn reports_for_unknown_proxies_are_ignored() {
        let pool = pool(RotationStrategy::Random, &["a"]);
        pool.report_success("ghost", Some(Duration::from_millis(5)));
        pool.report_failure("ghost", None);
        assert!(pool.proxy_snapshot("ghost").is_none());
        assert_eq!(pool.snapshot().total_proxies, 1);
    }

    #[test]
    fn reset_closes_circuit_and_zeroes_counters() {
        let pool = pool(RotationStrategy::Random, &["a"]);
        pool.report_success("a", Some(Duration::from_millis(5)));
        pool.report_failure("a", None);
        pool.report_failure("a", None);
        assert!(pool.reset("a"));

        let snapshot = pool.proxy_snapshot("a").unwrap();
        assert_eq!(snapshot.total_requests, 0);
        assert_eq!(snapshot.consecutive_failures, 0);
        assert_eq!(snapshot.circuit_state, CircuitState::Closed);
        assert!(!pool.reset("ghost"));
    }

    #[test]
    fn weighted_selection_avoids_unhealthy_proxy() {
        let pool = pool(RotationStrategy::Weighted, &["healthy", "sick"]);
        let now = Utc::now();
        {
            let mut state = pool.state.lock();
            let healthy = &mut state.entries.get_mut("healthy").unwrap().metrics;
            for _ in 0..10 {
                healthy.record_success_at(Some(Duration::from_millis(20)), now);
            }
            let sick = &mut state.entries.get_mut("sick").unwrap().metrics;
            let long_ago = now - chrono::TimeDelta::days(30);
            sick.record_success_at(Some(Duration::from_secs(3600)), long_ago);
            for _ in 0..999 {
                sick.record_failure_at(now);
            }
        }
        let snapshot = pool.snapshot();
        assert!(snapshot.get("healthy").unwrap().health_score > 0.95);
        assert!(snapshot.get("sick").unwrap().health_score < 0.01);

        let healthy = (0..1000)
            .filter(|_| pool.get_proxy(&[]).as_deref() == Some("healthy"))
            .count();
        assert!(healthy > 950, "healthy proxy chosen {healthy}/1000 times");
    }

    #[test]
    fn health_monitor_requires_runtime() {
        let config = ProxyPoolConfig::builder().proxies(vec!["a"]).build();
        assert!(matches!(ProxyPool::new(config), Err(ProxyPoolError::NoRuntime)));
    }
}
