//! # proxy-rotor
//!
//! A resilient proxy pool: health scoring, rotation strategies, retry with
//! exponential backoff and jitter, and per-proxy circuit breaking.
//!
//! The pool never performs requests on its own except health probes. Callers
//! hand [`ProxyPool::run_with_retry`] an operation to run against a proxy, or
//! use [`ProxyPool::get_proxy`] and report outcomes themselves. The
//! [`ProxyPoolMiddleware`] plugs the pool into `reqwest-middleware`.

pub mod circuit;
pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod middleware;
pub mod pool;
mod proxy;
mod retry;
mod selector;
pub mod snapshot;
mod utils;

pub use circuit::{CircuitBreaker, Transition};
pub use config::{
    CircuitBreakerConfig, HealthCheckConfig, ProxyPoolConfig, ProxyPoolConfigBuilder, RetryConfig,
    RotationStrategy,
};
pub use error::{NoProxyAvailable, ProbeError, ProxyPoolError, RetryError};
pub use health::{HealthProbe, HttpProbe};
pub use metrics::{CircuitState, ProxyMetrics};
pub use middleware::ProxyPoolMiddleware;
pub use pool::ProxyPool;
pub use snapshot::{PoolSnapshot, ProxySnapshot};
