//! Error types for the proxy-rotor crate.

use std::time::Duration;
use thiserror::Error;

/// Error returned when no proxy is available in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("No proxy available in pool")]
pub struct NoProxyAvailable;

/// Errors raised while building or operating a pool.
#[derive(Debug, Error)]
pub enum ProxyPoolError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("health monitor requires a running tokio runtime")]
    NoRuntime,
}

/// Terminal error of [`ProxyPool::run_with_retry`](crate::ProxyPool::run_with_retry).
///
/// Carries the last failure observed. `NoProxyAvailable` is only returned when
/// no attempt ever obtained a proxy.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("operation through {proxy} failed: {error}")]
    Operation { proxy: String, error: E },

    #[error("operation through {proxy} timed out after {after:?}")]
    Timeout { proxy: String, after: Duration },

    #[error("No proxy available in pool")]
    NoProxyAvailable,
}

impl<E> RetryError<E> {
    /// The proxy used by the failing attempt, if any.
    pub fn proxy(&self) -> Option<&str> {
        match self {
            Self::Operation { proxy, .. } | Self::Timeout { proxy, .. } => Some(proxy),
            Self::NoProxyAvailable => None,
        }
    }

    /// Unwrap the caller's own error, if the last failure was one.
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::Operation { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Failure of a single health probe.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("cannot route through proxy: {0}")]
    Client(#[source] reqwest::Error),

    #[error("probe request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("unhealthy status: {0}")]
    Status(http::StatusCode),

    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
}
