//! Rotation policies choosing one proxy among available candidates.

use crate::config::RotationStrategy;
use crate::metrics::ProxyMetrics;

use chrono::{DateTime, Utc};
use rand::Rng;

/// Lowest weight a candidate can get under weighted selection.
const MIN_WEIGHT: f64 = 0.01;

/// Holds the rotation strategy and the round-robin cursor.
#[derive(Debug)]
pub(crate) struct Selector {
    strategy: RotationStrategy,
    cursor: usize,
}

impl Selector {
    pub(crate) fn new(strategy: RotationStrategy) -> Self {
        Self { strategy, cursor: 0 }
    }

    pub(crate) fn strategy(&self) -> RotationStrategy {
        self.strategy
    }

    /// Pick an index into `candidates`, or `None` when there are none.
    pub(crate) fn select(
        &mut self,
        candidates: &[&ProxyMetrics],
        now: DateTime<Utc>,
    ) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }

        let index = match self.strategy {
            RotationStrategy::RoundRobin => self.round_robin(candidates.len()),
            RotationStrategy::Weighted => weighted(candidates, now),
            RotationStrategy::Random => rand::rng().random_range(0..candidates.len()),
            RotationStrategy::LeastUsed => candidates
                .iter()
                .enumerate()
                .min_by_key(|(_, metrics)| metrics.times_used)
                .map(|(i, _)| i)
                .unwrap_or(0),
        };
        Some(index)
    }

    fn round_robin(&mut self, len: usize) -> usize {
        // the candidate list may have shrunk since the last call
        if self.cursor >= len {
            self.cursor = 0;
        }
        let index = self.cursor;
        self.cursor = (self.cursor + 1) % len;
        index
    }
}

fn weighted(candidates: &[&ProxyMetrics], now: DateTime<Utc>) -> usize {
    let weights: Vec<f64> = candidates
        .iter()
        .map(|metrics| metrics.health_score_at(now).max(MIN_WEIGHT))
        .collect();
    let total: f64 = weights.iter().sum();

    let mut rng = rand::rng();
    if !(total.is_finite() && total > 0.0) {
        return rng.random_range(0..candidates.len());
    }

    let mut point = rng.random_range(0.0..total);
    for (i, weight) in weights.iter().enumerate() {
        if point < *weight {
            return i;
        }
        point -= weight;
    }
    candidates.len() - 1
}
