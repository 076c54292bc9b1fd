//! Per-context consecutive-failure counter. Deliberately the simple
//! two-state design: closed below threshold, open at/above it, no
//! half-open recovery state -- the first request after reset is just the
//! next attempt.

use std::collections::HashMap;

use tokio::sync::RwLock;

const DEFAULT_THRESHOLD: u32 = 5;

pub struct CircuitBreaker {
    threshold: u32,
    counts: RwLock<HashMap<String, u32>>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl CircuitBreaker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            counts: RwLock::new(HashMap::new()),
        }
    }

    /// `true` when the context is open (failure count >= threshold).
    pub async fn is_open(&self, context: &str) -> bool {
        self.counts.read().await.get(context).copied().unwrap_or(0) >= self.threshold
    }

    pub async fn record_success(&self, context: &str) {
        self.counts.write().await.insert(context.to_string(), 0);
    }

    pub async fn record_failure(&self, context: &str) {
        let mut counts = self.counts.write().await;
        *counts.entry(context.to_string()).or_insert(0) += 1;
    }

    pub async fn failure_count(&self, context: &str) -> u32 {
        self.counts.read().await.get(context).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_at_threshold_and_resets_on_success() {
        let cb = CircuitBreaker::new(5);
        for _ in 0..4 {
            cb.record_failure("GET /x").await;
        }
        assert!(!cb.is_open("GET /x").await);
        cb.record_failure("GET /x").await;
        assert!(cb.is_open("GET /x").await);

        cb.record_success("GET /x").await;
        assert!(!cb.is_open("GET /x").await);
        assert_eq!(cb.failure_count("GET /x").await, 0);
    }

    #[tokio::test]
    async fn distinct_contexts_are_independent() {
        let cb = CircuitBreaker::new(5);
        for _ in 0..5 {
            cb.record_failure("a").await;
        }
        assert!(cb.is_open("a").await);
        assert!(!cb.is_open("b").await);
    }
}
