//! Token bucket with continuous refill, and a registry of per-endpoint /
//! per-API buckets consulted together by the rate-limit manager.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

/// A single rate-limit bucket. Guarded by its own lock so distinct buckets
/// never contend with each other.
#[derive(Debug, Clone, Copy)]
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    tokens: f64,
    last_refill: DateTime<Utc>,
}

impl TokenBucket {
    pub fn new(capacity: u64, refill_rate: f64) -> Self {
        Self {
            capacity: capacity as f64,
            refill_rate,
            tokens: capacity as f64,
            last_refill: Utc::now(),
        }
    }

    /// `capacity` tokens available every `window_secs` seconds, starting
    /// full -- the shape used by header-driven bucket updates (§4.3).
    pub fn with_window(capacity: u64, window_secs: f64) -> Self {
        let window = window_secs.max(1.0);
        Self::new(capacity, capacity as f64 / window)
    }

    fn refill(&mut self, now: DateTime<Utc>) {
        let elapsed = (now - self.last_refill).num_milliseconds().max(0) as f64 / 1000.0;
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Refill, then consume `n` tokens if available. Returns whether it
    /// succeeded.
    pub fn try_consume(&mut self, n: f64) -> bool {
        self.refill(Utc::now());
        if self.tokens >= n {
            self.tokens -= n;
            true
        } else {
            false
        }
    }

    /// Milliseconds to wait before `n` tokens would be available, 0 if
    /// already satisfied.
    pub fn wait_time_ms(&mut self, n: f64) -> u64 {
        self.refill(Utc::now());
        if self.tokens >= n {
            return 0;
        }
        let needed = n - self.tokens;
        (1000.0 * needed / self.refill_rate).ceil() as u64
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }
}

/// Holds endpoint-keyed and api-keyed buckets; a request may consult zero,
/// one, or both.
#[derive(Default)]
pub struct RateLimitRegistry {
    endpoint_buckets: RwLock<HashMap<String, Arc<Mutex<TokenBucket>>>>,
    api_buckets: RwLock<HashMap<String, Arc<Mutex<TokenBucket>>>>,
}

impl RateLimitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    async fn bucket(map: &RwLock<HashMap<String, Arc<Mutex<TokenBucket>>>>, key: &str) -> Option<Arc<Mutex<TokenBucket>>> {
        map.read().await.get(key).cloned()
    }

    pub async fn set_endpoint_bucket(&self, key: &str, bucket: TokenBucket) {
        self.endpoint_buckets
            .write()
            .await
            .insert(key.to_string(), Arc::new(Mutex::new(bucket)));
    }

    pub async fn set_api_bucket(&self, key: &str, bucket: TokenBucket) {
        self.api_buckets
            .write()
            .await
            .insert(key.to_string(), Arc::new(Mutex::new(bucket)));
    }

    pub async fn ensure_endpoint_bucket(&self, key: &str, capacity: u64, refill_rate: f64) {
        let exists = self.endpoint_buckets.read().await.contains_key(key);
        if !exists {
            self.set_endpoint_bucket(key, TokenBucket::new(capacity, refill_rate)).await;
        }
    }

    /// Compute the max wait across both applicable buckets, sleep it, then
    /// consume one token from each. Waiting before consuming prevents
    /// tokens being reserved and then abandoned.
    pub async fn wait_and_consume(&self, endpoint_key: &str, api_key: Option<&str>) {
        let endpoint = Self::bucket(&self.endpoint_buckets, endpoint_key).await;
        let api = match api_key {
            Some(k) => Self::bucket(&self.api_buckets, k).await,
            None => None,
        };

        let mut wait_ms = 0u64;
        if let Some(b) = &endpoint {
            wait_ms = wait_ms.max(b.lock().await.wait_time_ms(1.0));
        }
        if let Some(b) = &api {
            wait_ms = wait_ms.max(b.lock().await.wait_time_ms(1.0));
        }

        if wait_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(wait_ms)).await;
        }

        if let Some(b) = &endpoint {
            b.lock().await.try_consume(1.0);
        }
        if let Some(b) = &api {
            b.lock().await.try_consume(1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_never_exceed_capacity() {
        let mut bucket = TokenBucket::new(5, 100.0);
        std::thread::sleep(std::time::Duration::from_millis(50));
        bucket.refill(Utc::now());
        assert!(bucket.tokens() <= bucket.capacity());
    }

    #[test]
    fn try_consume_succeeds_iff_enough_tokens_after_refill() {
        let mut bucket = TokenBucket::new(2, 1.0);
        assert!(bucket.try_consume(2.0));
        assert!(!bucket.try_consume(1.0));
    }

    #[tokio::test]
    async fn rate_limit_registry_serializes_excess_requests() {
        let registry = RateLimitRegistry::new();
        registry.set_endpoint_bucket("K", TokenBucket::new(2, 2.0)).await;

        let t0 = std::time::Instant::now();
        registry.wait_and_consume("K", None).await;
        registry.wait_and_consume("K", None).await;
        assert!(t0.elapsed().as_millis() < 50);

        let t1 = std::time::Instant::now();
        registry.wait_and_consume("K", None).await;
        let elapsed = t1.elapsed().as_millis();
        assert!(elapsed >= 400 && elapsed <= 1000, "elapsed={elapsed}");
    }
}
