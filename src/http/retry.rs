//! Exponential-backoff-with-jitter retry manager, gated by the circuit
//! breaker.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use super::circuit_breaker::CircuitBreaker;

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            jitter_factor: 0.2,
            max_retries: 3,
        }
    }
}

/// `delay = min(base * 2^attempt, max) + uniform(0, jitter * capped_delay)`.
pub fn backoff_delay_ms(config: &RetryConfig, attempt: u32) -> u64 {
    let exp = config.base_delay_ms.saturating_mul(1u64 << attempt.min(20));
    let capped = exp.min(config.max_delay_ms);
    let jitter_max = config.jitter_factor * capped as f64;
    let jitter = if jitter_max > 0.0 {
        rand::thread_rng().gen_range(0.0..jitter_max)
    } else {
        0.0
    };
    capped + jitter.round() as u64
}

#[derive(Debug, Clone)]
pub struct RetryOutcome<T> {
    pub success: bool,
    pub data: Option<T>,
    pub attempts: u32,
    pub total_delay_ms: u64,
    pub error: Option<String>,
}

/// A single attempt's outcome as seen by the retry manager: either a
/// successful value, or a failure annotated with whether it's retryable.
pub enum AttemptError {
    Retryable(String),
    Terminal(String),
}

/// Run `op` under the retry/circuit-breaker policy for `context`. `op` is
/// invoked at least once unless the circuit is already open.
pub async fn execute_with_retry<T, F, Fut>(
    breaker: &CircuitBreaker,
    context: &str,
    config: &RetryConfig,
    mut op: F,
) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AttemptError>>,
{
    if breaker.is_open(context).await {
        return RetryOutcome {
            success: false,
            data: None,
            attempts: 0,
            total_delay_ms: 0,
            error: Some("Circuit breaker open".to_string()),
        };
    }

    let mut attempt = 0u32;
    let mut total_delay_ms = 0u64;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => {
                breaker.record_success(context).await;
                return RetryOutcome {
                    success: true,
                    data: Some(value),
                    attempts: attempt,
                    total_delay_ms,
                    error: None,
                };
            }
            Err(AttemptError::Terminal(message)) => {
                breaker.record_failure(context).await;
                return RetryOutcome {
                    success: false,
                    data: None,
                    attempts: attempt,
                    total_delay_ms,
                    error: Some(message),
                };
            }
            Err(AttemptError::Retryable(message)) => {
                if attempt >= config.max_retries {
                    breaker.record_failure(context).await;
                    return RetryOutcome {
                        success: false,
                        data: None,
                        attempts: attempt,
                        total_delay_ms,
                        error: Some(message),
                    };
                }
                let delay = backoff_delay_ms(config, attempt - 1);
                total_delay_ms += delay;
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }
    }
}

/// HTTP-status / network-error retryable predicate (§4.4).
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

pub fn is_retryable_network_code(code: &str) -> bool {
    matches!(code, "ECONNRESET" | "ETIMEDOUT" | "ENOTFOUND" | "ENETUNREACH" | "EAI_AGAIN")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn retries_until_success_and_tracks_delay() {
        let breaker = CircuitBreaker::new(5);
        let config = RetryConfig {
            base_delay_ms: 10,
            max_delay_ms: 1000,
            jitter_factor: 0.0,
            max_retries: 3,
        };
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let outcome = execute_with_retry(&breaker, "GET /x", &config, move || {
            let calls = calls_clone.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(AttemptError::Retryable("http 500".to_string()))
                } else {
                    Ok("OK")
                }
            }
        })
        .await;

        assert!(outcome.success);
        assert_eq!(outcome.attempts, 3);
        assert!(outcome.total_delay_ms >= 30);
    }

    #[tokio::test]
    async fn non_retryable_failure_short_circuits_immediately() {
        let breaker = CircuitBreaker::new(5);
        let config = RetryConfig::default();
        let outcome: RetryOutcome<()> = execute_with_retry(&breaker, "GET /y", &config, || async {
            Err(AttemptError::Terminal("404".to_string()))
        })
        .await;

        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(breaker.failure_count("GET /y").await, 1);
    }

    #[tokio::test]
    async fn open_circuit_short_circuits_with_zero_attempts() {
        let breaker = CircuitBreaker::new(5);
        for _ in 0..5 {
            breaker.record_failure("GET /z").await;
        }
        let config = RetryConfig::default();
        let outcome: RetryOutcome<()> = execute_with_retry(&breaker, "GET /z", &config, || async {
            Ok(())
        })
        .await;

        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 0);
        assert_eq!(outcome.error.unwrap(), "Circuit breaker open");
    }
}
