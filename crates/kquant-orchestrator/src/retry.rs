//! 외부 호출 재시도.
//!
//! 지수 백오프(기본 3회, 기저 1초, 계수 2)에 ±20% 지터를 더해
//! 재시도합니다. 재시도 가능 여부는 호출자가 에러로 판단합니다.

use kquant_core::{KquantError, KquantResult};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// 재시도 정책.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 최대 시도 횟수
    pub max_attempts: u32,
    /// 기저 대기 시간
    pub base_delay: Duration,
    /// 대기 시간 증가 계수
    pub factor: u32,
    /// 지터 비율 (0.2 = ±20%)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            factor: 2,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_millis() as f64 * (self.factor as f64).powi(attempt as i32);
        let jitter = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        Duration::from_millis((base * (1.0 + jitter)).max(0.0) as u64)
    }
}

/// 재시도 가능한 에러에 대해 백오프 재시도를 수행합니다.
///
/// 취소 토큰이 내려오면 대기를 중단하고 즉시 반환합니다.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation_name: &str,
    mut operation: F,
) -> KquantResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = KquantResult<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying after backoff"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        return Err(KquantError::Internal(format!(
                            "{} cancelled during retry", operation_name
                        )));
                    }
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(1),
            ..Default::default()
        };

        let result = retry_with_backoff(&policy, &CancellationToken::new(), "test", move || {
            let calls = calls_clone.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(KquantError::Network("timeout".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(1),
            ..Default::default()
        };

        let result: KquantResult<i32> =
            retry_with_backoff(&policy, &CancellationToken::new(), "test", move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(KquantError::Validation("bad input".to_string()))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausts_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(1),
            ..Default::default()
        };

        let result: KquantResult<i32> =
            retry_with_backoff(&policy, &CancellationToken::new(), "test", move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(KquantError::Network("timeout".to_string()))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
