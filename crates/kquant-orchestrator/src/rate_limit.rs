//! 외부 호출 rate limiting.
//!
//! Token Bucket 알고리즘 기반으로 엔드포인트별 호출 속도를 제한합니다.
//! 데이터 수집 API는 초당 1회, 재무 데이터는 초당 0.5회가 기본입니다.
//! 버킷은 프로세스 전역에서 공유됩니다.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Rate Limiter 설정.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// 초당 허용 요청 수
    pub requests_per_second: f64,
    /// 버스트 허용량
    pub burst_size: u32,
}

impl RateLimitConfig {
    /// 새 설정을 생성합니다.
    pub fn per_second(requests_per_second: f64) -> Self {
        Self {
            requests_per_second,
            burst_size: 1,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 1.0,
            burst_size: 1,
        }
    }
}

/// Token Bucket.
#[derive(Debug)]
struct TokenBucket {
    /// 현재 토큰 수
    tokens: f64,
    /// 마지막 리필 시간
    last_refill: Instant,
    /// 최대 토큰 수 (버킷 용량)
    max_tokens: f64,
    /// 초당 리필되는 토큰 수
    refill_rate: f64,
}

impl TokenBucket {
    fn new(config: &RateLimitConfig) -> Self {
        let max_tokens = config.requests_per_second.max(1.0) + config.burst_size as f64;
        Self {
            tokens: max_tokens,
            last_refill: Instant::now(),
            max_tokens,
            refill_rate: config.requests_per_second,
        }
    }

    fn try_acquire(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;
    }

    /// 다음 토큰까지 대기 시간.
    fn time_until_next_token(&self) -> Duration {
        if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - self.tokens) / self.refill_rate)
        }
    }
}

/// 엔드포인트별 rate limiter (프로세스 전역).
#[derive(Debug, Default)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, TokenBucket>>,
}

impl RateLimiter {
    /// 빈 limiter를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 토큰을 얻을 때까지 대기합니다.
    pub async fn acquire(&self, endpoint: &str, config: &RateLimitConfig) {
        loop {
            let wait = {
                let mut buckets = self.buckets.lock().await;
                let bucket = buckets
                    .entry(endpoint.to_string())
                    .or_insert_with(|| TokenBucket::new(config));
                if bucket.try_acquire() {
                    return;
                }
                bucket.time_until_next_token()
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// 대기 없이 토큰 획득을 시도합니다.
    pub async fn try_acquire(&self, endpoint: &str, config: &RateLimitConfig) -> bool {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(endpoint.to_string())
            .or_insert_with(|| TokenBucket::new(config));
        bucket.try_acquire()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_burst_then_limited() {
        let limiter = RateLimiter::new();
        let config = RateLimitConfig {
            requests_per_second: 10.0,
            burst_size: 2,
        };

        // 용량(10 + 2)만큼은 즉시 통과
        for _ in 0..12 {
            assert!(limiter.try_acquire("krx", &config).await);
        }
        // 그 다음은 거부
        assert!(!limiter.try_acquire("krx", &config).await);
    }

    #[tokio::test]
    async fn test_buckets_are_per_endpoint() {
        let limiter = RateLimiter::new();
        let config = RateLimitConfig::per_second(1.0);

        // 한 엔드포인트를 소진해도 다른 엔드포인트는 영향 없음
        while limiter.try_acquire("a", &config).await {}
        assert!(limiter.try_acquire("b", &config).await);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_refill() {
        let limiter = RateLimiter::new();
        let config = RateLimitConfig {
            requests_per_second: 50.0,
            burst_size: 0,
        };

        while limiter.try_acquire("krx", &config).await {}

        // 50 tps면 다음 토큰은 ~20ms 내에 리필된다
        let started = Instant::now();
        limiter.acquire("krx", &config).await;
        assert!(started.elapsed() < Duration::from_millis(500));
    }
}
