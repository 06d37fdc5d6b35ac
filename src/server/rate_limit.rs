//! Per-source token bucket driven by the `rate_limit_qps` knob.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Buckets idle longer than this are dropped during cleanup.
const BUCKET_IDLE: Duration = Duration::from_secs(300);
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

struct TokenBucket {
    tokens: f64,
    last_check: Instant,
}

impl TokenBucket {
    fn new(burst: f64) -> Self {
        Self {
            tokens: burst,
            last_check: Instant::now(),
        }
    }

    fn try_consume(&mut self, rate: f64, burst: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_check).as_secs_f64();
        self.last_check = now;
        self.tokens = (self.tokens + elapsed * rate).min(burst);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

pub struct QueryRateLimiter {
    buckets: Mutex<HashMap<IpAddr, TokenBucket>>,
    last_cleanup: Mutex<Instant>,
}

impl QueryRateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            last_cleanup: Mutex::new(Instant::now()),
        }
    }

    /// Whether a query from `ip` passes at `qps` queries per second.
    /// A qps of zero disables limiting entirely.
    pub async fn check(&self, ip: IpAddr, qps: u32) -> bool {
        if qps == 0 {
            return true;
        }
        let rate = qps as f64;
        let mut buckets = self.buckets.lock().await;
        self.maybe_cleanup(&mut buckets).await;
        buckets
            .entry(ip)
            .or_insert_with(|| TokenBucket::new(rate))
            .try_consume(rate, rate)
    }

    async fn maybe_cleanup(&self, buckets: &mut HashMap<IpAddr, TokenBucket>) {
        let mut last = self.last_cleanup.lock().await;
        if last.elapsed() < CLEANUP_INTERVAL {
            return;
        }
        let now = Instant::now();
        buckets.retain(|_, bucket| now.duration_since(bucket.last_check) < BUCKET_IDLE);
        *last = now;
    }
}

impl Default for QueryRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_zero_qps_disables() {
        let limiter = QueryRateLimiter::new();
        let ip: IpAddr = "192.0.2.1".parse().unwrap();
        for _ in 0..1000 {
            assert!(limiter.check(ip, 0).await);
        }
    }

    #[tokio::test]
    async fn test_burst_exhausts() {
        let limiter = QueryRateLimiter::new();
        let ip: IpAddr = "192.0.2.1".parse().unwrap();

        let mut allowed = 0;
        for _ in 0..20 {
            if limiter.check(ip, 5).await {
                allowed += 1;
            }
        }
        // Burst equals the rate; the 20-query burst cannot all pass.
        assert!(allowed >= 5 && allowed < 20);
    }

    #[tokio::test]
    async fn test_sources_are_independent() {
        let limiter = QueryRateLimiter::new();
        let first: IpAddr = "192.0.2.1".parse().unwrap();
        let second: IpAddr = "192.0.2.2".parse().unwrap();

        for _ in 0..10 {
            limiter.check(first, 2).await;
        }
        assert!(limiter.check(second, 2).await);
    }
}
