//! Per-host and global adaptive rate limiter.
//!
//! Two token-bucket gates (global, then per-host) followed by a per-host
//! adaptive backoff sleep.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use discovery_core::DiscoveryError;
use tokio::sync::Mutex;
use tokio::time::sleep;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Timeout,
    ConnectionFailed,
    ScanError,
    Unknown,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::ConnectionFailed => "connection_failed",
            FailureKind::ScanError => "scan_error",
            FailureKind::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub per_host_limit: f64,
    pub global_limit: f64,
    pub backoff_factor: f64,
    pub max_backoff_s: f64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        RateLimiterConfig {
            per_host_limit: 2.0,
            global_limit: 100.0,
            backoff_factor: 1.5,
            max_backoff_s: 60.0,
        }
    }
}

/// A continuous token bucket: tokens accrue at `rate` tokens/second up to
/// `capacity`, consumed in fractional amounts.
struct TokenBucket {
    rate: f64,
    capacity: f64,
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(rate: f64, capacity: f64) -> Self {
        TokenBucket {
            rate,
            capacity,
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_update = now;
    }

    /// Try to take `tokens`. Returns whether it succeeded.
    fn try_consume(&mut self, tokens: f64) -> bool {
        self.refill(Instant::now());
        if self.tokens >= tokens {
            self.tokens -= tokens;
            true
        } else {
            false
        }
    }

    fn deficit(&self, tokens: f64) -> f64 {
        (tokens - self.tokens).max(0.0)
    }
}

async fn wait_for_tokens(bucket: &Mutex<TokenBucket>, tokens: f64, timeout: Duration) -> bool {
    let start = Instant::now();
    loop {
        let (ok, wait) = {
            let mut b = bucket.lock().await;
            if b.try_consume(tokens) {
                (true, Duration::ZERO)
            } else {
                let wait_s = (b.deficit(tokens) / b.rate).min(1.0);
                (false, Duration::from_secs_f64(wait_s.max(0.0)))
            }
        };
        if ok {
            return true;
        }
        if start.elapsed() >= timeout {
            return false;
        }
        sleep(wait).await;
    }
}

#[derive(Debug, Clone, Default)]
pub struct HostStats {
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub response_times_ms: VecDeque<f64>,
    pub current_backoff_s: f64,
    pub failure_counts: HashMap<&'static str, u64>,
}

impl HostStats {
    const SAMPLE_WINDOW: usize = 100;

    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 1.0;
        }
        self.successes as f64 / self.total_requests as f64
    }

    pub fn average_response_time_ms(&self) -> f64 {
        if self.response_times_ms.is_empty() {
            return 0.0;
        }
        self.response_times_ms.iter().sum::<f64>() / self.response_times_ms.len() as f64
    }

    fn record_response_time(&mut self, ms: f64) {
        if self.response_times_ms.len() == Self::SAMPLE_WINDOW {
            self.response_times_ms.pop_front();
        }
        self.response_times_ms.push_back(ms);
    }
}

/// C1: global + per-host token buckets plus adaptive per-host backoff.
pub struct RateLimiter {
    config: RateLimiterConfig,
    global_bucket: Mutex<TokenBucket>,
    host_buckets: Mutex<HashMap<String, TokenBucket>>,
    host_stats: Mutex<HashMap<String, HostStats>>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let global_bucket = TokenBucket::new(config.global_limit, config.global_limit * 2.0);
        RateLimiter {
            config,
            global_bucket: Mutex::new(global_bucket),
            host_buckets: Mutex::new(HashMap::new()),
            host_stats: Mutex::new(HashMap::new()),
        }
    }

    async fn host_backoff(&self, host: &str) -> f64 {
        self.host_stats
            .lock()
            .await
            .get(host)
            .map(|s| s.current_backoff_s)
            .unwrap_or(0.0)
    }

    /// Acquire permission to contact `host`, waiting up to `timeout`.
    /// Order: global bucket, then per-host bucket, then the host's current
    /// adaptive backoff delay.
    pub async fn acquire(&self, host: &str, timeout: Duration) -> discovery_core::Result<()> {
        {
            let mut stats = self.host_stats.lock().await;
            stats.entry(host.to_string()).or_default().total_requests += 1;
        }

        if !wait_for_tokens(&self.global_bucket, 1.0, timeout).await {
            return Err(DiscoveryError::RateLimitExceeded("global".to_string()));
        }

        if !self.wait_for_host_tokens(host, timeout).await {
            return Err(DiscoveryError::RateLimitExceeded(host.to_string()));
        }

        let backoff = self.host_backoff(host).await;
        if backoff > 0.0 {
            sleep(Duration::from_secs_f64(backoff)).await;
        }
        Ok(())
    }

    async fn wait_for_host_tokens(&self, host: &str, timeout: Duration) -> bool {
        let start = Instant::now();
        loop {
            let (ok, wait) = {
                let mut buckets = self.host_buckets.lock().await;
                let per_host = self.config.per_host_limit;
                let bucket = buckets
                    .entry(host.to_string())
                    .or_insert_with(|| TokenBucket::new(per_host, per_host * 2.0));
                if bucket.try_consume(1.0) {
                    (true, Duration::ZERO)
                } else {
                    let wait_s = (bucket.deficit(1.0) / bucket.rate).min(1.0);
                    (false, Duration::from_secs_f64(wait_s.max(0.0)))
                }
            };
            if ok {
                return true;
            }
            if start.elapsed() >= timeout {
                return false;
            }
            sleep(wait).await;
        }
    }

    pub async fn record_success(&self, host: &str, rtt: Duration) {
        let mut stats = self.host_stats.lock().await;
        let entry = stats.entry(host.to_string()).or_default();
        entry.successes += 1;
        entry.record_response_time(rtt.as_secs_f64() * 1000.0);
        entry.current_backoff_s *= 0.8;
    }

    pub async fn record_failure(&self, host: &str, kind: FailureKind) {
        let mut stats = self.host_stats.lock().await;
        let entry = stats.entry(host.to_string()).or_default();
        entry.failures += 1;
        *entry.failure_counts.entry(kind.as_str()).or_insert(0) += 1;
        let next = (entry.current_backoff_s * self.config.backoff_factor).max(0.1);
        entry.current_backoff_s = next.min(self.config.max_backoff_s);
    }

    pub async fn host_stats(&self, host: &str) -> Option<HostStats> {
        self.host_stats.lock().await.get(host).cloned()
    }

    pub async fn global_stats(&self) -> HostStats {
        let stats = self.host_stats.lock().await;
        let mut agg = HostStats::default();
        for s in stats.values() {
            agg.total_requests += s.total_requests;
            agg.successes += s.successes;
            agg.failures += s.failures;
            for (k, v) in &s.failure_counts {
                *agg.failure_counts.entry(k).or_insert(0) += v;
            }
        }
        agg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_within_burst_succeeds_immediately() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            per_host_limit: 5.0,
            global_limit: 50.0,
            ..Default::default()
        });
        for _ in 0..5 {
            limiter
                .acquire("host-a", Duration::from_millis(50))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn zero_per_host_limit_always_fails() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            per_host_limit: 0.0,
            global_limit: 100.0,
            ..Default::default()
        });
        let result = limiter.acquire("host-a", Duration::from_millis(10)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn rate_limit_enforcement_under_load() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            per_host_limit: 2.0,
            global_limit: 20.0,
            ..Default::default()
        });
        let mut saw_failure = false;
        for _ in 0..100 {
            if limiter
                .acquire("h", Duration::from_millis(10))
                .await
                .is_err()
            {
                saw_failure = true;
                break;
            }
        }
        assert!(saw_failure, "expected at least one RateLimitExceeded");

        limiter.record_failure("h", FailureKind::Timeout).await;
        let backoff_after_one_failure = limiter.host_backoff("h").await;
        assert!(backoff_after_one_failure >= 0.1);

        limiter.record_failure("h", FailureKind::Timeout).await;
        let backoff_after_two_failures = limiter.host_backoff("h").await;
        assert!(backoff_after_two_failures > backoff_after_one_failure);
    }

    #[tokio::test]
    async fn success_shrinks_backoff() {
        let limiter = RateLimiter::new(RateLimiterConfig::default());
        limiter.record_failure("h", FailureKind::Timeout).await;
        let before = limiter.host_backoff("h").await;
        limiter
            .record_success("h", Duration::from_millis(5))
            .await;
        let after = limiter.host_backoff("h").await;
        assert!(after < before);
    }

    #[tokio::test]
    async fn token_bucket_never_exceeds_capacity_or_goes_negative() {
        let mut bucket = TokenBucket::new(10.0, 20.0);
        assert!(bucket.try_consume(20.0));
        assert!(!bucket.try_consume(1.0));
        bucket.refill(Instant::now() + Duration::from_secs(100));
        assert!(bucket.tokens <= bucket.capacity);
        assert!(bucket.tokens >= 0.0);
    }
}
