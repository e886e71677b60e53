//! Token bucket rate limiter per source
//!
//! The bucket refills continuously at `requests_per_second` up to `burst_size`
//! tokens. Refill and consume happen under one async mutex, which is held
//! across the throttle sleep, so acquisitions on a source are serialised in
//! arrival order.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::SourceError;

/// Rate and burst for one source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Refill rate, tokens per second
    pub requests_per_second: f64,
    /// Bucket capacity
    pub burst_size: f64,
}

impl RateLimitConfig {
    pub const fn new(requests_per_second: f64, burst_size: f64) -> Self {
        Self {
            requests_per_second,
            burst_size,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new(10.0, 20.0)
    }
}

/// Per-source limits plus the fallback for unknown sources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Keyed by lowercase source name
    pub sources: HashMap<String, RateLimitConfig>,
    pub fallback: RateLimitConfig,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        let sources = [
            ("binance", RateLimitConfig::new(50.0, 100.0)),
            ("bybit", RateLimitConfig::new(50.0, 100.0)),
            ("okx", RateLimitConfig::new(20.0, 40.0)),
            ("coinbase", RateLimitConfig::new(10.0, 20.0)),
            ("kucoin", RateLimitConfig::new(10.0, 20.0)),
            ("cryptocom", RateLimitConfig::new(100.0, 200.0)),
            // 30 requests/minute quota on the aggregated-data provider
            ("coinglass", RateLimitConfig::new(0.5, 2.0)),
        ]
        .into_iter()
        .map(|(name, cfg)| (name.to_string(), cfg))
        .collect();

        Self {
            sources,
            fallback: RateLimitConfig::default(),
        }
    }
}

impl RateLimitSettings {
    pub fn for_source(&self, source_name: &str) -> RateLimitConfig {
        self.sources
            .get(&source_name.to_lowercase())
            .copied()
            .unwrap_or(self.fallback)
    }
}

/// Token bucket state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBucket {
    pub tokens: f64,
    pub capacity: f64,
    pub refill_rate_per_second: f64,
    pub last_refill_time: Instant,
}

impl TokenBucket {
    /// Start full
    pub fn new(config: RateLimitConfig, now: Instant) -> Self {
        Self {
            tokens: config.burst_size,
            capacity: config.burst_size,
            refill_rate_per_second: config.requests_per_second,
            last_refill_time: now,
        }
    }

    /// Tokens available at `now`, without mutating
    pub fn available_at(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_refill_time);
        (self.tokens + elapsed.as_secs_f64() * self.refill_rate_per_second).min(self.capacity)
    }

    /// Lazy, saturating refill
    pub fn refill(&mut self, now: Instant) {
        self.tokens = self.available_at(now);
        if now > self.last_refill_time {
            self.last_refill_time = now;
        }
    }

    /// Wait needed before `cost` tokens are available, assuming a fresh refill
    pub fn wait_for(&self, cost: f64) -> Duration {
        if self.tokens >= cost {
            return Duration::ZERO;
        }
        if self.refill_rate_per_second <= 0.0 {
            return Duration::MAX;
        }
        Duration::try_from_secs_f64((cost - self.tokens) / self.refill_rate_per_second)
            .unwrap_or(Duration::MAX)
    }

    fn consume(&mut self, cost: f64) {
        self.tokens = (self.tokens - cost).max(0.0);
    }
}

#[derive(Debug, Default)]
struct LimiterCounters {
    total_requests: u64,
    throttled_count: u64,
    total_wait: Duration,
}

/// Serializable limiter statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimiterStats {
    pub name: String,
    pub total_requests: u64,
    pub throttled_count: u64,
    pub throttle_rate: f64,
    pub avg_wait_ms: f64,
    pub total_wait_ms: f64,
    pub current_tokens: Option<f64>,
    pub config: RateLimitConfig,
}

/// Token bucket limiter for one source
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    config: RateLimitConfig,
    bucket: tokio::sync::Mutex<TokenBucket>,
    counters: Mutex<LimiterCounters>,
}

impl RateLimiter {
    pub fn new(name: impl Into<String>, config: RateLimitConfig) -> Self {
        Self {
            name: name.into(),
            config,
            bucket: tokio::sync::Mutex::new(TokenBucket::new(config, Instant::now())),
            counters: Mutex::new(LimiterCounters::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Acquire `cost` tokens, sleeping as long as needed. Returns the time waited.
    pub async fn acquire(&self, cost: f64) -> Duration {
        match self.acquire_within(cost, Duration::MAX).await {
            Ok(waited) => waited,
            Err(_) => Duration::MAX,
        }
    }

    /// Acquire `cost` tokens unless doing so would take longer than `budget`.
    ///
    /// The budget covers time spent queued behind other callers as well as the
    /// refill wait. A rejected acquisition consumes nothing.
    pub async fn acquire_within(&self, cost: f64, budget: Duration) -> Result<Duration, SourceError> {
        let started = Instant::now();
        let deadline = started.checked_add(budget);

        let mut bucket = match deadline {
            Some(at) => match tokio::time::timeout_at(at, self.bucket.lock()).await {
                Ok(bucket) => bucket,
                Err(_) => {
                    let queued = started.elapsed();
                    tracing::debug!(
                        source = %self.name,
                        queued_ms = queued.as_millis() as u64,
                        budget_ms = budget.as_millis() as u64,
                        "Rate limiter rejecting: budget spent waiting in queue"
                    );
                    return Err(SourceError::RateLimited {
                        source_name: self.name.clone(),
                        wait: queued,
                        budget,
                    });
                }
            },
            None => self.bucket.lock().await,
        };

        let now = Instant::now();
        bucket.refill(now);

        let wait = bucket.wait_for(cost);
        let over_budget = match deadline {
            Some(at) => now.checked_add(wait).map_or(true, |ready| ready > at),
            None => false,
        };
        if over_budget {
            let needed = now.saturating_duration_since(started).saturating_add(wait);
            tracing::debug!(
                source = %self.name,
                wait_ms = needed.as_millis() as u64,
                budget_ms = budget.as_millis() as u64,
                "Rate limiter rejecting: wait exceeds budget"
            );
            return Err(SourceError::RateLimited {
                source_name: self.name.clone(),
                wait: needed,
                budget,
            });
        }

        if !wait.is_zero() {
            tracing::debug!(
                source = %self.name,
                tokens = bucket.tokens,
                capacity = bucket.capacity,
                wait_ms = wait.as_millis() as u64,
                "Rate limiter throttling"
            );
            tokio::time::sleep(wait).await;
            bucket.refill(Instant::now());
        }
        bucket.consume(cost);
        drop(bucket);

        let waited = started.elapsed();
        let mut counters = self.counters.lock();
        counters.total_requests += 1;
        counters.total_wait += waited;
        if !waited.is_zero() {
            counters.throttled_count += 1;
        }
        Ok(waited)
    }

    /// Whether `cost` tokens are available right now.
    ///
    /// Returns `false` while another caller holds the bucket (it is mid-acquire
    /// or throttling, so a new caller would have to queue).
    pub fn can_proceed(&self, cost: f64) -> bool {
        match self.bucket.try_lock() {
            Ok(mut bucket) => {
                bucket.refill(Instant::now());
                bucket.tokens >= cost
            }
            Err(_) => false,
        }
    }

    pub fn stats(&self) -> LimiterStats {
        let counters = self.counters.lock();
        let total = counters.total_requests;
        let total_wait_ms = counters.total_wait.as_secs_f64() * 1000.0;
        LimiterStats {
            name: self.name.clone(),
            total_requests: total,
            throttled_count: counters.throttled_count,
            throttle_rate: if total > 0 {
                counters.throttled_count as f64 / total as f64
            } else {
                0.0
            },
            avg_wait_ms: if total > 0 {
                total_wait_ms / total as f64
            } else {
                0.0
            },
            total_wait_ms,
            current_tokens: self
                .bucket
                .try_lock()
                .ok()
                .map(|b| b.available_at(Instant::now())),
            config: self.config,
        }
    }

    /// Reset counters, leaving the bucket untouched
    pub fn reset_stats(&self) {
        *self.counters.lock() = LimiterCounters::default();
        tracing::info!(source = %self.name, "Rate limiter stats reset");
    }
}

/// Limiters keyed by source name, created lazily with the configured limits
#[derive(Debug, Default)]
pub struct RateLimiterRegistry {
    settings: RateLimitSettings,
    limiters: Mutex<HashMap<String, Arc<RateLimiter>>>,
}

impl RateLimiterRegistry {
    pub fn new(settings: RateLimitSettings) -> Self {
        Self {
            settings,
            limiters: Mutex::new(HashMap::new()),
        }
    }

    /// Limiter for `source_name`, shared by every caller
    pub fn get(&self, source_name: &str) -> Arc<RateLimiter> {
        let mut limiters = self.limiters.lock();
        limiters
            .entry(source_name.to_string())
            .or_insert_with(|| {
                let config = self.settings.for_source(source_name);
                tracing::info!(
                    source = %source_name,
                    rps = config.requests_per_second,
                    burst = config.burst_size,
                    "Rate limiter created"
                );
                Arc::new(RateLimiter::new(source_name, config))
            })
            .clone()
    }

    pub fn all_stats(&self) -> Vec<LimiterStats> {
        let mut stats: Vec<LimiterStats> =
            self.limiters.lock().values().map(|l| l.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    pub fn reset_all_stats(&self) {
        for limiter in self.limiters.lock().values() {
            limiter.reset_stats();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_throttle() {
        let limiter = RateLimiter::new("test", RateLimitConfig::new(10.0, 20.0));

        for _ in 0..20 {
            assert_eq!(limiter.acquire(1.0).await, Duration::ZERO);
        }

        let start = Instant::now();
        let waited = limiter.acquire(1.0).await;
        assert!((waited.as_secs_f64() - 0.1).abs() < 1e-6);
        assert!(start.elapsed() >= Duration::from_millis(99));

        let stats = limiter.stats();
        assert_eq!(stats.total_requests, 21);
        assert_eq!(stats.throttled_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_is_saturating() {
        let limiter = RateLimiter::new("test", RateLimitConfig::new(10.0, 5.0));
        limiter.acquire(5.0).await;
        assert!(!limiter.can_proceed(1.0));

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(limiter.can_proceed(5.0));
        assert!(!limiter.can_proceed(5.5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_within_budget_rejects_without_consuming() {
        let limiter = RateLimiter::new("coinglass", RateLimitConfig::new(0.5, 2.0));
        limiter.acquire(2.0).await;

        let err = assert_err!(limiter.acquire_within(1.0, Duration::from_secs(1)).await);
        assert!(matches!(err, SourceError::RateLimited { .. }));

        // Two seconds of budget covers one token at 0.5/s
        let waited = assert_ok!(limiter.acquire_within(1.0, Duration::from_secs(2)).await);
        assert!((waited.as_secs_f64() - 2.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_counts_time_queued_behind_other_callers() {
        let limiter = RateLimiter::new("okx", RateLimitConfig::new(1.0, 1.0));
        limiter.acquire(1.0).await;

        let budget = Duration::from_millis(1_500);
        let (first, second, third) = tokio::join!(
            limiter.acquire_within(1.0, budget),
            limiter.acquire_within(1.0, budget),
            limiter.acquire_within(1.0, budget),
        );

        let waited = assert_ok!(first);
        assert!((waited.as_secs_f64() - 1.0).abs() < 1e-2);
        // Each later caller would be admitted only after 2s and 3s
        assert!(matches!(assert_err!(second), SourceError::RateLimited { .. }));
        assert!(matches!(assert_err!(third), SourceError::RateLimited { .. }));
        assert_eq!(limiter.stats().total_requests, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_expires_while_bucket_is_held() {
        let limiter = RateLimiter::new("coinglass", RateLimitConfig::new(0.5, 1.0));
        limiter.acquire(1.0).await;

        let start = Instant::now();
        let (holder, queued) = tokio::join!(limiter.acquire(1.0), async {
            let result = limiter.acquire_within(1.0, Duration::from_secs(1)).await;
            (result, start.elapsed())
        });

        assert!((holder.as_secs_f64() - 2.0).abs() < 1e-2);
        let (result, gave_up_after) = queued;
        assert!(matches!(assert_err!(result), SourceError::RateLimited { .. }));
        assert!((gave_up_after.as_secs_f64() - 1.0).abs() < 1e-2);
    }

    #[test]
    fn test_tiny_rate_waits_forever_instead_of_panicking() {
        let t0 = Instant::now();
        let mut bucket = TokenBucket::new(RateLimitConfig::new(1e-300, 1.0), t0);
        bucket.consume(1.0);
        assert_eq!(bucket.wait_for(1.0), Duration::MAX);
    }

    #[test]
    fn test_bucket_math() {
        let t0 = Instant::now();
        let mut bucket = TokenBucket::new(RateLimitConfig::new(4.0, 8.0), t0);
        bucket.consume(8.0);
        assert_eq!(bucket.wait_for(2.0), Duration::from_millis(500));

        bucket.refill(t0 + Duration::from_millis(250));
        assert!((bucket.tokens - 1.0).abs() < 1e-9);
        assert!(bucket.available_at(t0 + Duration::from_secs(10)) <= 8.0);
    }

    #[test]
    fn test_registry_uses_source_defaults() {
        let registry = RateLimiterRegistry::new(RateLimitSettings::default());
        let coinglass = registry.get("Coinglass");
        assert_eq!(coinglass.stats().config, RateLimitConfig::new(0.5, 2.0));

        let unknown = registry.get("SomeNewVenue");
        assert_eq!(unknown.stats().config, RateLimitConfig::new(10.0, 20.0));
        assert!(Arc::ptr_eq(&coinglass, &registry.get("Coinglass")));
    }
}
