//! Per-source admission control: circuit breakers, rate limiters and the
//! shared order book cache, bundled for injection into the aggregator

pub mod circuit_breaker;
pub mod rate_limiter;

pub use circuit_breaker::{
    transition, BreakerStats, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry,
    CircuitEvent, CircuitPhase, CircuitState,
};
pub use rate_limiter::{
    LimiterStats, RateLimitConfig, RateLimitSettings, RateLimiter, RateLimiterRegistry,
    TokenBucket,
};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::cache::{CacheStats, OrderBookCache};
use crate::config::AppConfig;

/// Background cache sweeper, aborted when the last `Resilience` clone drops
#[derive(Debug)]
struct CleanupTask(JoinHandle<()>);

impl Drop for CleanupTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Registries and cache shared by every caller of one aggregator.
///
/// Cloning shares the same state; build a fresh one per test for isolation.
#[derive(Debug, Clone, Default)]
pub struct Resilience {
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub limiters: Arc<RateLimiterRegistry>,
    pub cache: Arc<OrderBookCache>,
    cleanup: Option<Arc<CleanupTask>>,
}

impl Resilience {
    /// Build registries and cache from `config`.
    ///
    /// The cache sweeper is started when `cache.cleanup_interval_secs` is
    /// non-zero and a tokio runtime is running; otherwise expired entries
    /// are only dropped on read.
    pub fn from_config(config: &AppConfig) -> Self {
        let cache = Arc::new(OrderBookCache::new(&config.cache));

        let cleanup = match config.cache.cleanup_interval() {
            Some(interval) if tokio::runtime::Handle::try_current().is_ok() => {
                tracing::debug!(interval_secs = interval.as_secs(), "Starting cache cleanup task");
                Some(Arc::new(CleanupTask(cache.spawn_cleanup(interval))))
            }
            Some(_) => {
                tracing::warn!("No tokio runtime, cache cleanup task not started");
                None
            }
            None => None,
        };

        Self {
            breakers: Arc::new(CircuitBreakerRegistry::new(config.circuit_breaker.clone())),
            limiters: Arc::new(RateLimiterRegistry::new(config.rate_limits.clone())),
            cache,
            cleanup,
        }
    }

    /// Whether a background cache sweeper is running for this bundle
    pub fn has_cleanup_task(&self) -> bool {
        self.cleanup.as_ref().is_some_and(|task| !task.0.is_finished())
    }

    pub fn report(&self) -> ResilienceReport {
        ResilienceReport {
            circuit_breakers: self.breakers.all_stats(),
            rate_limiters: self.limiters.all_stats(),
            cache: self.cache.stats(),
        }
    }
}

/// Snapshot of breaker, limiter and cache statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResilienceReport {
    pub circuit_breakers: Vec<BreakerStats>,
    pub rate_limiters: Vec<LimiterStats>,
    pub cache: CacheStats,
}
