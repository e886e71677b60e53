//! Configuration section types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub use crate::cache::CacheConfig;
pub use crate::resilience::circuit_breaker::CircuitBreakerConfig;
pub use crate::resilience::rate_limiter::{RateLimitConfig, RateLimitSettings};

/// Aggregation behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Minimum level notional flagged as a whale wall (USD)
    pub whale_threshold_usd: f64,
    /// Levels requested per side from each source
    pub order_book_depth: usize,
    /// Levels per side scanned for whale walls
    pub whale_scan_levels: usize,
    /// Whale walls kept per side across all sources
    pub max_whales_per_side: usize,
    /// Timeout on each provider call in milliseconds
    pub call_timeout_ms: u64,
    /// Deadline for the whole fan-out in milliseconds (0 disables)
    pub overall_deadline_ms: u64,
    /// Longest a fetch may wait on its rate limiter before giving up
    pub rate_limit_budget_ms: u64,
    /// Weight of a source missing from `weights`
    pub default_weight: f64,
    /// Market-share weight per source, matched case-insensitively
    pub weights: HashMap<String, f64>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        let weights = [
            ("binance", 0.45),
            ("okx", 0.18),
            ("bybit", 0.15),
            ("coinbase", 0.08),
        ]
        .into_iter()
        .map(|(name, w)| (name.to_string(), w))
        .collect();

        Self {
            whale_threshold_usd: 500_000.0,
            order_book_depth: crate::provider::DEFAULT_BOOK_DEPTH,
            whale_scan_levels: 20,
            max_whales_per_side: 5,
            call_timeout_ms: 8_000,
            overall_deadline_ms: 15_000,
            rate_limit_budget_ms: 5_000,
            default_weight: 0.05,
            weights,
        }
    }
}

impl AggregatorConfig {
    /// Market-share weight of `source_name`
    pub fn weight_for(&self, source_name: &str) -> f64 {
        let wanted = source_name.to_lowercase();
        self.weights
            .iter()
            .find(|(name, _)| name.to_lowercase() == wanted)
            .map(|(_, w)| *w)
            .unwrap_or(self.default_weight)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn overall_deadline(&self) -> Option<Duration> {
        (self.overall_deadline_ms > 0).then(|| Duration::from_millis(self.overall_deadline_ms))
    }

    pub fn rate_limit_budget(&self) -> Duration {
        Duration::from_millis(self.rate_limit_budget_ms)
    }
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
