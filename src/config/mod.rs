//! Configuration management
//!
//! Loads from YAML files + environment variables via .env

mod types;

pub use types::*;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub aggregator: AggregatorConfig,
    pub cache: CacheConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub rate_limits: RateLimitSettings,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (MICROSTRUCTURE__*)
            .add_source(Environment::with_prefix("MICROSTRUCTURE").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;
        Ok(app_config.normalized())
    }

    /// Parse a YAML document; missing sections take their defaults
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let app_config: AppConfig =
            serde_yaml::from_str(yaml).context("Failed to parse YAML configuration")?;
        app_config.validate()?;
        Ok(app_config.normalized())
    }

    /// Source-name keys are matched case-insensitively; store them lowercase
    fn normalized(mut self) -> Self {
        self.aggregator.weights = self
            .aggregator
            .weights
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect();
        self.rate_limits.sources = self
            .rate_limits
            .sources
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect();
        self
    }

    /// Reject values that would make the aggregator misbehave
    pub fn validate(&self) -> Result<()> {
        let agg = &self.aggregator;
        if agg.whale_threshold_usd <= 0.0 {
            bail!("aggregator.whale_threshold_usd must be positive");
        }
        if agg.default_weight <= 0.0 {
            bail!("aggregator.default_weight must be positive");
        }
        if let Some((name, w)) = agg.weights.iter().find(|(_, w)| **w <= 0.0) {
            bail!("aggregator.weights.{} must be positive (got {})", name, w);
        }
        if agg.order_book_depth == 0 {
            bail!("aggregator.order_book_depth must be at least 1");
        }
        if agg.call_timeout_ms == 0 {
            bail!("aggregator.call_timeout_ms must be positive");
        }

        if self.cache.max_size == 0 {
            bail!("cache.max_size must be at least 1");
        }
        if self.cache.ttl_secs <= 0.0 {
            bail!("cache.ttl_secs must be positive");
        }

        let cb = &self.circuit_breaker;
        if cb.failure_threshold == 0 || cb.success_threshold == 0 || cb.half_open_max_calls == 0 {
            bail!("circuit_breaker thresholds must be at least 1");
        }
        if cb.timeout_secs <= 0.0 {
            bail!("circuit_breaker.timeout_secs must be positive");
        }

        let limits = self
            .rate_limits
            .sources
            .iter()
            .map(|(name, cfg)| (name.as_str(), cfg))
            .chain(std::iter::once(("fallback", &self.rate_limits.fallback)));
        for (name, cfg) in limits {
            if cfg.requests_per_second <= 0.0 || cfg.burst_size <= 0.0 {
                bail!(
                    "rate_limits.{}: requests_per_second and burst_size must be positive",
                    name
                );
            }
        }

        Ok(())
    }

    /// Generate a digest of the config for logging
    pub fn digest(&self) -> String {
        format!(
            "whale_threshold=${:.0} depth={} call_timeout={}ms deadline={}ms cache_ttl={}s cache_max={} cb_failures={} cb_timeout={}s",
            self.aggregator.whale_threshold_usd,
            self.aggregator.order_book_depth,
            self.aggregator.call_timeout_ms,
            self.aggregator.overall_deadline_ms,
            self.cache.ttl_secs,
            self.cache.max_size,
            self.circuit_breaker.failure_threshold,
            self.circuit_breaker.timeout_secs
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
