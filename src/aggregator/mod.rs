//! Microstructure aggregator
//!
//! Fans out one guarded fetch per (source, data kind), fuses whatever came
//! back and derives bias, warnings and key levels. A failing source only
//! reduces coverage; `get_full_context` itself never fails.

mod fetch;
pub mod fusion;
pub mod signals;

pub use fetch::{FetchOutcome, Payload};
pub use signals::{BiasAssessment, SignalInputs, SuggestedLevels};

use chrono::Utc;
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::{AggregatorConfig, AppConfig};
use crate::context::{
    ContextStatus, FundingSummary, LongShortSummary, MicrostructureContext, OpenInterestSummary,
};
use crate::error::{AggregatorError, SourceError};
use crate::provider::{ExchangeProvider, LiquidationData};
use crate::resilience::{Resilience, ResilienceReport};
use crate::types::{ContextFlags, DataKind};

use fetch::guarded_fetch;

/// Multi-source aggregator. Cheap to share behind an `Arc`; safe to call
/// concurrently for different symbols.
pub struct MicrostructureAggregator {
    providers: Vec<Arc<dyn ExchangeProvider>>,
    config: AggregatorConfig,
    resilience: Resilience,
}

impl std::fmt::Debug for MicrostructureAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MicrostructureAggregator")
            .field("sources", &self.source_names())
            .field("config", &self.config)
            .finish()
    }
}

impl MicrostructureAggregator {
    /// Build with fresh registries and cache from `config`
    pub fn new(
        providers: Vec<Arc<dyn ExchangeProvider>>,
        config: &AppConfig,
    ) -> Result<Self, AggregatorError> {
        Self::with_resilience(
            providers,
            config.aggregator.clone(),
            Resilience::from_config(config),
        )
    }

    /// Build around existing registries and cache, shared with other callers
    pub fn with_resilience(
        providers: Vec<Arc<dyn ExchangeProvider>>,
        config: AggregatorConfig,
        resilience: Resilience,
    ) -> Result<Self, AggregatorError> {
        if providers.is_empty() {
            return Err(AggregatorError::NoSources);
        }

        let mut seen = HashSet::new();
        for provider in &providers {
            if !seen.insert(provider.name().to_lowercase()) {
                return Err(AggregatorError::DuplicateSource(provider.name().to_string()));
            }
        }

        if config.default_weight <= 0.0 || config.weights.values().any(|w| *w <= 0.0) {
            return Err(AggregatorError::InvalidConfig(
                "market-share weights must be positive".to_string(),
            ));
        }
        if config.whale_threshold_usd <= 0.0 {
            return Err(AggregatorError::InvalidConfig(
                "whale threshold must be positive".to_string(),
            ));
        }

        let aggregator = Self {
            providers,
            config,
            resilience,
        };
        tracing::info!(
            sources = ?aggregator.source_names(),
            available = aggregator
                .providers
                .iter()
                .filter(|p| p.check_availability())
                .count(),
            "🔬 Microstructure aggregator initialized"
        );
        Ok(aggregator)
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn resilience(&self) -> &Resilience {
        &self.resilience
    }

    /// Breaker, limiter and cache statistics
    pub fn resilience_report(&self) -> ResilienceReport {
        self.resilience.report()
    }

    /// Fetch, fuse and interpret everything `flags` asks for
    pub async fn get_full_context(&self, symbol: &str, flags: ContextFlags) -> MicrostructureContext {
        tracing::info!(symbol = %symbol, kinds = ?flags.kinds(), "📊 Fetching microstructure context");

        let deadline_at = self.config.overall_deadline().map(|d| Instant::now() + d);
        let mut outcomes = self.fan_out(symbol, &flags, deadline_at).await;
        outcomes.sort_by_key(|o| (o.source_index, o.kind));

        let mut warnings = Vec::new();
        let mut any_failed = false;
        let mut books = Vec::new();
        let mut liquidations = Vec::new();
        let mut funding = Vec::new();
        let mut open_interest = Vec::new();
        let mut long_short = Vec::new();

        for outcome in outcomes {
            match outcome.result {
                Ok(Some(Payload::OrderBook(snapshot))) => books.push(snapshot),
                Ok(Some(Payload::Liquidations(data))) => liquidations.push(data),
                Ok(Some(Payload::Funding(data))) => funding.push(data),
                Ok(Some(Payload::OpenInterest(data))) => open_interest.push(data),
                Ok(Some(Payload::LongShort(data))) => long_short.push(data),
                Ok(Some(Payload::MarketData(_))) | Ok(None) => {}
                Err(err) => {
                    any_failed = true;
                    warnings.push(err.to_warning(outcome.kind));
                }
            }
        }

        let aggregated_book = fusion::fuse_books(symbol, &books, &self.config);
        let liquidations = LiquidationData::merge(liquidations);
        let funding = FundingSummary::from_readings(&funding);
        let open_interest = OpenInterestSummary::from_readings(&open_interest);
        let long_short_ratio = LongShortSummary::from_readings(&long_short);

        let current_price = match &aggregated_book {
            Some(book) => book.mid_price,
            None => {
                let (price, fallback_warnings) = self.fallback_price(symbol, deadline_at).await;
                any_failed |= !fallback_warnings.is_empty();
                warnings.extend(fallback_warnings);
                price
            }
        };

        let inputs = SignalInputs {
            book: aggregated_book.as_ref(),
            liquidations: liquidations.as_ref(),
            funding: funding.as_ref(),
            long_short: long_short_ratio.as_ref(),
        };
        let bias = signals::compute_bias(&inputs);
        warnings.extend(signals::data_warnings(&inputs));
        if !bias.has_signals() {
            warnings.push("Insufficient data to compute market bias".to_string());
        }
        let recommendations = signals::recommendations(&inputs);
        let (support_levels, resistance_levels) = signals::key_levels(&inputs, current_price);
        let suggested = SuggestedLevels::from_key_levels(&support_levels, &resistance_levels);

        let status = if flags.order_book && aggregated_book.is_none() {
            ContextStatus::InsufficientData
        } else if any_failed {
            ContextStatus::Degraded
        } else {
            ContextStatus::Ok
        };

        tracing::info!(
            symbol = %symbol,
            status = %status,
            bias = %bias.bias,
            confidence = bias.confidence,
            sources = books.len(),
            warnings = warnings.len(),
            "✅ Microstructure context ready"
        );

        MicrostructureContext {
            symbol: symbol.to_string(),
            timestamp: Utc::now(),
            status,
            current_price,
            aggregated_book,
            liquidations,
            funding,
            open_interest,
            long_short_ratio,
            bias: bias.bias,
            bias_confidence: bias.confidence,
            bias_reasons: bias.reasons,
            warnings,
            recommendations,
            support_levels,
            resistance_levels,
            suggested_sl_long: suggested.map(|s| s.sl_long),
            suggested_tp_long: suggested.map(|s| s.tp_long),
            suggested_sl_short: suggested.map(|s| s.sl_short),
            suggested_tp_short: suggested.map(|s| s.tp_short),
        }
    }

    /// Run every requested (source, kind) fetch concurrently.
    ///
    /// Fetches still running at the overall deadline are dropped and reported
    /// as timeouts; finished ones are kept.
    async fn fan_out(
        &self,
        symbol: &str,
        flags: &ContextFlags,
        deadline_at: Option<Instant>,
    ) -> Vec<FetchOutcome> {
        let mut requested = Vec::new();
        let mut pending = FuturesUnordered::new();
        for (index, provider) in self.providers.iter().enumerate() {
            for kind in flags.kinds() {
                if !provider.supports(kind) {
                    continue;
                }
                requested.push((index, kind));
                pending.push(guarded_fetch(
                    index,
                    Arc::clone(provider),
                    kind,
                    symbol,
                    &self.config,
                    &self.resilience,
                ));
            }
        }

        let mut outcomes = Vec::with_capacity(requested.len());
        let mut deadline_hit = false;

        loop {
            let next = match deadline_at {
                Some(at) => tokio::select! {
                    outcome = pending.next() => outcome,
                    _ = tokio::time::sleep_until(at) => {
                        deadline_hit = true;
                        None
                    }
                },
                None => pending.next().await,
            };
            match next {
                Some(outcome) => outcomes.push(outcome),
                None => break,
            }
        }
        drop(pending);

        if deadline_hit {
            let after = self.config.overall_deadline().unwrap_or_default();
            let finished: HashSet<(usize, DataKind)> =
                outcomes.iter().map(|o| (o.source_index, o.kind)).collect();
            for (index, kind) in requested {
                if !finished.contains(&(index, kind)) {
                    outcomes.push(self.expired(index, kind, symbol, after));
                }
            }
        }

        outcomes
    }

    /// First positive ticker price among the sources serving market data.
    ///
    /// Candidates are asked concurrently and the first price to arrive wins.
    /// The search shares the overall deadline with the main fan-out.
    async fn fallback_price(
        &self,
        symbol: &str,
        deadline_at: Option<Instant>,
    ) -> (f64, Vec<String>) {
        if deadline_at.is_some_and(|at| at <= Instant::now()) {
            tracing::debug!(symbol = %symbol, "Deadline spent, skipping ticker price fallback");
            return (0.0, Vec::new());
        }

        let mut requested = Vec::new();
        let mut pending = FuturesUnordered::new();
        for (index, provider) in self.providers.iter().enumerate() {
            if !provider.supports(DataKind::MarketData) {
                continue;
            }
            requested.push(index);
            pending.push(guarded_fetch(
                index,
                Arc::clone(provider),
                DataKind::MarketData,
                symbol,
                &self.config,
                &self.resilience,
            ));
        }

        let mut warnings = Vec::new();
        let mut answered = HashSet::new();
        loop {
            let next = match deadline_at {
                Some(at) => tokio::select! {
                    outcome = pending.next() => outcome,
                    _ = tokio::time::sleep_until(at) => break,
                },
                None => pending.next().await,
            };
            let Some(outcome) = next else {
                return (0.0, warnings);
            };
            answered.insert(outcome.source_index);
            match outcome.result {
                Ok(Some(Payload::MarketData(data))) => {
                    tracing::debug!(source = %outcome.source_name, price = data.price, "Using ticker price fallback");
                    return (data.price, warnings);
                }
                Ok(_) => {}
                Err(err) => warnings.push(err.to_warning(DataKind::MarketData)),
            }
        }
        drop(pending);

        let after = self.config.overall_deadline().unwrap_or_default();
        for index in requested {
            if answered.contains(&index) {
                continue;
            }
            let outcome = self.expired(index, DataKind::MarketData, symbol, after);
            if let Err(err) = &outcome.result {
                warnings.push(err.to_warning(DataKind::MarketData));
            }
        }
        (0.0, warnings)
    }

    /// Outcome of a fetch dropped at the overall deadline, reported to its breaker
    fn expired(&self, index: usize, kind: DataKind, symbol: &str, after: Duration) -> FetchOutcome {
        let name = self.providers[index].name().to_string();
        let err = SourceError::Timeout {
            source_name: name.clone(),
            after,
        };
        tracing::warn!(
            source = %name,
            symbol = %symbol,
            kind = %kind,
            "Overall deadline elapsed before source answered"
        );
        self.resilience.breakers.get(&name).record_failure(&err);
        FetchOutcome {
            source_index: index,
            source_name: name,
            kind,
            result: Err(err),
            from_cache: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockExchangeProvider;

    fn mock(name: &str) -> MockExchangeProvider {
        let mut provider = MockExchangeProvider::new();
        provider.expect_name().return_const(name.to_string());
        provider.expect_check_availability().return_const(true);
        provider
            .expect_supports()
            .returning(|kind| kind == DataKind::OrderBook);
        provider
    }

    #[test]
    fn test_construction_errors() {
        let err = MicrostructureAggregator::new(Vec::new(), &AppConfig::default()).unwrap_err();
        assert_eq!(err, AggregatorError::NoSources);

        let providers: Vec<Arc<dyn ExchangeProvider>> =
            vec![Arc::new(mock("Binance")), Arc::new(mock("binance"))];
        let err = MicrostructureAggregator::new(providers, &AppConfig::default()).unwrap_err();
        assert_eq!(err, AggregatorError::DuplicateSource("binance".to_string()));

        let config = AggregatorConfig {
            default_weight: 0.0,
            ..AggregatorConfig::default()
        };
        let err = MicrostructureAggregator::with_resilience(
            vec![Arc::new(mock("Binance"))],
            config,
            Resilience::default(),
        )
        .unwrap_err();
        assert!(matches!(err, AggregatorError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_open_breaker_skips_provider_call() {
        let mut provider = mock("Binance");
        provider.expect_get_order_book().times(0);

        let resilience = Resilience::default();
        let breaker = resilience.breakers.get("Binance");
        for _ in 0..5 {
            breaker.record_failure(&"connection reset");
        }

        let aggregator = MicrostructureAggregator::with_resilience(
            vec![Arc::new(provider)],
            AggregatorConfig::default(),
            resilience.clone(),
        )
        .unwrap();

        let ctx = aggregator
            .get_full_context("BTC", ContextFlags::order_book_only())
            .await;

        assert_eq!(ctx.status, ContextStatus::InsufficientData);
        assert!(ctx.aggregated_book.is_none());
        assert!(ctx
            .warnings
            .iter()
            .any(|w| w.starts_with("Binance order_book unavailable") && w.contains("circuit open")));
        // The skipped call must not count as another failure
        assert_eq!(breaker.state().failure_count, 5);
    }

    #[tokio::test]
    async fn test_non_finite_book_is_malformed_and_not_cached() {
        let mut snapshot = crate::book::compute_book_metrics(
            "Binance",
            "BTC",
            vec![crate::book::PriceLevel::new(100.0, 1.0)],
            vec![crate::book::PriceLevel::new(101.0, 1.0)],
        )
        .unwrap();
        snapshot.best_ask = f64::NAN;

        let mut provider = mock("Binance");
        provider
            .expect_get_order_book()
            .times(1)
            .returning(move |_, _| Ok(Some(snapshot.clone())));

        let resilience = Resilience::default();
        let aggregator = MicrostructureAggregator::with_resilience(
            vec![Arc::new(provider)],
            AggregatorConfig::default(),
            resilience.clone(),
        )
        .unwrap();

        let ctx = aggregator
            .get_full_context("BTC", ContextFlags::order_book_only())
            .await;

        assert!(ctx.aggregated_book.is_none());
        assert_eq!(ctx.current_price, 0.0);
        assert!(ctx
            .warnings
            .iter()
            .any(|w| w.contains("malformed data: non-finite best ask")));
        assert!(resilience.cache.is_empty());
        assert_eq!(resilience.breakers.get("Binance").state().failure_count, 1);
    }

    #[tokio::test]
    async fn test_unavailable_source_is_not_called() {
        let mut provider = MockExchangeProvider::new();
        provider.expect_name().return_const("Coinglass".to_string());
        provider.expect_check_availability().return_const(false);
        provider
            .expect_supports()
            .returning(|kind| kind == DataKind::Liquidations);
        provider.expect_get_liquidations().times(0);

        let aggregator =
            MicrostructureAggregator::new(vec![Arc::new(provider)], &AppConfig::default())
                .unwrap();
        let ctx = aggregator
            .get_full_context(
                "BTC",
                ContextFlags {
                    order_book: false,
                    ..ContextFlags::default()
                },
            )
            .await;

        assert_eq!(ctx.status, ContextStatus::Degraded);
        assert!(ctx.warnings[0].contains("Coinglass liquidations unavailable"));
        assert_eq!(ctx.bias_reasons, vec!["Insufficient data"]);
    }
}
