//! One guarded call to one source for one data kind
//!
//! Guard order: rate limiter (bounded wait) -> circuit breaker -> availability
//! -> cache (order books only) -> provider call under a timeout. Every outcome
//! that reached the source is reported back to the breaker.

use std::sync::Arc;
use std::time::Duration;

use crate::book::BookSnapshot;
use crate::config::AggregatorConfig;
use crate::error::SourceError;
use crate::provider::{
    ExchangeProvider, FundingData, LiquidationData, LongShortData, MarketData, OpenInterestData,
};
use crate::resilience::Resilience;
use crate::types::DataKind;

/// Data returned by a successful fetch
#[derive(Debug, Clone)]
pub enum Payload {
    OrderBook(Arc<BookSnapshot>),
    Liquidations(LiquidationData),
    Funding(FundingData),
    OpenInterest(OpenInterestData),
    LongShort(LongShortData),
    MarketData(MarketData),
}

/// Result of one (source, kind) fetch
#[derive(Debug)]
pub struct FetchOutcome {
    /// Position of the source in the aggregator's provider list
    pub source_index: usize,
    pub source_name: String,
    pub kind: DataKind,
    /// `Ok(None)` means the source answered but had nothing for this symbol
    pub result: Result<Option<Payload>, SourceError>,
    pub from_cache: bool,
}

impl FetchOutcome {
    pub fn error(&self) -> Option<&SourceError> {
        self.result.as_ref().err()
    }
}

async fn call_provider(
    provider: &dyn ExchangeProvider,
    kind: DataKind,
    symbol: &str,
    depth: usize,
) -> Result<Option<Payload>, SourceError> {
    match kind {
        DataKind::OrderBook => {
            let Some(snapshot) = provider.get_order_book(symbol, depth).await? else {
                return Ok(None);
            };
            snapshot
                .validate()
                .map_err(|reason| SourceError::malformed(provider.name(), reason))?;
            Ok(Some(Payload::OrderBook(Arc::new(snapshot))))
        }
        DataKind::Liquidations => Ok(provider
            .get_liquidations(symbol)
            .await?
            .map(Payload::Liquidations)),
        DataKind::Funding => Ok(provider
            .get_funding_rate(symbol)
            .await?
            .map(Payload::Funding)),
        DataKind::OpenInterest => Ok(provider
            .get_open_interest(symbol)
            .await?
            .map(Payload::OpenInterest)),
        DataKind::LongShortRatio => Ok(provider
            .get_long_short_ratio(symbol)
            .await?
            .map(Payload::LongShort)),
        DataKind::MarketData => {
            let data = provider.get_market_data(symbol).await?;
            if !(data.price.is_finite() && data.price > 0.0) {
                return Err(SourceError::malformed(
                    provider.name(),
                    format!("non-positive price {}", data.price),
                ));
            }
            Ok(Some(Payload::MarketData(data)))
        }
    }
}

async fn admit_and_call(
    provider: &dyn ExchangeProvider,
    kind: DataKind,
    symbol: &str,
    config: &AggregatorConfig,
    resilience: &Resilience,
) -> (Result<Option<Payload>, SourceError>, bool) {
    let name = provider.name();

    let limiter = resilience.limiters.get(name);
    if let Err(err) = limiter.acquire_within(1.0, config.rate_limit_budget()).await {
        return (Err(err), false);
    }

    let breaker = resilience.breakers.get(name);
    if !breaker.can_execute() {
        tracing::debug!(source = %name, kind = %kind, "Circuit open, skipping source");
        return (
            Err(SourceError::CircuitOpen {
                source_name: name.to_string(),
            }),
            false,
        );
    }

    if !provider.check_availability() {
        let err = SourceError::SourceUnavailable {
            source_name: name.to_string(),
        };
        breaker.record_failure(&err);
        return (Err(err), false);
    }

    if kind == DataKind::OrderBook {
        if let Some(cached) = resilience.cache.get(name, symbol) {
            return (Ok(Some(Payload::OrderBook(cached))), true);
        }
    }

    let call_timeout: Duration = config.call_timeout();
    let result = match tokio::time::timeout(
        call_timeout,
        call_provider(provider, kind, symbol, config.order_book_depth),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(SourceError::Timeout {
            source_name: name.to_string(),
            after: call_timeout,
        }),
    };

    match &result {
        Ok(payload) => {
            if let Some(Payload::OrderBook(snapshot)) = payload {
                resilience.cache.set(name, symbol, Arc::clone(snapshot));
            }
            breaker.record_success();
        }
        Err(err) if err.counts_as_failure() => breaker.record_failure(err),
        Err(_) => {}
    }

    (result, false)
}

/// Run one guarded fetch. Never fails; errors are carried in the outcome.
pub async fn guarded_fetch(
    source_index: usize,
    provider: Arc<dyn ExchangeProvider>,
    kind: DataKind,
    symbol: &str,
    config: &AggregatorConfig,
    resilience: &Resilience,
) -> FetchOutcome {
    let (result, from_cache) =
        admit_and_call(provider.as_ref(), kind, symbol, config, resilience).await;

    if let Err(err) = &result {
        tracing::warn!(
            source = %provider.name(),
            symbol = %symbol,
            kind = %kind,
            error_type = err.error_type(),
            error = %err,
            "Source fetch failed"
        );
    }

    FetchOutcome {
        source_index,
        source_name: provider.name().to_string(),
        kind,
        result,
        from_cache,
    }
}
