//! Exchange data provider contract
//!
//! Every concrete venue adapter implements [`ExchangeProvider`]. Adapters turn
//! their venue's wire format into the common shapes here and build order books
//! with [`crate::book::compute_book_metrics`]. Resilience (rate limiting,
//! breaking, caching) is applied by the aggregator, never inside an adapter.

mod models;

pub use models::{
    assess_cascade_risk, FundingData, LiquidationData, LiquidationLevel, LiquidationRisk,
    LongShortData, MarketData, OpenInterestData, PositionSide,
};

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::book::BookSnapshot;
use crate::error::SourceError;
use crate::types::DataKind;

/// Default number of levels requested per side
pub const DEFAULT_BOOK_DEPTH: usize = 50;

/// Uniform capability contract of a market data source
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeProvider: Send + Sync {
    /// Stable source name, used as the key for weights, limits and breakers
    fn name(&self) -> &str;

    /// Cheap readiness check (credentials present, not disabled). No I/O.
    fn check_availability(&self) -> bool;

    /// Whether this source can serve `kind` at all
    fn supports(&self, kind: DataKind) -> bool {
        matches!(
            kind,
            DataKind::OrderBook
                | DataKind::MarketData
                | DataKind::Funding
                | DataKind::OpenInterest
        )
    }

    async fn get_market_data(&self, symbol: &str) -> Result<MarketData, SourceError>;

    async fn get_order_book(
        &self,
        _symbol: &str,
        _depth: usize,
    ) -> Result<Option<BookSnapshot>, SourceError> {
        Ok(None)
    }

    /// Defaults to the funding rate carried on the ticker
    async fn get_funding_rate(&self, symbol: &str) -> Result<Option<FundingData>, SourceError> {
        let data = self.get_market_data(symbol).await?;
        Ok(data.funding_rate.map(|rate| FundingData {
            symbol: symbol.to_string(),
            venue_rates: BTreeMap::from([(self.name().to_string(), rate)]),
            source: data.source,
        }))
    }

    /// Defaults to the open interest carried on the ticker
    async fn get_open_interest(
        &self,
        symbol: &str,
    ) -> Result<Option<OpenInterestData>, SourceError> {
        let data = self.get_market_data(symbol).await?;
        Ok(data.open_interest.map(|oi| OpenInterestData {
            symbol: symbol.to_string(),
            venue_oi_usd: BTreeMap::from([(self.name().to_string(), oi)]),
            source: data.source,
        }))
    }

    async fn get_liquidations(&self, _symbol: &str) -> Result<Option<LiquidationData>, SourceError> {
        Ok(None)
    }

    async fn get_long_short_ratio(
        &self,
        _symbol: &str,
    ) -> Result<Option<LongShortData>, SourceError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TickerOnly {
        funding: Option<f64>,
    }

    #[async_trait]
    impl ExchangeProvider for TickerOnly {
        fn name(&self) -> &str {
            "Kucoin"
        }

        fn check_availability(&self) -> bool {
            true
        }

        async fn get_market_data(&self, _symbol: &str) -> Result<MarketData, SourceError> {
            Ok(MarketData {
                price: 100.0,
                volume_24h: 1e6,
                funding_rate: self.funding,
                open_interest: Some(5e8),
                source: "kucoin_futures".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_default_funding_derives_from_market_data() {
        let provider = TickerOnly {
            funding: Some(0.0075),
        };
        let funding = provider.get_funding_rate("BTC").await.unwrap().unwrap();
        assert_eq!(funding.venue_rates.get("Kucoin"), Some(&0.0075));
        assert_eq!(funding.source, "kucoin_futures");

        let oi = provider.get_open_interest("BTC").await.unwrap().unwrap();
        assert_eq!(oi.venue_oi_usd.get("Kucoin"), Some(&5e8));
    }

    #[test]
    fn test_default_funding_absent_when_ticker_lacks_it() {
        let provider = TickerOnly { funding: None };
        let funding = tokio_test::block_on(provider.get_funding_rate("BTC"));
        assert!(funding.unwrap().is_none());
        let book = tokio_test::block_on(provider.get_order_book("BTC", DEFAULT_BOOK_DEPTH));
        assert!(book.unwrap().is_none());
        assert!(!provider.supports(DataKind::Liquidations));
    }
}
