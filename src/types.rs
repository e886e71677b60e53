//! Core types shared across the aggregation layer
//!
//! Data kinds requested from sources and the side of a book level.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A category of data a source can be asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    OrderBook,
    Liquidations,
    Funding,
    OpenInterest,
    LongShortRatio,
    /// Ticker-level data, only used as a current-price fallback
    MarketData,
}

impl DataKind {
    /// Kinds fanned out by a full context request, in request order
    pub const CONTEXT_KINDS: [DataKind; 5] = [
        DataKind::OrderBook,
        DataKind::Liquidations,
        DataKind::Funding,
        DataKind::OpenInterest,
        DataKind::LongShortRatio,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::OrderBook => "order_book",
            DataKind::Liquidations => "liquidations",
            DataKind::Funding => "funding",
            DataKind::OpenInterest => "open_interest",
            DataKind::LongShortRatio => "long_short_ratio",
            DataKind::MarketData => "market_data",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Side of an order book level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookSide {
    Bid,
    Ask,
}

impl fmt::Display for BookSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookSide::Bid => write!(f, "bid"),
            BookSide::Ask => write!(f, "ask"),
        }
    }
}

/// Which data kinds a context request should include
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextFlags {
    pub order_book: bool,
    pub liquidations: bool,
    pub funding: bool,
    pub open_interest: bool,
    pub long_short_ratio: bool,
}

impl Default for ContextFlags {
    fn default() -> Self {
        Self {
            order_book: true,
            liquidations: true,
            funding: true,
            open_interest: true,
            long_short_ratio: true,
        }
    }
}

impl ContextFlags {
    /// Only the order book, nothing else
    pub fn order_book_only() -> Self {
        Self {
            order_book: true,
            liquidations: false,
            funding: false,
            open_interest: false,
            long_short_ratio: false,
        }
    }

    pub fn includes(&self, kind: DataKind) -> bool {
        match kind {
            DataKind::OrderBook => self.order_book,
            DataKind::Liquidations => self.liquidations,
            DataKind::Funding => self.funding,
            DataKind::OpenInterest => self.open_interest,
            DataKind::LongShortRatio => self.long_short_ratio,
            DataKind::MarketData => false,
        }
    }

    /// Requested kinds in fan-out order
    pub fn kinds(&self) -> Vec<DataKind> {
        DataKind::CONTEXT_KINDS
            .into_iter()
            .filter(|k| self.includes(*k))
            .collect()
    }
}
