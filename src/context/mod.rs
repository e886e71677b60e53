//! Market microstructure context
//!
//! The immutable result of one aggregation call. Everything a consumer needs
//! (including the text rendering in [`render`]) is derived from public fields.

pub mod render;
mod summary;

pub use summary::{
    FundingSentiment, FundingSummary, LongShortSentiment, LongShortSummary, OpenInterestSummary,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::provider::LiquidationData;
use crate::types::BookSide;

/// Directional read of the market, also used to label book imbalance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketBias {
    StrongBullish,
    Bullish,
    Neutral,
    Bearish,
    StrongBearish,
}

impl MarketBias {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketBias::StrongBullish => "strong_bullish",
            MarketBias::Bullish => "bullish",
            MarketBias::Neutral => "neutral",
            MarketBias::Bearish => "bearish",
            MarketBias::StrongBearish => "strong_bearish",
        }
    }

    pub fn is_bullish(&self) -> bool {
        matches!(self, MarketBias::StrongBullish | MarketBias::Bullish)
    }

    pub fn is_bearish(&self) -> bool {
        matches!(self, MarketBias::StrongBearish | MarketBias::Bearish)
    }
}

impl fmt::Display for MarketBias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whale wall strength relative to the detection threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WhaleStrength {
    /// At least three times the threshold
    Strong,
    Moderate,
}

impl fmt::Display for WhaleStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WhaleStrength::Strong => write!(f, "strong"),
            WhaleStrength::Moderate => write!(f, "moderate"),
        }
    }
}

/// A single book level large enough to act as support or resistance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhaleWall {
    pub price: f64,
    pub notional_value: f64,
    /// Signed distance from the source's own mid price, in percent
    pub pct_from_mid: f64,
    pub source_name: String,
    pub side: BookSide,
    pub strength: WhaleStrength,
}

/// Weighted fusion of the order books that responded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedBook {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub sources_included: Vec<String>,
    /// Sum of the included sources' market-share weights, in percent
    pub coverage_pct: f64,
    pub best_bid: f64,
    pub best_ask: f64,
    pub spread_pct: f64,
    pub mid_price: f64,
    /// Estimated whole-market bid depth near mid.
    ///
    /// Each source's visible depth is scaled by the inverse of its market-share
    /// weight. This is an approximation, not a measured quantity.
    pub total_bid_depth: f64,
    /// Estimated whole-market ask depth near mid, same approximation
    pub total_ask_depth: f64,
    pub imbalance: f64,
    pub imbalance_label: MarketBias,
    /// Largest first, at most five
    pub whale_bids: Vec<WhaleWall>,
    /// Largest first, at most five
    pub whale_asks: Vec<WhaleWall>,
    /// 0 - 100 step score of average depth
    pub liquidity_score: f64,
}

/// Overall outcome of a context request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextStatus {
    /// Every requested fetch succeeded
    Ok,
    /// Some fetches failed; see `warnings`
    Degraded,
    /// An order book was requested and no source produced one
    InsufficientData,
}

impl fmt::Display for ContextStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextStatus::Ok => write!(f, "ok"),
            ContextStatus::Degraded => write!(f, "degraded"),
            ContextStatus::InsufficientData => write!(f, "insufficient_data"),
        }
    }
}

/// Full microstructure picture for one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MicrostructureContext {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub status: ContextStatus,
    /// Aggregated mid, or a ticker price when no book was available (0.0 if neither)
    pub current_price: f64,

    pub aggregated_book: Option<AggregatedBook>,
    pub liquidations: Option<LiquidationData>,
    pub funding: Option<FundingSummary>,
    pub open_interest: Option<OpenInterestSummary>,
    pub long_short_ratio: Option<LongShortSummary>,

    pub bias: MarketBias,
    pub bias_confidence: f64,
    pub bias_reasons: Vec<String>,

    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,

    /// Below current price, nearest first, at most five
    pub support_levels: Vec<f64>,
    /// Above current price, nearest first, at most five
    pub resistance_levels: Vec<f64>,

    pub suggested_sl_long: Option<f64>,
    pub suggested_tp_long: Option<f64>,
    pub suggested_sl_short: Option<f64>,
    pub suggested_tp_short: Option<f64>,
}

impl MicrostructureContext {
    /// Plain key-value form for persistence or transport
    pub fn to_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }

    /// Tagged text block for a language model prompt
    pub fn to_prompt_context(&self) -> String {
        render::to_prompt_context(self)
    }

    pub fn has_order_book(&self) -> bool {
        self.aggregated_book.is_some()
    }
}
