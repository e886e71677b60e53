//! Order book snapshot model
//!
//! A `BookSnapshot` is the common shape every source adapter produces. Adapters
//! build one from raw levels with [`compute_book_metrics`] rather than filling
//! the derived fields by hand, so spread, depth and imbalance are computed the
//! same way for every venue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::util::{cmp_f64, safe_divide};

/// Band around mid price counted as "near" depth (±2%)
pub const DEPTH_BAND_PCT: f64 = 0.02;

/// One price level of a book
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub size: f64,
    /// `price * size`, in quote currency
    pub notional_value: f64,
}

impl PriceLevel {
    pub fn new(price: f64, size: f64) -> Self {
        Self {
            price,
            size,
            notional_value: price * size,
        }
    }
}

/// Order book of one source for one symbol, with derived metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub source_name: String,
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    /// Sorted descending by price
    pub bids: Vec<PriceLevel>,
    /// Sorted ascending by price
    pub asks: Vec<PriceLevel>,
    pub best_bid: f64,
    pub best_ask: f64,
    pub spread_pct: f64,
    pub mid_price: f64,
    /// Bid notional within 2% below mid
    pub bid_depth_notional: f64,
    /// Ask notional within 2% above mid
    pub ask_depth_notional: f64,
    /// `bid_depth_notional / ask_depth_notional` (1.0 when ask depth is zero)
    pub imbalance: f64,
}

impl BookSnapshot {
    /// Check the book invariants a fused view depends on.
    ///
    /// Returns a human-readable reason on failure; the aggregator turns it
    /// into a `MalformedResponse`.
    pub fn validate(&self) -> Result<(), String> {
        if self.bids.is_empty() || self.asks.is_empty() {
            return Err("empty side".to_string());
        }
        let derived = [
            ("best bid", self.best_bid),
            ("best ask", self.best_ask),
            ("mid price", self.mid_price),
            ("bid depth", self.bid_depth_notional),
            ("ask depth", self.ask_depth_notional),
        ];
        if let Some((field, value)) = derived.iter().find(|(_, v)| !v.is_finite()) {
            return Err(format!("non-finite {} {}", field, value));
        }
        if self.best_bid <= 0.0 {
            return Err(format!("non-positive best bid {}", self.best_bid));
        }
        if self.best_ask <= self.best_bid {
            return Err(format!(
                "best ask {} not above best bid {}",
                self.best_ask, self.best_bid
            ));
        }
        if self.best_bid != self.bids[0].price || self.best_ask != self.asks[0].price {
            return Err(format!(
                "best bid/ask {}/{} disagree with top levels {}/{}",
                self.best_bid, self.best_ask, self.bids[0].price, self.asks[0].price
            ));
        }
        if self.bids.windows(2).any(|w| w[0].price < w[1].price) {
            return Err("bids not sorted descending".to_string());
        }
        if self.asks.windows(2).any(|w| w[0].price > w[1].price) {
            return Err("asks not sorted ascending".to_string());
        }
        Ok(())
    }

    /// Top `n` bids (best first)
    pub fn top_bids(&self, n: usize) -> &[PriceLevel] {
        &self.bids[..self.bids.len().min(n)]
    }

    /// Top `n` asks (best first)
    pub fn top_asks(&self, n: usize) -> &[PriceLevel] {
        &self.asks[..self.asks.len().min(n)]
    }
}

/// Build a snapshot from raw levels, computing every derived field.
///
/// Levels may arrive in any order; non-positive or non-finite prices and
/// sizes are dropped.
/// Returns `None` when either side is empty after filtering.
pub fn compute_book_metrics(
    source_name: &str,
    symbol: &str,
    mut bids: Vec<PriceLevel>,
    mut asks: Vec<PriceLevel>,
) -> Option<BookSnapshot> {
    let usable = |l: &PriceLevel| {
        l.price.is_finite() && l.size.is_finite() && l.price > 0.0 && l.size > 0.0
    };
    bids.retain(usable);
    asks.retain(usable);
    if bids.is_empty() || asks.is_empty() {
        return None;
    }

    bids.sort_by(|a, b| cmp_f64(b.price, a.price));
    asks.sort_by(|a, b| cmp_f64(a.price, b.price));

    let best_bid = bids[0].price;
    let best_ask = asks[0].price;
    let mid_price = (best_bid + best_ask) / 2.0;
    let spread_pct = safe_divide(best_ask - best_bid, best_bid, 0.0) * 100.0;

    let bid_floor = mid_price * (1.0 - DEPTH_BAND_PCT);
    let ask_ceiling = mid_price * (1.0 + DEPTH_BAND_PCT);
    let bid_depth_notional: f64 = bids
        .iter()
        .filter(|l| l.price >= bid_floor)
        .map(|l| l.notional_value)
        .sum();
    let ask_depth_notional: f64 = asks
        .iter()
        .filter(|l| l.price <= ask_ceiling)
        .map(|l| l.notional_value)
        .sum();

    Some(BookSnapshot {
        source_name: source_name.to_string(),
        symbol: symbol.to_string(),
        timestamp: Utc::now(),
        bids,
        asks,
        best_bid,
        best_ask,
        spread_pct,
        mid_price,
        bid_depth_notional,
        ask_depth_notional,
        imbalance: safe_divide(bid_depth_notional, ask_depth_notional, 1.0),
    })
}
