//! Bias scoring, warnings, recommendations and key levels
//!
//! Every function here is pure: it reads the fused book and summaries and
//! returns plain values. Funding, liquidation and long/short signals are read
//! contrarian (a crowded side is a signal against it).

use crate::context::{AggregatedBook, FundingSummary, LongShortSummary, MarketBias};
use crate::provider::{LiquidationData, PositionSide};
use crate::util::cmp_f64;

/// Liquidation levels considered for key levels
const LIQUIDATION_LEVELS_SCANNED: usize = 10;
/// Support and resistance levels kept per side
const MAX_KEY_LEVELS: usize = 5;
/// Offset of suggested stops and targets from a key level
const LEVEL_BUFFER: f64 = 0.005;

/// Everything the signal stage reads
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalInputs<'a> {
    pub book: Option<&'a AggregatedBook>,
    pub liquidations: Option<&'a LiquidationData>,
    pub funding: Option<&'a FundingSummary>,
    pub long_short: Option<&'a LongShortSummary>,
}

/// One scored signal and, when it leans, why
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub score: f64,
    pub reason: Option<String>,
}

impl Signal {
    fn neutral() -> Self {
        Self {
            score: 0.0,
            reason: None,
        }
    }

    fn leaning(score: f64, reason: String) -> Self {
        Self {
            score,
            reason: Some(reason),
        }
    }
}

pub fn order_book_signal(book: &AggregatedBook) -> Signal {
    if book.imbalance > 1.3 {
        Signal::leaning(
            1.0,
            format!("Order book bullish (imbalance: {:.2})", book.imbalance),
        )
    } else if book.imbalance < 0.77 {
        Signal::leaning(
            -1.0,
            format!("Order book bearish (imbalance: {:.2})", book.imbalance),
        )
    } else {
        Signal::neutral()
    }
}

/// Funding rate in percent; positive funding means longs pay, read bearish.
/// A rate inside the neutral band gives no signal.
pub fn funding_signal(funding: &FundingSummary) -> Option<Signal> {
    let rate = funding.average_rate;
    let signal = if rate > 0.01 {
        Signal::leaning(
            -0.5,
            format!("Extreme positive funding ({:.4}%) - crowded long", rate),
        )
    } else if rate < -0.01 {
        Signal::leaning(
            0.5,
            format!("Extreme negative funding ({:.4}%) - crowded short", rate),
        )
    } else if rate > 0.005 {
        Signal::leaning(-0.3, format!("Elevated funding ({:.4}%) - longs paying", rate))
    } else if rate < -0.005 {
        Signal::leaning(0.3, format!("Negative funding ({:.4}%) - shorts paying", rate))
    } else {
        return None;
    };
    Some(signal)
}

pub fn liquidation_signal(liquidations: &LiquidationData) -> Option<Signal> {
    let long_ratio = liquidations.long_ratio;
    let signal = if long_ratio > 0.7 {
        Signal::leaning(
            -0.5,
            format!(
                "Heavy long liquidations ({:.0}%) - potential bottom",
                long_ratio * 100.0
            ),
        )
    } else if long_ratio < 0.3 {
        Signal::leaning(
            0.5,
            format!(
                "Heavy short liquidations ({:.0}%) - potential top",
                (1.0 - long_ratio) * 100.0
            ),
        )
    } else {
        return None;
    };
    Some(signal)
}

pub fn long_short_signal(long_short: &LongShortSummary) -> Option<Signal> {
    let ratio = long_short.average_long_ratio;
    if ratio > 0.65 {
        Some(Signal::leaning(
            -0.3,
            "Crowded long (retail) - contrarian bearish".to_string(),
        ))
    } else if ratio < 0.35 {
        Some(Signal::leaning(
            0.3,
            "Crowded short (retail) - contrarian bullish".to_string(),
        ))
    } else {
        None
    }
}

/// Combined bias of every available signal
#[derive(Debug, Clone, PartialEq)]
pub struct BiasAssessment {
    pub bias: MarketBias,
    pub confidence: f64,
    pub reasons: Vec<String>,
    /// Number of signals that entered the mean
    pub signal_count: usize,
}

impl BiasAssessment {
    pub fn has_signals(&self) -> bool {
        self.signal_count > 0
    }
}

/// Map a mean signal score onto a bias
pub fn bias_from_score(mean: f64) -> MarketBias {
    if mean > 0.5 {
        MarketBias::StrongBullish
    } else if mean > 0.2 {
        MarketBias::Bullish
    } else if mean < -0.5 {
        MarketBias::StrongBearish
    } else if mean < -0.2 {
        MarketBias::Bearish
    } else {
        MarketBias::Neutral
    }
}

/// Average the available signals. A balanced order book counts as 0; the
/// other inputs only count when they lean.
pub fn compute_bias(inputs: &SignalInputs<'_>) -> BiasAssessment {
    let signals: Vec<Signal> = [
        inputs.book.map(order_book_signal),
        inputs.funding.and_then(funding_signal),
        inputs.liquidations.and_then(liquidation_signal),
        inputs.long_short.and_then(long_short_signal),
    ]
    .into_iter()
    .flatten()
    .collect();

    if signals.is_empty() {
        return BiasAssessment {
            bias: MarketBias::Neutral,
            confidence: 0.3,
            reasons: vec!["Insufficient data".to_string()],
            signal_count: 0,
        };
    }

    let mean = signals.iter().map(|s| s.score).sum::<f64>() / signals.len() as f64;
    BiasAssessment {
        bias: bias_from_score(mean),
        confidence: (mean.abs() + 0.3).min(0.9),
        signal_count: signals.len(),
        reasons: signals.into_iter().filter_map(|s| s.reason).collect(),
    }
}

/// Warnings derived from the data itself (not from failed fetches)
pub fn data_warnings(inputs: &SignalInputs<'_>) -> Vec<String> {
    let mut warnings = Vec::new();

    if let Some(liq) = inputs.liquidations {
        if liq.cascade_risk.is_elevated() {
            warnings.push(format!("HIGH CASCADE RISK: {}", liq.cascade_risk_reason));
        }
    }
    if let Some(funding) = inputs.funding {
        if funding.extreme {
            warnings.push("Extreme funding rate - potential reversal signal".to_string());
        }
    }
    if let Some(book) = inputs.book {
        if book.spread_pct > 0.1 {
            warnings.push(format!(
                "Wide spread ({:.2}%) - low liquidity",
                book.spread_pct
            ));
        }
        if book.liquidity_score < 40.0 {
            warnings.push("Low liquidity - execution risk".to_string());
        }
    }

    warnings
}

pub fn recommendations(inputs: &SignalInputs<'_>) -> Vec<String> {
    let mut recs = Vec::new();

    if let Some(book) = inputs.book {
        if let Some(top) = book.whale_bids.first() {
            recs.push(format!(
                "Strong support at {:.2} ({:+.1}%) - ${:.1}M whale wall [{}]",
                top.price,
                top.pct_from_mid,
                top.notional_value / 1e6,
                top.source_name
            ));
        }
        if let Some(top) = book.whale_asks.first() {
            recs.push(format!(
                "Resistance at {:.2} ({:+.1}%) - ${:.1}M whale wall [{}]",
                top.price,
                top.pct_from_mid,
                top.notional_value / 1e6,
                top.source_name
            ));
        }
    }

    if let Some(liq) = inputs.liquidations {
        if let Some(cluster) = &liq.nearest_short_cluster {
            recs.push(format!(
                "Short squeeze target: {:.2} ({:+.1}%) - ${:.0}M shorts at risk",
                cluster.price,
                cluster.pct_from_current,
                cluster.total_usd / 1e6
            ));
        }
        if let Some(cluster) = &liq.nearest_long_cluster {
            recs.push(format!(
                "Long liquidation zone: {:.2} ({:+.1}%) - ${:.0}M longs at risk",
                cluster.price,
                cluster.pct_from_current,
                cluster.total_usd / 1e6
            ));
        }
    }

    recs
}

/// Support (below price) and resistance (above price) levels, nearest first
pub fn key_levels(inputs: &SignalInputs<'_>, current_price: f64) -> (Vec<f64>, Vec<f64>) {
    let mut supports = Vec::new();
    let mut resistances = Vec::new();

    if let Some(book) = inputs.book {
        supports.extend(book.whale_bids.iter().map(|w| w.price));
        resistances.extend(book.whale_asks.iter().map(|w| w.price));
    }

    if let Some(liq) = inputs.liquidations {
        for level in liq
            .levels
            .iter()
            .take(LIQUIDATION_LEVELS_SCANNED)
            .filter(|l| l.risk.is_elevated())
        {
            match level.side {
                PositionSide::Long => supports.push(level.price),
                PositionSide::Short => resistances.push(level.price),
            }
        }
    }

    supports.retain(|p| *p < current_price);
    supports.sort_by(|a, b| cmp_f64(*b, *a));
    supports.dedup();
    supports.truncate(MAX_KEY_LEVELS);

    resistances.retain(|p| *p > current_price);
    resistances.sort_by(|a, b| cmp_f64(*a, *b));
    resistances.dedup();
    resistances.truncate(MAX_KEY_LEVELS);

    (supports, resistances)
}

/// Heuristic stop-loss and take-profit prices for both directions
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SuggestedLevels {
    pub sl_long: f64,
    pub tp_long: f64,
    pub sl_short: f64,
    pub tp_short: f64,
}

impl SuggestedLevels {
    /// Needs at least one support and one resistance
    pub fn from_key_levels(supports: &[f64], resistances: &[f64]) -> Option<Self> {
        let support = *supports.first()?;
        let resistance = *resistances.first()?;
        Some(Self {
            sl_long: support * (1.0 - LEVEL_BUFFER),
            tp_long: resistance * (1.0 - LEVEL_BUFFER),
            sl_short: resistance * (1.0 + LEVEL_BUFFER),
            tp_short: support * (1.0 + LEVEL_BUFFER),
        })
    }
}
