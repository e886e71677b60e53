//! Payloads returned by source adapters besides order books

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Ticker-level market data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    pub price: f64,
    pub volume_24h: f64,
    /// Funding rate in percent per interval, when the venue reports one
    pub funding_rate: Option<f64>,
    /// Open interest in quote currency
    pub open_interest: Option<f64>,
    pub source: String,
}

/// Funding rates keyed by venue, in percent per interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingData {
    pub symbol: String,
    pub venue_rates: BTreeMap<String, f64>,
    pub source: String,
}

/// Open interest keyed by venue, in quote currency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenInterestData {
    pub symbol: String,
    pub venue_oi_usd: BTreeMap<String, f64>,
    pub source: String,
}

/// Share of accounts positioned long, keyed by venue (0.0 - 1.0)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongShortData {
    pub symbol: String,
    pub venue_long_ratios: BTreeMap<String, f64>,
    pub source: String,
}

/// Liquidation risk level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiquidationRisk {
    Low,
    Medium,
    High,
    Extreme,
}

impl LiquidationRisk {
    /// High or extreme
    pub fn is_elevated(&self) -> bool {
        matches!(self, LiquidationRisk::High | LiquidationRisk::Extreme)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LiquidationRisk::Low => "low",
            LiquidationRisk::Medium => "medium",
            LiquidationRisk::High => "high",
            LiquidationRisk::Extreme => "extreme",
        }
    }
}

impl fmt::Display for LiquidationRisk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which positions a cluster would liquidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

/// A price at which a cluster of positions would be liquidated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidationLevel {
    pub price: f64,
    pub pct_from_current: f64,
    pub total_usd: f64,
    pub side: PositionSide,
    pub risk: LiquidationRisk,
}

/// Aggregated liquidation statistics for a symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidationData {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub total_24h_usd: f64,
    pub long_24h_usd: f64,
    pub short_24h_usd: f64,
    /// Share of liquidated notional that was long
    pub long_ratio: f64,
    pub total_4h_usd: f64,
    pub total_1h_usd: f64,
    pub levels: Vec<LiquidationLevel>,
    pub nearest_long_cluster: Option<LiquidationLevel>,
    pub nearest_short_cluster: Option<LiquidationLevel>,
    pub cascade_risk: LiquidationRisk,
    pub cascade_risk_reason: String,
    pub exchange_breakdown: BTreeMap<String, f64>,
}

impl LiquidationData {
    /// Build from 24h long/short totals, estimating the shorter windows and
    /// assessing cascade risk.
    ///
    /// The 4h and 1h totals are pro-rata estimates (17% and 4% of 24h),
    /// not measured values.
    pub fn from_totals(symbol: &str, long_24h_usd: f64, short_24h_usd: f64) -> Self {
        let total_24h_usd = long_24h_usd + short_24h_usd;
        let long_ratio = if total_24h_usd > 0.0 {
            long_24h_usd / total_24h_usd
        } else {
            0.5
        };
        let (cascade_risk, cascade_risk_reason) = assess_cascade_risk(total_24h_usd, long_ratio);

        Self {
            symbol: symbol.to_string(),
            timestamp: Utc::now(),
            total_24h_usd,
            long_24h_usd,
            short_24h_usd,
            long_ratio,
            total_4h_usd: total_24h_usd * 0.17,
            total_1h_usd: total_24h_usd * 0.04,
            levels: Vec::new(),
            nearest_long_cluster: None,
            nearest_short_cluster: None,
            cascade_risk,
            cascade_risk_reason,
            exchange_breakdown: BTreeMap::new(),
        }
    }

    /// Attach liquidation levels and derive the nearest cluster on each side
    pub fn with_levels(mut self, levels: Vec<LiquidationLevel>) -> Self {
        let nearest = |side: PositionSide| {
            levels
                .iter()
                .filter(|l| l.side == side)
                .min_by(|a, b| {
                    crate::util::cmp_f64(a.pct_from_current.abs(), b.pct_from_current.abs())
                })
                .cloned()
        };
        self.nearest_long_cluster = nearest(PositionSide::Long);
        self.nearest_short_cluster = nearest(PositionSide::Short);
        self.levels = levels;
        self
    }

    /// Combine readings from several sources by summing totals.
    ///
    /// A single reading is returned as delivered; several are summed and the
    /// shorter windows and cascade risk re-estimated from the combined totals.
    pub fn merge(readings: Vec<LiquidationData>) -> Option<LiquidationData> {
        let mut iter = readings.into_iter();
        let first = iter.next()?;
        if iter.len() == 0 {
            return Some(first);
        }
        let mut merged = iter.fold(first, |mut acc, next| {
            acc.long_24h_usd += next.long_24h_usd;
            acc.short_24h_usd += next.short_24h_usd;
            acc.levels.extend(next.levels);
            for (venue, usd) in next.exchange_breakdown {
                *acc.exchange_breakdown.entry(venue).or_insert(0.0) += usd;
            }
            acc
        });

        let rebuilt = LiquidationData::from_totals(
            &merged.symbol,
            merged.long_24h_usd,
            merged.short_24h_usd,
        )
        .with_levels(std::mem::take(&mut merged.levels));

        Some(LiquidationData {
            exchange_breakdown: merged.exchange_breakdown,
            ..rebuilt
        })
    }
}

/// Grade 24h liquidation volume and append the long/short skew when lopsided
pub fn assess_cascade_risk(total_24h_usd: f64, long_ratio: f64) -> (LiquidationRisk, String) {
    let millions = total_24h_usd / 1e6;
    let (risk, mut reason) = if total_24h_usd >= 500_000_000.0 {
        (
            LiquidationRisk::Extreme,
            format!("Massive liquidations (${:.0}M in 24h)", millions),
        )
    } else if total_24h_usd >= 200_000_000.0 {
        (
            LiquidationRisk::High,
            format!("High liquidation volume (${:.0}M in 24h)", millions),
        )
    } else if total_24h_usd >= 50_000_000.0 {
        (
            LiquidationRisk::Medium,
            format!("Moderate liquidations (${:.0}M in 24h)", millions),
        )
    } else {
        (LiquidationRisk::Low, "Normal liquidation levels".to_string())
    };

    if long_ratio > 0.75 {
        reason.push_str(&format!(" - Heavy long bias ({:.0}%)", long_ratio * 100.0));
    } else if long_ratio < 0.25 {
        reason.push_str(&format!(
            " - Heavy short bias ({:.0}%)",
            (1.0 - long_ratio) * 100.0
        ));
    }

    (risk, reason)
}
