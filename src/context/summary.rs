//! Funding, open interest and long/short readings merged across sources

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::provider::{FundingData, LongShortData, OpenInterestData};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundingSentiment {
    ExtremelyBullish,
    Bullish,
    Neutral,
    Bearish,
    ExtremelyBearish,
}

impl FundingSentiment {
    /// Classify an average funding rate given in percent
    pub fn from_rate(rate: f64) -> Self {
        if rate > 0.01 {
            FundingSentiment::ExtremelyBullish
        } else if rate > 0.005 {
            FundingSentiment::Bullish
        } else if rate < -0.01 {
            FundingSentiment::ExtremelyBearish
        } else if rate < -0.005 {
            FundingSentiment::Bearish
        } else {
            FundingSentiment::Neutral
        }
    }

    pub fn is_extreme(&self) -> bool {
        matches!(
            self,
            FundingSentiment::ExtremelyBullish | FundingSentiment::ExtremelyBearish
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FundingSentiment::ExtremelyBullish => "extremely_bullish",
            FundingSentiment::Bullish => "bullish",
            FundingSentiment::Neutral => "neutral",
            FundingSentiment::Bearish => "bearish",
            FundingSentiment::ExtremelyBearish => "extremely_bearish",
        }
    }
}

/// Average funding across every venue reported by every source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingSummary {
    /// Percent per funding interval
    pub average_rate: f64,
    pub venue_rates: BTreeMap<String, f64>,
    pub sentiment: FundingSentiment,
    pub extreme: bool,
    pub sources: Vec<String>,
}

impl FundingSummary {
    /// `None` when no reading carries a venue rate
    pub fn from_readings(readings: &[FundingData]) -> Option<Self> {
        let mut venue_rates = BTreeMap::new();
        let mut sources = Vec::new();
        for reading in readings {
            venue_rates.extend(reading.venue_rates.iter().map(|(k, v)| (k.clone(), *v)));
            if !sources.contains(&reading.source) {
                sources.push(reading.source.clone());
            }
        }
        if venue_rates.is_empty() {
            return None;
        }

        let average_rate = venue_rates.values().sum::<f64>() / venue_rates.len() as f64;
        let sentiment = FundingSentiment::from_rate(average_rate);
        Some(Self {
            average_rate,
            venue_rates,
            sentiment,
            extreme: sentiment.is_extreme(),
            sources,
        })
    }
}

/// Open interest summed across venues
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenInterestSummary {
    pub total_oi_usd: f64,
    pub venue_oi_usd: BTreeMap<String, f64>,
    pub sources: Vec<String>,
}

impl OpenInterestSummary {
    pub fn from_readings(readings: &[OpenInterestData]) -> Option<Self> {
        let mut venue_oi_usd = BTreeMap::new();
        let mut sources = Vec::new();
        for reading in readings {
            venue_oi_usd.extend(reading.venue_oi_usd.iter().map(|(k, v)| (k.clone(), *v)));
            if !sources.contains(&reading.source) {
                sources.push(reading.source.clone());
            }
        }
        if venue_oi_usd.is_empty() {
            return None;
        }

        Some(Self {
            total_oi_usd: venue_oi_usd.values().sum(),
            venue_oi_usd,
            sources,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LongShortSentiment {
    CrowdedLong,
    CrowdedShort,
    Balanced,
}

impl LongShortSentiment {
    pub fn from_ratio(long_ratio: f64) -> Self {
        if long_ratio > 0.65 {
            LongShortSentiment::CrowdedLong
        } else if long_ratio < 0.35 {
            LongShortSentiment::CrowdedShort
        } else {
            LongShortSentiment::Balanced
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LongShortSentiment::CrowdedLong => "crowded_long",
            LongShortSentiment::CrowdedShort => "crowded_short",
            LongShortSentiment::Balanced => "balanced",
        }
    }
}

/// Average share of accounts positioned long
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongShortSummary {
    pub average_long_ratio: f64,
    pub venue_long_ratios: BTreeMap<String, f64>,
    pub sentiment: LongShortSentiment,
    pub sources: Vec<String>,
}

impl LongShortSummary {
    pub fn from_readings(readings: &[LongShortData]) -> Option<Self> {
        let mut venue_long_ratios = BTreeMap::new();
        let mut sources = Vec::new();
        for reading in readings {
            venue_long_ratios.extend(
                reading
                    .venue_long_ratios
                    .iter()
                    .map(|(k, v)| (k.clone(), *v)),
            );
            if !sources.contains(&reading.source) {
                sources.push(reading.source.clone());
            }
        }
        if venue_long_ratios.is_empty() {
            return None;
        }

        let average_long_ratio =
            venue_long_ratios.values().sum::<f64>() / venue_long_ratios.len() as f64;
        Some(Self {
            average_long_ratio,
            venue_long_ratios,
            sentiment: LongShortSentiment::from_ratio(average_long_ratio),
            sources,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn funding(source: &str, rates: &[(&str, f64)]) -> FundingData {
        FundingData {
            symbol: "BTC".to_string(),
            venue_rates: rates.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            source: source.to_string(),
        }
    }

    #[test]
    fn test_funding_average_and_sentiment() {
        let summary = FundingSummary::from_readings(&[
            funding("binance", &[("Binance", 0.012)]),
            funding("coinglass", &[("OKX", 0.010), ("Bybit", 0.014)]),
        ])
        .unwrap();

        assert!((summary.average_rate - 0.012).abs() < 1e-12);
        assert_eq!(summary.sentiment, FundingSentiment::ExtremelyBullish);
        assert!(summary.extreme);
        assert_eq!(summary.sources, vec!["binance", "coinglass"]);
    }

    #[test]
    fn test_funding_sentiment_bands() {
        assert_eq!(FundingSentiment::from_rate(0.007), FundingSentiment::Bullish);
        assert_eq!(FundingSentiment::from_rate(-0.007), FundingSentiment::Bearish);
        assert_eq!(FundingSentiment::from_rate(-0.02), FundingSentiment::ExtremelyBearish);
        assert_eq!(FundingSentiment::from_rate(0.005), FundingSentiment::Neutral);
        assert!(FundingSummary::from_readings(&[funding("x", &[])]).is_none());
    }

    #[test]
    fn test_open_interest_total() {
        let reading = OpenInterestData {
            symbol: "BTC".to_string(),
            venue_oi_usd: BTreeMap::from([("Binance".to_string(), 8e9), ("OKX".to_string(), 4e9)]),
            source: "coinglass".to_string(),
        };
        let summary = OpenInterestSummary::from_readings(&[reading]).unwrap();
        assert_eq!(summary.total_oi_usd, 12e9);
    }

    #[test]
    fn test_long_short_crowding() {
        let reading = LongShortData {
            symbol: "BTC".to_string(),
            venue_long_ratios: BTreeMap::from([
                ("Binance".to_string(), 0.70),
                ("Bybit".to_string(), 0.66),
            ]),
            source: "coinglass".to_string(),
        };
        let summary = LongShortSummary::from_readings(&[reading]).unwrap();
        assert_eq!(summary.sentiment, LongShortSentiment::CrowdedLong);
        assert_eq!(LongShortSentiment::from_ratio(0.5), LongShortSentiment::Balanced);
        assert_eq!(LongShortSentiment::from_ratio(0.3), LongShortSentiment::CrowdedShort);
    }
}
