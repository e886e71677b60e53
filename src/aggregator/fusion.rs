//! Weighted fusion of per-source order books

use chrono::Utc;
use std::sync::Arc;

use crate::book::{BookSnapshot, PriceLevel};
use crate::config::AggregatorConfig;
use crate::context::{AggregatedBook, MarketBias, WhaleStrength, WhaleWall};
use crate::types::BookSide;
use crate::util::{cmp_f64, pct_from, safe_divide, weighted_average};

/// Label a depth imbalance ratio
pub fn imbalance_label(imbalance: f64) -> MarketBias {
    if imbalance > 1.5 {
        MarketBias::StrongBullish
    } else if imbalance > 1.2 {
        MarketBias::Bullish
    } else if imbalance < 0.67 {
        MarketBias::StrongBearish
    } else if imbalance < 0.83 {
        MarketBias::Bearish
    } else {
        MarketBias::Neutral
    }
}

/// Step score of average (bid + ask) depth in USD
pub fn liquidity_score(avg_depth: f64) -> f64 {
    if avg_depth >= 100_000_000.0 {
        100.0
    } else if avg_depth >= 50_000_000.0 {
        80.0
    } else if avg_depth >= 20_000_000.0 {
        60.0
    } else if avg_depth >= 5_000_000.0 {
        40.0
    } else {
        20.0
    }
}

/// Whale walls among the first `scan_levels` levels of one side
pub fn detect_whales(
    snapshot: &BookSnapshot,
    side: BookSide,
    threshold: f64,
    scan_levels: usize,
) -> Vec<WhaleWall> {
    let levels: &[PriceLevel] = match side {
        BookSide::Bid => snapshot.top_bids(scan_levels),
        BookSide::Ask => snapshot.top_asks(scan_levels),
    };

    levels
        .iter()
        .filter(|level| level.notional_value >= threshold)
        .map(|level| WhaleWall {
            price: level.price,
            notional_value: level.notional_value,
            pct_from_mid: pct_from(level.price, snapshot.mid_price),
            source_name: snapshot.source_name.clone(),
            side,
            strength: if level.notional_value >= threshold * 3.0 {
                WhaleStrength::Strong
            } else {
                WhaleStrength::Moderate
            },
        })
        .collect()
}

/// Largest first, truncated to `keep`
fn strongest(mut walls: Vec<WhaleWall>, keep: usize) -> Vec<WhaleWall> {
    walls.sort_by(|a, b| cmp_f64(b.notional_value, a.notional_value));
    walls.truncate(keep);
    walls
}

/// Fuse the snapshots that responded into one consensus book.
///
/// Prices are averaged with market-share weights renormalised over the
/// responding sources only. Depth is estimated by dividing each source's
/// visible depth by its own weight (a source holding 20% of the market is
/// taken to show a fifth of the real depth). That estimate is a heuristic.
///
/// Returns `None` when `snapshots` is empty.
pub fn fuse_books(
    symbol: &str,
    snapshots: &[Arc<BookSnapshot>],
    config: &AggregatorConfig,
) -> Option<AggregatedBook> {
    if snapshots.is_empty() {
        return None;
    }

    let weights: Vec<f64> = snapshots
        .iter()
        .map(|s| config.weight_for(&s.source_name))
        .collect();
    let total_weight: f64 = weights.iter().sum();

    let bids: Vec<f64> = snapshots.iter().map(|s| s.best_bid).collect();
    let asks: Vec<f64> = snapshots.iter().map(|s| s.best_ask).collect();
    let best_bid = weighted_average(&bids, &weights);
    let best_ask = weighted_average(&asks, &weights);

    let mut total_bid_depth = 0.0;
    let mut total_ask_depth = 0.0;
    let mut whale_bids = Vec::new();
    let mut whale_asks = Vec::new();

    for (snapshot, &weight) in snapshots.iter().zip(&weights) {
        if weight > 0.0 {
            total_bid_depth += snapshot.bid_depth_notional / weight;
            total_ask_depth += snapshot.ask_depth_notional / weight;
        }

        whale_bids.extend(detect_whales(
            snapshot,
            BookSide::Bid,
            config.whale_threshold_usd,
            config.whale_scan_levels,
        ));
        whale_asks.extend(detect_whales(
            snapshot,
            BookSide::Ask,
            config.whale_threshold_usd,
            config.whale_scan_levels,
        ));
    }

    let imbalance = safe_divide(total_bid_depth, total_ask_depth, 1.0);

    Some(AggregatedBook {
        symbol: symbol.to_string(),
        timestamp: Utc::now(),
        sources_included: snapshots.iter().map(|s| s.source_name.clone()).collect(),
        coverage_pct: total_weight * 100.0,
        best_bid,
        best_ask,
        spread_pct: safe_divide(best_ask - best_bid, best_bid, 0.0) * 100.0,
        mid_price: (best_bid + best_ask) / 2.0,
        total_bid_depth,
        total_ask_depth,
        imbalance,
        imbalance_label: imbalance_label(imbalance),
        whale_bids: strongest(whale_bids, config.max_whales_per_side),
        whale_asks: strongest(whale_asks, config.max_whales_per_side),
        liquidity_score: liquidity_score((total_bid_depth + total_ask_depth) / 2.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::compute_book_metrics;
    use std::collections::HashMap;

    fn config(weights: &[(&str, f64)]) -> AggregatorConfig {
        AggregatorConfig {
            weights: weights
                .iter()
                .map(|(k, v)| (k.to_lowercase(), *v))
                .collect::<HashMap<_, _>>(),
            ..AggregatorConfig::default()
        }
    }

    fn book(source: &str, bid: f64, ask: f64) -> Arc<BookSnapshot> {
        Arc::new(
            compute_book_metrics(
                source,
                "BTC",
                vec![PriceLevel::new(bid, 10.0)],
                vec![PriceLevel::new(ask, 10.0)],
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_weighted_mid() {
        let cfg = config(&[("A", 0.8), ("B", 0.2)]);
        let fused = fuse_books("BTC", &[book("A", 99.0, 101.0), book("B", 109.0, 111.0)], &cfg)
            .unwrap();

        assert!((fused.mid_price - 102.0).abs() < 1e-9);
        assert!((fused.coverage_pct - 100.0).abs() < 1e-9);
        assert_eq!(fused.sources_included, vec!["A", "B"]);
    }

    #[test]
    fn test_weights_renormalise_over_responders() {
        let cfg = config(&[("A", 0.45), ("B", 0.15)]);
        let fused = fuse_books("BTC", &[book("A", 99.0, 101.0), book("B", 109.0, 111.0)], &cfg)
            .unwrap();

        // 0.75 / 0.25 after renormalisation
        assert!((fused.mid_price - 102.5).abs() < 1e-9);
        assert!((fused.coverage_pct - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_source_uses_default_weight() {
        let cfg = config(&[("A", 0.45)]);
        let fused = fuse_books("BTC", &[book("Kraken", 99.0, 101.0)], &cfg).unwrap();
        assert!((fused.coverage_pct - 5.0).abs() < 1e-9);
        assert!((fused.mid_price - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_depth_scaled_by_inverse_weight() {
        let cfg = config(&[("A", 0.2)]);
        let snapshot = book("A", 99.0, 101.0);
        let fused = fuse_books("BTC", &[snapshot.clone()], &cfg).unwrap();
        assert!((fused.total_bid_depth - snapshot.bid_depth_notional * 5.0).abs() < 1e-6);
        assert!((fused.imbalance - fused.total_bid_depth / fused.total_ask_depth).abs() < 1e-12);
    }

    #[test]
    fn test_whale_strength() {
        let snapshot = compute_book_metrics(
            "Binance",
            "BTC",
            vec![
                PriceLevel::new(100.0, 20_000.0),
                PriceLevel::new(99.0, 6_000_000.0 / 99.0),
                PriceLevel::new(98.0, 100.0),
            ],
            vec![PriceLevel::new(101.0, 1.0)],
        )
        .unwrap();

        let whales = detect_whales(&snapshot, BookSide::Bid, 500_000.0, 20);
        assert_eq!(whales.len(), 2);
        assert_eq!(whales[0].notional_value, 2_000_000.0);
        assert_eq!(whales[0].strength, WhaleStrength::Strong);
        assert!(whales[0].pct_from_mid < 0.0);

        let moderate = compute_book_metrics(
            "Binance",
            "BTC",
            vec![PriceLevel::new(100.0, 6_000.0)],
            vec![PriceLevel::new(101.0, 1.0)],
        )
        .unwrap();
        let whales = detect_whales(&moderate, BookSide::Bid, 500_000.0, 20);
        assert_eq!(whales[0].notional_value, 600_000.0);
        assert_eq!(whales[0].strength, WhaleStrength::Moderate);
    }

    #[test]
    fn test_whales_only_in_scanned_levels_and_capped() {
        let bids: Vec<PriceLevel> = (0..30)
            .map(|i| PriceLevel::new(100.0 - i as f64 * 0.01, 10_000.0 + i as f64))
            .collect();
        let snapshot = Arc::new(
            compute_book_metrics("A", "BTC", bids, vec![PriceLevel::new(100.5, 1.0)]).unwrap(),
        );

        assert_eq!(detect_whales(&snapshot, BookSide::Bid, 500_000.0, 20).len(), 20);

        let fused = fuse_books("BTC", &[snapshot], &config(&[("A", 1.0)])).unwrap();
        assert_eq!(fused.whale_bids.len(), 5);
        assert!(fused
            .whale_bids
            .windows(2)
            .all(|w| w[0].notional_value >= w[1].notional_value));
        assert!(fused.whale_asks.is_empty());
    }

    #[test]
    fn test_imbalance_labels_and_liquidity_steps() {
        assert_eq!(imbalance_label(1.6), MarketBias::StrongBullish);
        assert_eq!(imbalance_label(1.3), MarketBias::Bullish);
        assert_eq!(imbalance_label(1.0), MarketBias::Neutral);
        assert_eq!(imbalance_label(0.8), MarketBias::Bearish);
        assert_eq!(imbalance_label(0.5), MarketBias::StrongBearish);

        assert_eq!(liquidity_score(100_000_000.0), 100.0);
        assert_eq!(liquidity_score(60_000_000.0), 80.0);
        assert_eq!(liquidity_score(20_000_000.0), 60.0);
        assert_eq!(liquidity_score(5_000_000.0), 40.0);
        assert_eq!(liquidity_score(4_999_999.0), 20.0);
    }

    #[test]
    fn test_empty_input_is_none() {
        assert!(fuse_books("BTC", &[], &AggregatorConfig::default()).is_none());
    }
}
