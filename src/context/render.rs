//! Deterministic text rendering of a context for LLM prompts
//!
//! Output depends only on the context's public fields.

use std::fmt::Write;

use super::{MicrostructureContext, WhaleWall};

/// Whole-dollar amount with thousands separators, e.g. `$67,250`
fn dollars(value: f64) -> String {
    let rounded = value.round();
    let digits = format!("{:.0}", rounded.abs());
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if rounded < 0.0 {
        format!("-${}", grouped)
    } else {
        format!("${}", grouped)
    }
}

fn whale_line(out: &mut String, wall: &WhaleWall) {
    let _ = writeln!(
        out,
        "    • {} ({:+.1}%): ${:.1}M [{}] {}",
        dollars(wall.price),
        wall.pct_from_mid,
        wall.notional_value / 1e6,
        wall.source_name,
        wall.strength
    );
}

/// Render `ctx` as a `<market_microstructure>` block
pub fn to_prompt_context(ctx: &MicrostructureContext) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "<market_microstructure symbol=\"{}\" status=\"{}\">",
        ctx.symbol, ctx.status
    );

    if let Some(book) = &ctx.aggregated_book {
        out.push_str("<order_book>\n");
        let _ = writeln!(
            out,
            "  Sources: {} ({:.0}% coverage)",
            book.sources_included.join(", "),
            book.coverage_pct
        );
        let _ = writeln!(out, "  Mid: {} | Spread: {:.3}%", dollars(book.mid_price), book.spread_pct);
        let _ = writeln!(
            out,
            "  Est. Depth: Bid ${:.1}M | Ask ${:.1}M",
            book.total_bid_depth / 1e6,
            book.total_ask_depth / 1e6
        );
        let _ = writeln!(out, "  Imbalance: {:.2} ({})", book.imbalance, book.imbalance_label);
        let _ = writeln!(out, "  Liquidity Score: {:.0}/100", book.liquidity_score);

        if !book.whale_bids.is_empty() {
            out.push_str("  Whale Bids (Support):\n");
            for wall in book.whale_bids.iter().take(3) {
                whale_line(&mut out, wall);
            }
        }
        if !book.whale_asks.is_empty() {
            out.push_str("  Whale Asks (Resistance):\n");
            for wall in book.whale_asks.iter().take(3) {
                whale_line(&mut out, wall);
            }
        }
        out.push_str("</order_book>\n");
    }

    if let Some(liq) = &ctx.liquidations {
        out.push_str("<liquidations>\n");
        let _ = writeln!(
            out,
            "  24h Total: ${:.1}M (Long: {:.0}%, Short: {:.0}%)",
            liq.total_24h_usd / 1e6,
            liq.long_ratio * 100.0,
            (1.0 - liq.long_ratio) * 100.0
        );
        let _ = writeln!(out, "  Cascade Risk: {}", liq.cascade_risk.as_str().to_uppercase());
        if !liq.cascade_risk_reason.is_empty() {
            let _ = writeln!(out, "  Reason: {}", liq.cascade_risk_reason);
        }
        out.push_str("</liquidations>\n");
    }

    if let Some(funding) = &ctx.funding {
        out.push_str("<funding>\n");
        let _ = writeln!(
            out,
            "  Rate: {:.4}% ({})",
            funding.average_rate,
            funding.sentiment.as_str()
        );
        if funding.extreme {
            out.push_str("  ⚠️ EXTREME FUNDING - potential reversal signal\n");
        }
        out.push_str("</funding>\n");
    }

    if let Some(oi) = &ctx.open_interest {
        out.push_str("<open_interest>\n");
        let _ = writeln!(out, "  Total: ${:.2}B", oi.total_oi_usd / 1e9);
        out.push_str("</open_interest>\n");
    }

    if let Some(ls) = &ctx.long_short_ratio {
        out.push_str("<long_short_ratio>\n");
        let _ = writeln!(
            out,
            "  Long Ratio: {:.0}% ({})",
            ls.average_long_ratio * 100.0,
            ls.sentiment.as_str()
        );
        out.push_str("</long_short_ratio>\n");
    }

    out.push_str("<microstructure_summary>\n");
    let _ = writeln!(
        out,
        "  BIAS: {} (confidence: {:.0}%)",
        ctx.bias.as_str().to_uppercase(),
        ctx.bias_confidence * 100.0
    );
    let _ = writeln!(out, "  Reasons: {}", ctx.bias_reasons.join("; "));

    if !ctx.support_levels.is_empty() {
        let levels: Vec<String> = ctx.support_levels.iter().take(3).map(|p| dollars(*p)).collect();
        let _ = writeln!(out, "  Key Supports: {}", levels.join(", "));
    }
    if !ctx.resistance_levels.is_empty() {
        let levels: Vec<String> = ctx
            .resistance_levels
            .iter()
            .take(3)
            .map(|p| dollars(*p))
            .collect();
        let _ = writeln!(out, "  Key Resistances: {}", levels.join(", "));
    }

    if let (Some(sl), Some(tp)) = (ctx.suggested_sl_long, ctx.suggested_tp_long) {
        let _ = writeln!(out, "  Suggested LONG: SL {} | TP {}", dollars(sl), dollars(tp));
    }
    if let (Some(sl), Some(tp)) = (ctx.suggested_sl_short, ctx.suggested_tp_short) {
        let _ = writeln!(out, "  Suggested SHORT: SL {} | TP {}", dollars(sl), dollars(tp));
    }

    for rec in &ctx.recommendations {
        let _ = writeln!(out, "  → {}", rec);
    }
    for warning in &ctx.warnings {
        let _ = writeln!(out, "  ⚠️ {}", warning);
    }

    out.push_str("</microstructure_summary>\n");
    out.push_str("</market_microstructure>");
    out
}
