//! Option-chain analysis: put/call ratio, max pain, and open-interest walls.

use crate::types::OptionChain;
use serde::{Deserialize, Serialize};

/// Put/call ratio above which positioning reads bullish (contrarian).
const PCR_BULLISH: f64 = 1.3;

/// Put/call ratio below which positioning reads bearish.
const PCR_BEARISH: f64 = 0.7;

/// Open-interest walls reported per side.
const OI_WALLS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainSentiment {
    Bullish,
    Bearish,
    Neutral,
}

/// Derived view of one option chain, attached to the trade-cycle context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainAnalysis {
    pub put_call_ratio: f64,
    pub sentiment: ChainSentiment,
    /// Expiry price minimizing total option-writer payout.
    pub max_pain: f64,
    pub atm_strike: f64,
    /// Highest put-OI strikes below spot, descending by OI.
    pub oi_support: Vec<f64>,
    /// Highest call-OI strikes above spot, descending by OI.
    pub oi_resistance: Vec<f64>,
    pub total_call_oi: f64,
    pub total_put_oi: f64,
}

/// Analyze a chain. Returns `None` when the chain has no entries.
pub fn analyze_chain(chain: &OptionChain) -> Option<ChainAnalysis> {
    if chain.is_empty() {
        return None;
    }

    let total_call_oi: f64 = chain.entries.iter().map(|e| e.call_oi).sum();
    let total_put_oi: f64 = chain.entries.iter().map(|e| e.put_oi).sum();
    let put_call_ratio = if total_call_oi > 0.0 {
        total_put_oi / total_call_oi
    } else {
        0.0
    };

    let sentiment = if put_call_ratio > PCR_BULLISH {
        ChainSentiment::Bullish
    } else if put_call_ratio < PCR_BEARISH && put_call_ratio > 0.0 {
        ChainSentiment::Bearish
    } else {
        ChainSentiment::Neutral
    };

    let atm_strike = chain
        .entries
        .iter()
        .min_by(|a, b| {
            (a.strike - chain.spot_price)
                .abs()
                .partial_cmp(&(b.strike - chain.spot_price).abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|e| e.strike)?;

    Some(ChainAnalysis {
        put_call_ratio,
        sentiment,
        max_pain: max_pain(chain)?,
        atm_strike,
        oi_support: oi_walls(chain, false),
        oi_resistance: oi_walls(chain, true),
        total_call_oi,
        total_put_oi,
    })
}

/// Strike minimizing total writer payout at expiry.
///
/// With strikes sorted ascending, call pain at strike k needs only the OI and
/// OI-weighted-strike prefix sums below k, and put pain the suffix sums above
/// it, so the scan is linear after the sort.
fn max_pain(chain: &OptionChain) -> Option<f64> {
    let mut rows: Vec<(f64, f64, f64)> = chain
        .entries
        .iter()
        .map(|e| (e.strike, e.call_oi, e.put_oi))
        .collect();
    rows.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let n = rows.len();
    let mut call_oi_prefix = vec![0.0; n + 1];
    let mut call_weighted_prefix = vec![0.0; n + 1];
    let mut put_oi_suffix = vec![0.0; n + 1];
    let mut put_weighted_suffix = vec![0.0; n + 1];

    for i in 0..n {
        call_oi_prefix[i + 1] = call_oi_prefix[i] + rows[i].1;
        call_weighted_prefix[i + 1] = call_weighted_prefix[i] + rows[i].1 * rows[i].0;
    }
    for i in (0..n).rev() {
        put_oi_suffix[i] = put_oi_suffix[i + 1] + rows[i].2;
        put_weighted_suffix[i] = put_weighted_suffix[i + 1] + rows[i].2 * rows[i].0;
    }

    let mut best: Option<(f64, f64)> = None;
    for (k, row) in rows.iter().enumerate() {
        let settle = row.0;
        // Calls struck below the settle are in the money for holders.
        let call_pain = settle * call_oi_prefix[k] - call_weighted_prefix[k];
        // Puts struck above the settle likewise.
        let put_pain = put_weighted_suffix[k + 1] - settle * put_oi_suffix[k + 1];
        let pain = call_pain + put_pain;
        match best {
            Some((best_pain, _)) if pain >= best_pain => {}
            _ => best = Some((pain, settle)),
        }
    }
    best.map(|(_, strike)| strike)
}

/// Top OI strikes on one side of spot: call walls above (resistance), put
/// walls below (support).
fn oi_walls(chain: &OptionChain, resistance: bool) -> Vec<f64> {
    let mut candidates: Vec<(f64, f64)> = chain
        .entries
        .iter()
        .filter_map(|e| {
            if resistance && e.strike > chain.spot_price {
                Some((e.strike, e.call_oi))
            } else if !resistance && e.strike < chain.spot_price {
                Some((e.strike, e.put_oi))
            } else {
                None
            }
        })
        .filter(|(_, oi)| *oi > 0.0)
        .collect();
    candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    candidates.into_iter().take(OI_WALLS).map(|(s, _)| s).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChainEntry, OptionQuote};

    fn entry(strike: f64, call_oi: f64, put_oi: f64) -> ChainEntry {
        ChainEntry {
            strike,
            call: OptionQuote::new(strike, 100.0, 0.5, 0.001, 8.0, -8.0),
            put: OptionQuote::new(strike, 100.0, -0.5, 0.001, 8.0, -8.0),
            call_oi,
            put_oi,
        }
    }

    fn chain(spot: f64, entries: Vec<ChainEntry>) -> OptionChain {
        OptionChain {
            spot_price: spot,
            entries,
        }
    }

    #[test]
    fn empty_chain_yields_no_analysis() {
        assert!(analyze_chain(&chain(22000.0, vec![])).is_none());
    }

    #[test]
    fn pcr_and_sentiment() {
        let bullish = chain(
            22000.0,
            vec![entry(21900.0, 100.0, 200.0), entry(22100.0, 100.0, 80.0)],
        );
        let analysis = analyze_chain(&bullish).unwrap();
        assert!((analysis.put_call_ratio - 1.4).abs() < 1e-9);
        assert_eq!(analysis.sentiment, ChainSentiment::Bullish);

        let bearish = chain(
            22000.0,
            vec![entry(21900.0, 300.0, 100.0), entry(22100.0, 200.0, 80.0)],
        );
        assert_eq!(analyze_chain(&bearish).unwrap().sentiment, ChainSentiment::Bearish);
    }

    #[test]
    fn max_pain_balances_both_sides() {
        // Heavy put OI low and call OI high pins max pain in the middle.
        let c = chain(
            22000.0,
            vec![
                entry(21800.0, 10.0, 500.0),
                entry(22000.0, 50.0, 50.0),
                entry(22200.0, 500.0, 10.0),
            ],
        );
        let analysis = analyze_chain(&c).unwrap();
        assert_eq!(analysis.max_pain, 22000.0);
    }

    #[test]
    fn atm_strike_is_nearest_spot() {
        let c = chain(
            22037.0,
            vec![entry(21950.0, 1.0, 1.0), entry(22050.0, 1.0, 1.0), entry(22150.0, 1.0, 1.0)],
        );
        assert_eq!(analyze_chain(&c).unwrap().atm_strike, 22050.0);
    }

    #[test]
    fn oi_walls_split_by_spot_and_rank_by_oi() {
        let c = chain(
            22000.0,
            vec![
                entry(21800.0, 10.0, 900.0),
                entry(21900.0, 10.0, 400.0),
                entry(22100.0, 700.0, 10.0),
                entry(22200.0, 300.0, 10.0),
            ],
        );
        let analysis = analyze_chain(&c).unwrap();
        assert_eq!(analysis.oi_support, vec![21800.0, 21900.0]);
        assert_eq!(analysis.oi_resistance, vec![22100.0, 22200.0]);
    }
}
