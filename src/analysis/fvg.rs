//! Fair value gap detection.
//!
//! A three-candle imbalance: bullish when the third candle's low clears the
//! first candle's high, bearish when the third candle's high stays below the
//! first candle's low. Gaps are classified by size, tracked for subsequent
//! fills, and dropped once price has closed them completely. Only open or
//! partially-filled gaps are actionable.

use crate::types::Candle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Candles scanned after the gap for fill tracking.
const FILL_SCAN: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GapType {
    Bullish,
    Bearish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GapClass {
    Large,
    Medium,
    Small,
}

/// An unfilled or partially-filled three-candle imbalance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FairValueGap {
    pub gap_type: GapType,
    pub timestamp: DateTime<Utc>,
    pub gap_top: f64,
    pub gap_bottom: f64,
    pub gap_mid: f64,
    pub gap_size: f64,
    /// Gap size as a percent of the reference price.
    pub gap_pct: f64,
    pub classification: GapClass,
    /// 90 for large, 75 for medium, 60 for small gaps.
    pub confidence: f64,
    /// How much of the gap later price action has re-traded, 0–100.
    pub filled_pct: f64,
    pub fully_filled: bool,
}

fn classify(gap_pct: f64) -> (GapClass, f64) {
    if gap_pct >= 1.0 {
        (GapClass::Large, 90.0)
    } else if gap_pct >= 0.5 {
        (GapClass::Medium, 75.0)
    } else {
        (GapClass::Small, 60.0)
    }
}

/// Scan a candle window for fair value gaps at least `min_gap_pct` wide.
///
/// Fully-filled gaps are excluded from the result, not flagged.
pub fn detect_fair_value_gaps(candles: &[Candle], min_gap_pct: f64) -> Vec<FairValueGap> {
    if candles.len() < 3 {
        return Vec::new();
    }

    let mut gaps = Vec::new();

    for i in 1..candles.len() - 1 {
        let first = &candles[i - 1];
        let third = &candles[i + 1];

        if third.low > first.high && first.high > 0.0 {
            let gap_size = third.low - first.high;
            let gap_pct = gap_size / first.high * 100.0;
            if gap_pct < min_gap_pct {
                continue;
            }
            if let Some(gap) = build_gap(
                GapType::Bullish,
                candles[i].timestamp,
                third.low,
                first.high,
                gap_pct,
                &candles[i + 2..],
            ) {
                gaps.push(gap);
            }
        } else if third.high < first.low && first.low > 0.0 {
            let gap_size = first.low - third.high;
            let gap_pct = gap_size / first.low * 100.0;
            if gap_pct < min_gap_pct {
                continue;
            }
            if let Some(gap) = build_gap(
                GapType::Bearish,
                candles[i].timestamp,
                first.low,
                third.high,
                gap_pct,
                &candles[i + 2..],
            ) {
                gaps.push(gap);
            }
        }
    }

    debug!(count = gaps.len(), "open fair value gaps detected");
    gaps
}

/// Assemble a gap with fill tracking; returns `None` once fully filled.
fn build_gap(
    gap_type: GapType,
    timestamp: DateTime<Utc>,
    gap_top: f64,
    gap_bottom: f64,
    gap_pct: f64,
    later: &[Candle],
) -> Option<FairValueGap> {
    let gap_size = gap_top - gap_bottom;
    let (filled_pct, fully_filled) = track_fill(gap_type, gap_top, gap_bottom, later);
    if fully_filled {
        return None;
    }

    let (classification, confidence) = classify(gap_pct);
    Some(FairValueGap {
        gap_type,
        timestamp,
        gap_top,
        gap_bottom,
        gap_mid: (gap_top + gap_bottom) / 2.0,
        gap_size,
        gap_pct,
        classification,
        confidence,
        filled_pct,
        fully_filled,
    })
}

/// Measure how far later price action re-traded into the gap.
fn track_fill(gap_type: GapType, gap_top: f64, gap_bottom: f64, later: &[Candle]) -> (f64, bool) {
    let gap_size = gap_top - gap_bottom;
    if gap_size <= 0.0 {
        return (100.0, true);
    }

    let mut deepest = 0.0f64;
    for candle in later.iter().take(FILL_SCAN) {
        let depth = match gap_type {
            // A bullish gap fills from above: lows trading back down into it.
            GapType::Bullish => {
                if candle.low < gap_top {
                    gap_top - candle.low
                } else {
                    0.0
                }
            }
            // A bearish gap fills from below: highs trading back up into it.
            GapType::Bearish => {
                if candle.high > gap_bottom {
                    candle.high - gap_bottom
                } else {
                    0.0
                }
            }
        };
        deepest = deepest.max(depth);
        if deepest >= gap_size {
            return (100.0, true);
        }
    }

    ((deepest / gap_size * 100.0).min(100.0), false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn candle(i: i64, open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            timestamp: Utc.with_ymd_and_hms(2026, 1, 5, 9, 15, 0).unwrap()
                + chrono::Duration::minutes(15 * i),
            open,
            high,
            low,
            close,
            volume: 1000.0,
        }
    }

    #[test]
    fn large_bullish_gap_untouched() {
        // Candle 3's low exceeds candle 1's high by 1.2%.
        let c1 = candle(0, 22000.0, 22000.0, 21950.0, 21990.0);
        let c2 = candle(1, 22000.0, 22150.0, 22000.0, 22140.0);
        let c3 = candle(2, 22264.0, 22300.0, 22264.0, 22290.0);

        let gaps = detect_fair_value_gaps(&[c1, c2, c3], 0.3);
        assert_eq!(gaps.len(), 1);
        let gap = &gaps[0];
        assert_eq!(gap.gap_type, GapType::Bullish);
        assert_eq!(gap.classification, GapClass::Large);
        assert_eq!(gap.confidence, 90.0);
        assert_eq!(gap.filled_pct, 0.0);
        assert!(!gap.fully_filled);
        assert!(gap.gap_top > gap.gap_bottom);
        assert!(gap.gap_pct >= 1.0);
    }

    #[test]
    fn fully_filled_gap_is_dropped() {
        let c1 = candle(0, 22000.0, 22000.0, 21950.0, 21990.0);
        let c2 = candle(1, 22000.0, 22150.0, 22000.0, 22140.0);
        let c3 = candle(2, 22264.0, 22300.0, 22264.0, 22290.0);
        // Later candle trades all the way back below the gap bottom.
        let c4 = candle(3, 22290.0, 22290.0, 21990.0, 22010.0);

        let gaps = detect_fair_value_gaps(&[c1, c2, c3, c4], 0.3);
        assert!(gaps.is_empty());
    }

    #[test]
    fn partial_fill_is_measured() {
        let c1 = candle(0, 22000.0, 22000.0, 21950.0, 21990.0);
        let c2 = candle(1, 22000.0, 22150.0, 22000.0, 22140.0);
        let c3 = candle(2, 22264.0, 22300.0, 22264.0, 22290.0);
        // Gap is [22000, 22264]; dip to 22132 is a 50% fill.
        let c4 = candle(3, 22290.0, 22290.0, 22132.0, 22180.0);

        let gaps = detect_fair_value_gaps(&[c1, c2, c3, c4], 0.3);
        assert_eq!(gaps.len(), 1);
        assert!((gaps[0].filled_pct - 50.0).abs() < 0.1, "filled={}", gaps[0].filled_pct);
        assert!(!gaps[0].fully_filled);
    }

    #[test]
    fn bearish_gap_detected_symmetrically() {
        let c1 = candle(0, 22300.0, 22320.0, 22264.0, 22280.0);
        let c2 = candle(1, 22260.0, 22260.0, 22100.0, 22110.0);
        let c3 = candle(2, 22000.0, 22000.0, 21950.0, 21960.0);

        let gaps = detect_fair_value_gaps(&[c1, c2, c3], 0.3);
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].gap_type, GapType::Bearish);
        assert_eq!(gaps[0].gap_top, 22264.0);
        assert_eq!(gaps[0].gap_bottom, 22000.0);
    }

    #[test]
    fn gaps_below_minimum_size_are_ignored() {
        let c1 = candle(0, 22000.0, 22000.0, 21950.0, 21990.0);
        let c2 = candle(1, 22000.0, 22030.0, 22000.0, 22020.0);
        let c3 = candle(2, 22020.0, 22050.0, 22010.0, 22040.0); // 10 pt gap ≈ 0.045%

        assert!(detect_fair_value_gaps(&[c1, c2, c3], 0.3).is_empty());
    }

    #[test]
    fn too_few_candles() {
        let c1 = candle(0, 22000.0, 22010.0, 21990.0, 22000.0);
        assert!(detect_fair_value_gaps(&[c1], 0.3).is_empty());
    }
}
