//! Confluence scoring.
//!
//! Scores a price level by how many independent structural factors cluster
//! around it within a tolerance band. Every matching factor instance adds its
//! own contribution; the raw sum drives the rating, the reported score is
//! capped for display.

use crate::analysis::fvg::FairValueGap;
use crate::analysis::order_blocks::OrderBlock;
use crate::analysis::volume_profile::VolumeProfileResult;
use serde::{Deserialize, Serialize};

/// Raw score at or above which a level rates Strong.
const STRONG_THRESHOLD: f64 = 150.0;

/// Raw score at or above which a level rates Moderate.
const MODERATE_THRESHOLD: f64 = 100.0;

/// Ceiling on the displayed score.
const DISPLAY_CAP: f64 = 100.0;

/// Contribution of a point-of-control match.
const POC_SCORE: f64 = 50.0;

/// Contribution of a value-area boundary match.
const VA_BOUNDARY_SCORE: f64 = 30.0;

/// Cap on a single high-volume-node contribution.
const HVN_CAP: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfluenceRating {
    Strong,
    Moderate,
    Weak,
}

/// Confluence assessment of one price level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfluenceScore {
    pub level: f64,
    /// Uncapped factor sum; drives the rating.
    pub raw_score: f64,
    /// Raw score capped at 100 for display.
    pub score: f64,
    pub rating: ConfluenceRating,
    /// Human-readable factor tags, in contribution order.
    pub factors: Vec<String>,
}

/// Score `level` against every structural factor within `tolerance` price
/// units. Factors contribute independently; two order blocks at the same
/// level both count.
pub fn score_level(
    level: f64,
    tolerance: f64,
    blocks: &[OrderBlock],
    gaps: &[FairValueGap],
    profile: Option<&VolumeProfileResult>,
) -> ConfluenceScore {
    let near = |target: f64| (level - target).abs() <= tolerance;
    // Band factors match when the level falls within tolerance of the range.
    let near_band = |low: f64, high: f64| level >= low - tolerance && level <= high + tolerance;

    let mut raw_score = 0.0;
    let mut factors = Vec::new();

    for block in blocks {
        if near_band(block.zone_bottom, block.zone_top) {
            raw_score += block.strength;
            factors.push(format!("{:?} order block ({:.0})", block.block_type, block.strength));
        }
    }

    for gap in gaps {
        if near_band(gap.gap_bottom, gap.gap_top) {
            raw_score += gap.confidence;
            factors.push(format!("{:?} {:?} FVG ({:.0})", gap.gap_type, gap.classification, gap.confidence));
        }
    }

    if let Some(vp) = profile {
        for node in &vp.high_volume_nodes {
            if near(node.midpoint()) && vp.total_volume > 0.0 {
                let contribution = (node.total_volume / vp.total_volume * 1000.0).min(HVN_CAP);
                raw_score += contribution;
                factors.push(format!("HVN ({:.0})", contribution));
            }
        }
        if near(vp.poc) {
            raw_score += POC_SCORE;
            factors.push("POC".to_string());
        }
        if near(vp.vah) {
            raw_score += VA_BOUNDARY_SCORE;
            factors.push("VAH".to_string());
        }
        if near(vp.val) {
            raw_score += VA_BOUNDARY_SCORE;
            factors.push("VAL".to_string());
        }
    }

    let rating = if raw_score >= STRONG_THRESHOLD {
        ConfluenceRating::Strong
    } else if raw_score >= MODERATE_THRESHOLD {
        ConfluenceRating::Moderate
    } else {
        ConfluenceRating::Weak
    };

    ConfluenceScore {
        level,
        raw_score,
        score: raw_score.min(DISPLAY_CAP),
        rating,
        factors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::order_blocks::BlockType;
    use crate::types::Candle;
    use chrono::{TimeZone, Utc};

    fn block(mid: f64, strength: f64) -> OrderBlock {
        OrderBlock {
            block_type: BlockType::Demand,
            zone_top: mid + 5.0,
            zone_bottom: mid - 5.0,
            zone_mid: mid,
            timestamp: Utc.with_ymd_and_hms(2026, 1, 5, 9, 15, 0).unwrap(),
            strength,
            tested: false,
            respected: false,
            touch_count: 0,
            volume_ratio: 1.5,
            impulse_size: 2.0,
        }
    }

    fn profile_around(poc: f64) -> VolumeProfileResult {
        let candles: Vec<Candle> = (0..100)
            .map(|i| Candle {
                timestamp: Utc.with_ymd_and_hms(2026, 1, 5, 9, 15, 0).unwrap()
                    + chrono::Duration::minutes(15 * i),
                open: poc,
                high: poc + 1.0,
                low: poc - 1.0,
                close: poc + 0.5,
                volume: 1000.0,
            })
            .collect();
        crate::analysis::volume_profile::compute_volume_profile(&candles, 70.0).unwrap()
    }

    #[test]
    fn isolated_level_scores_zero_and_weak() {
        let score = score_level(22000.0, 50.0, &[], &[], None);
        assert_eq!(score.raw_score, 0.0);
        assert_eq!(score.rating, ConfluenceRating::Weak);
        assert!(score.factors.is_empty());
    }

    #[test]
    fn factors_outside_tolerance_do_not_count() {
        let blocks = vec![block(22100.0, 80.0)];
        let score = score_level(22000.0, 50.0, &blocks, &[], None);
        assert_eq!(score.raw_score, 0.0);
    }

    #[test]
    fn factor_instances_sum_independently() {
        let blocks = vec![block(22000.0, 80.0), block(22020.0, 75.0)];
        let score = score_level(22000.0, 50.0, &blocks, &[], None);
        assert_eq!(score.raw_score, 155.0);
        assert_eq!(score.rating, ConfluenceRating::Strong);
        assert_eq!(score.factors.len(), 2);
    }

    #[test]
    fn display_score_caps_at_100_but_rating_uses_raw() {
        let blocks = vec![block(22000.0, 80.0)];
        let vp = profile_around(22000.0);
        let score = score_level(22000.0, 50.0, &blocks, &[], Some(&vp));
        // Block 80 + POC 50 plus value-area boundaries near the POC.
        assert!(score.raw_score >= 130.0);
        assert!(score.score <= 100.0);
    }

    #[test]
    fn adding_a_factor_never_lowers_the_score() {
        let one = vec![block(22000.0, 80.0)];
        let two = vec![block(22000.0, 80.0), block(22010.0, 60.0)];
        let s1 = score_level(22000.0, 50.0, &one, &[], None);
        let s2 = score_level(22000.0, 50.0, &two, &[], None);
        assert!(s2.raw_score >= s1.raw_score);
    }

    #[test]
    fn scoring_is_idempotent() {
        let blocks = vec![block(22000.0, 80.0)];
        let a = score_level(22000.0, 50.0, &blocks, &[], None);
        let b = score_level(22000.0, 50.0, &blocks, &[], None);
        assert_eq!(a.raw_score, b.raw_score);
        assert_eq!(a.factors, b.factors);
    }

    #[test]
    fn rating_thresholds() {
        let moderate = vec![block(22000.0, 60.0), block(22010.0, 55.0)];
        let s = score_level(22000.0, 50.0, &moderate, &[], None);
        assert_eq!(s.rating, ConfluenceRating::Moderate);

        let weak = vec![block(22000.0, 60.0)];
        let s = score_level(22000.0, 50.0, &weak, &[], None);
        assert_eq!(s.rating, ConfluenceRating::Weak);
    }
}
