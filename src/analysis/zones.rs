//! Zone assembly and market context.
//!
//! Turns ranked order blocks into demand/supply zone lists by scoring
//! confluence at each block's midpoint. Zones are the only structure the
//! strike selector and the decision cycle's proximity check ever see.

use crate::analysis::confluence::{score_level, ConfluenceRating};
use crate::analysis::fvg::FairValueGap;
use crate::analysis::order_blocks::{BlockType, OrderBlock};
use crate::analysis::volume_profile::VolumeProfileResult;
use crate::types::Candle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Short moving-average window for the trend read.
const TREND_FAST: usize = 20;

/// Long moving-average window for the trend read.
const TREND_SLOW: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZoneType {
    Demand,
    Supply,
}

/// A tradeable supply or demand zone with its confluence assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub zone_type: ZoneType,
    pub zone_top: f64,
    pub zone_bottom: f64,
    pub zone_mid: f64,
    /// Confluence score at the midpoint, capped at 100.
    pub confidence: f64,
    /// Percent distance from the current price to the nearer zone edge.
    pub distance_from_price: f64,
    pub confluence_count: usize,
    pub factors: Vec<String>,
    pub rating: ConfluenceRating,
    pub ob_strength: f64,
    pub tested: bool,
    pub respected: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    Bullish,
    Bearish,
    Neutral,
}

/// Broad market read attached to each analysis snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketContext {
    pub trend: Trend,
    /// Std-dev of close-to-close returns over the window, in percent.
    pub volatility: f64,
    pub current_price: f64,
}

/// Demand and supply zone lists, each sorted descending by confidence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ZoneLists {
    pub demand: Vec<Zone>,
    pub supply: Vec<Zone>,
}

/// Assemble zones from order blocks. Demand blocks must sit fully below the
/// current price, supply blocks fully above; blocks straddling price are not
/// actionable and are skipped.
pub fn build_zones(
    blocks: &[OrderBlock],
    gaps: &[FairValueGap],
    profile: Option<&VolumeProfileResult>,
    current_price: f64,
    tolerance: f64,
) -> ZoneLists {
    let mut lists = ZoneLists::default();
    if current_price <= 0.0 {
        return lists;
    }

    for block in blocks {
        let (zone_type, distance) = match block.block_type {
            BlockType::Demand if block.zone_top < current_price => {
                (ZoneType::Demand, current_price - block.zone_top)
            }
            BlockType::Supply if block.zone_bottom > current_price => {
                (ZoneType::Supply, block.zone_bottom - current_price)
            }
            _ => continue,
        };

        let confluence = score_level(block.zone_mid, tolerance, blocks, gaps, profile);
        let zone = Zone {
            zone_type,
            zone_top: block.zone_top,
            zone_bottom: block.zone_bottom,
            zone_mid: block.zone_mid,
            confidence: confluence.score,
            distance_from_price: distance / current_price * 100.0,
            confluence_count: confluence.factors.len(),
            factors: confluence.factors,
            rating: confluence.rating,
            ob_strength: block.strength,
            tested: block.tested,
            respected: block.respected,
            timestamp: block.timestamp,
        };

        match zone_type {
            ZoneType::Demand => lists.demand.push(zone),
            ZoneType::Supply => lists.supply.push(zone),
        }
    }

    let by_confidence = |a: &Zone, b: &Zone| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    };
    lists.demand.sort_by(by_confidence);
    lists.supply.sort_by(by_confidence);

    debug!(
        demand = lists.demand.len(),
        supply = lists.supply.len(),
        "zones assembled"
    );
    lists
}

/// Derive trend and volatility from the candle window used by the zone cycle.
pub fn market_context(candles: &[Candle], current_price: f64) -> MarketContext {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

    let trend = if closes.len() >= TREND_SLOW {
        let fast = sma(&closes[closes.len() - TREND_FAST..]);
        let slow = sma(&closes[closes.len() - TREND_SLOW..]);
        if fast > slow {
            Trend::Bullish
        } else if fast < slow {
            Trend::Bearish
        } else {
            Trend::Neutral
        }
    } else {
        Trend::Neutral
    };

    MarketContext {
        trend,
        volatility: returns_stddev(&closes),
        current_price,
    }
}

fn sma(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Std-dev of percent close-to-close returns.
fn returns_stddev(closes: &[f64]) -> f64 {
    if closes.len() < 2 {
        return 0.0;
    }
    let returns: Vec<f64> = closes
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| (w[1] - w[0]) / w[0] * 100.0)
        .collect();
    if returns.is_empty() {
        return 0.0;
    }
    let mean = sma(&returns);
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
    variance.sqrt()
}
