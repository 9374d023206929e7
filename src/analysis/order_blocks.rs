//! Order block detection.
//!
//! An order block is a candle preceding a confirmed impulsive move: a down
//! candle followed by a strong up impulse marks demand, an up candle followed
//! by a strong down impulse marks supply. Impulse and volume confirmation
//! jointly gate false positives from noise candles; a respect bonus rewards
//! zones price has already bounced from.

use crate::types::Candle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Impulse confirmation: next candle's body must exceed this multiple of the
/// candidate candle's range.
const IMPULSE_MULT: f64 = 1.5;

/// Volume confirmation: next candle's volume must exceed this multiple of the
/// candidate candle's volume.
const VOLUME_MULT: f64 = 1.2;

/// Candles scanned after confirmation for tests and respect.
const RESPECT_SCAN: usize = 10;

/// Minimum strength for a block to survive.
const MIN_STRENGTH: f64 = 50.0;

/// Maximum blocks kept, ranked by strength.
const MAX_BLOCKS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockType {
    /// Down candle before an up impulse; expected to attract buyers.
    Demand,
    /// Up candle before a down impulse; expected to attract sellers.
    Supply,
}

/// A detected order block. Immutable once produced by a detector pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBlock {
    pub block_type: BlockType,
    pub zone_top: f64,
    pub zone_bottom: f64,
    pub zone_mid: f64,
    pub timestamp: DateTime<Utc>,
    /// Composite score in [50, 100]: impulse (≤50) + volume (≤30) + respect (≤20).
    pub strength: f64,
    /// Price re-entered the zone after formation.
    pub tested: bool,
    /// Price closed back outside the zone after a test.
    pub respected: bool,
    pub touch_count: u32,
    /// Confirmation candle volume / candidate candle volume.
    pub volume_ratio: f64,
    /// Confirmation candle body / candidate candle range.
    pub impulse_size: f64,
}

/// Scan a candle window for order blocks.
///
/// The first `lookback` candles are skipped so every candidate has prior
/// context. Blocks scoring below 50 are discarded; at most the top 10 by
/// strength are returned, strongest first.
pub fn detect_order_blocks(candles: &[Candle], lookback: usize) -> Vec<OrderBlock> {
    if candles.len() < lookback + 2 {
        return Vec::new();
    }

    let mut blocks = Vec::new();

    for i in lookback..candles.len() - 1 {
        let candidate = &candles[i];
        let next = &candles[i + 1];

        let candidate_range = candidate.range();
        if candidate_range <= 0.0 || candidate.volume <= 0.0 {
            continue;
        }

        let block_type = if candidate.is_bearish() && next.close > next.open {
            BlockType::Demand
        } else if candidate.is_bullish() && next.close < next.open {
            BlockType::Supply
        } else {
            continue;
        };

        let impulse_size = next.body() / candidate_range;
        let volume_ratio = next.volume / candidate.volume;
        if impulse_size <= IMPULSE_MULT || volume_ratio <= VOLUME_MULT {
            continue;
        }

        let zone_top = candidate.high;
        let zone_bottom = candidate.low;
        let (tested, respected, touch_count) =
            scan_respect(&candles[i + 2..], block_type, zone_top, zone_bottom);

        let impulse_component = (impulse_size / 2.0 * 50.0).min(50.0);
        let volume_component = (volume_ratio / 1.5 * 30.0).min(30.0);
        let respect_component = if respected {
            20.0
        } else if tested {
            10.0
        } else {
            0.0
        };
        let strength = impulse_component + volume_component + respect_component;
        if strength < MIN_STRENGTH {
            continue;
        }

        blocks.push(OrderBlock {
            block_type,
            zone_top,
            zone_bottom,
            zone_mid: (zone_top + zone_bottom) / 2.0,
            timestamp: candidate.timestamp,
            strength: strength.min(100.0),
            tested,
            respected,
            touch_count,
            volume_ratio,
            impulse_size,
        });
    }

    blocks.sort_by(|a, b| b.strength.partial_cmp(&a.strength).unwrap_or(std::cmp::Ordering::Equal));
    blocks.truncate(MAX_BLOCKS);

    debug!(count = blocks.len(), "order blocks detected");
    blocks
}

/// Scan up to `RESPECT_SCAN` candles after the impulse for zone tests and a
/// bounce (close back outside the zone in the favorable direction).
fn scan_respect(
    later: &[Candle],
    block_type: BlockType,
    zone_top: f64,
    zone_bottom: f64,
) -> (bool, bool, u32) {
    let mut tested = false;
    let mut respected = false;
    let mut touch_count = 0u32;

    for candle in later.iter().take(RESPECT_SCAN) {
        let touches = candle.low <= zone_top && candle.high >= zone_bottom;
        if touches {
            tested = true;
            touch_count += 1;
            let bounced = match block_type {
                BlockType::Demand => candle.close > zone_top,
                BlockType::Supply => candle.close < zone_bottom,
            };
            if bounced {
                respected = true;
            }
        }
    }

    (tested, respected, touch_count)
}
