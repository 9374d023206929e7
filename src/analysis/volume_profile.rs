//! Volume profile construction.
//!
//! Builds a price→volume histogram over a candle window, then derives the
//! point of control, value area, and high/low volume nodes. Each candle's
//! volume is spread across every bin its [low, high] range overlaps, weighted
//! by the fractional overlap, so a wide candle never dumps its full volume
//! onto a single price.

use crate::types::Candle;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Target price width of one bin, in underlying units.
const TARGET_BIN_WIDTH: f64 = 10.0;

/// Minimum number of bins regardless of range.
const MIN_BINS: usize = 50;

/// High-volume node threshold: volume above this multiple of the bin average.
const HVN_RATIO: f64 = 1.5;

/// Low-volume node threshold: volume below this multiple of the bin average.
const LVN_RATIO: f64 = 0.5;

/// One half-open price interval of the histogram. Never mutated after the
/// profile is computed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeProfileBin {
    pub price_low: f64,
    pub price_high: f64,
    pub total_volume: f64,
    pub buy_volume: f64,
    pub sell_volume: f64,
    /// Buy minus sell volume.
    pub delta: f64,
    /// Number of candles that contributed to this bin.
    pub touch_count: u32,
}

impl VolumeProfileBin {
    pub fn midpoint(&self) -> f64 {
        (self.price_low + self.price_high) / 2.0
    }
}

/// Immutable result of one volume-profile computation. Recomputed wholesale
/// each zone cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeProfileResult {
    /// Price (bin midpoint) of the maximum-volume bin.
    pub poc: f64,
    pub poc_volume: f64,
    pub poc_delta: f64,
    /// Value-area bounds.
    pub vah: f64,
    pub val: f64,
    /// Bin midpoints comprising the value area, in accumulation order.
    pub value_area_levels: Vec<f64>,
    pub high_volume_nodes: Vec<VolumeProfileBin>,
    pub low_volume_nodes: Vec<VolumeProfileBin>,
    pub total_volume: f64,
    /// All bins, ordered by price ascending.
    pub bins: Vec<VolumeProfileBin>,
    pub sessions_analyzed: usize,
}

/// Build a volume profile over `candles` with the given value-area percent.
///
/// Returns `None` for degenerate input (empty window, zero price range, zero
/// total volume); that is the expected negative outcome, not an error.
pub fn compute_volume_profile(candles: &[Candle], value_area_pct: f64) -> Option<VolumeProfileResult> {
    if candles.is_empty() {
        return None;
    }

    let range_low = candles.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    let range_high = candles.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let price_range = range_high - range_low;
    if price_range <= 0.0 {
        return None;
    }

    let num_bins = ((price_range / TARGET_BIN_WIDTH).round() as usize).max(MIN_BINS);
    let bin_width = price_range / num_bins as f64;

    let mut bins: Vec<VolumeProfileBin> = (0..num_bins)
        .map(|i| VolumeProfileBin {
            price_low: range_low + i as f64 * bin_width,
            price_high: range_low + (i + 1) as f64 * bin_width,
            total_volume: 0.0,
            buy_volume: 0.0,
            sell_volume: 0.0,
            delta: 0.0,
            touch_count: 0,
        })
        .collect();

    for candle in candles {
        let is_buy = candle.close >= candle.open;
        let candle_range = candle.high - candle.low;

        if candle_range <= 0.0 {
            // Flat candle: all volume lands in the containing bin.
            let idx = bin_index(candle.close, range_low, bin_width, num_bins);
            accumulate(&mut bins[idx], candle.volume, is_buy);
            continue;
        }

        let first = bin_index(candle.low, range_low, bin_width, num_bins);
        let last = bin_index(candle.high, range_low, bin_width, num_bins);
        for bin_idx in first..=last {
            let bin = &bins[bin_idx];
            let overlap = overlap_len(candle.low, candle.high, bin.price_low, bin.price_high);
            if overlap <= 0.0 {
                continue;
            }
            let share = candle.volume * (overlap / candle_range);
            accumulate(&mut bins[bin_idx], share, is_buy);
        }
    }

    let total_volume: f64 = bins.iter().map(|b| b.total_volume).sum();
    if total_volume <= 0.0 {
        return None;
    }

    // POC: maximum-volume bin.
    let poc_bin = bins
        .iter()
        .max_by(|a, b| a.total_volume.partial_cmp(&b.total_volume).unwrap_or(std::cmp::Ordering::Equal))?
        .clone();

    // Value area: accumulate bins by descending volume until the target share.
    let mut by_volume: Vec<&VolumeProfileBin> = bins.iter().filter(|b| b.total_volume > 0.0).collect();
    by_volume.sort_by(|a, b| {
        b.total_volume
            .partial_cmp(&a.total_volume)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let target = total_volume * (value_area_pct / 100.0);
    let mut cumulative = 0.0;
    let mut value_area_levels = Vec::new();
    let mut vah = f64::MIN;
    let mut val = f64::MAX;
    for bin in &by_volume {
        cumulative += bin.total_volume;
        value_area_levels.push(bin.midpoint());
        vah = vah.max(bin.price_high);
        val = val.min(bin.price_low);
        if cumulative >= target {
            break;
        }
    }

    let occupied = bins.iter().filter(|b| b.total_volume > 0.0).count().max(1);
    let avg_volume = total_volume / occupied as f64;
    let high_volume_nodes: Vec<VolumeProfileBin> = bins
        .iter()
        .filter(|b| b.total_volume > avg_volume * HVN_RATIO)
        .cloned()
        .collect();
    let low_volume_nodes: Vec<VolumeProfileBin> = bins
        .iter()
        .filter(|b| b.total_volume > 0.0 && b.total_volume < avg_volume * LVN_RATIO)
        .cloned()
        .collect();

    debug!(
        poc = poc_bin.midpoint(),
        vah,
        val,
        hvns = high_volume_nodes.len(),
        lvns = low_volume_nodes.len(),
        "volume profile computed"
    );

    Some(VolumeProfileResult {
        poc: poc_bin.midpoint(),
        poc_volume: poc_bin.total_volume,
        poc_delta: poc_bin.delta,
        vah,
        val,
        value_area_levels,
        high_volume_nodes,
        low_volume_nodes,
        total_volume,
        bins,
        sessions_analyzed: candles.len(),
    })
}

fn accumulate(bin: &mut VolumeProfileBin, volume: f64, is_buy: bool) {
    bin.total_volume += volume;
    if is_buy {
        bin.buy_volume += volume;
    } else {
        bin.sell_volume += volume;
    }
    bin.delta = bin.buy_volume - bin.sell_volume;
    bin.touch_count += 1;
}

fn bin_index(price: f64, range_low: f64, bin_width: f64, num_bins: usize) -> usize {
    let idx = ((price - range_low) / bin_width).floor() as i64;
    idx.clamp(0, num_bins as i64 - 1) as usize
}

fn overlap_len(a_low: f64, a_high: f64, b_low: f64, b_high: f64) -> f64 {
    (a_high.min(b_high) - a_low.max(b_low)).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn candle(i: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Candle {
        Candle {
            timestamp: Utc.with_ymd_and_hms(2026, 1, 5, 9, 15, 0).unwrap()
                + chrono::Duration::minutes(15 * i),
            open,
            high,
            low,
            close,
            volume,
        }
    }

    #[test]
    fn empty_input_yields_no_profile() {
        assert!(compute_volume_profile(&[], 70.0).is_none());
    }

    #[test]
    fn zero_price_range_yields_no_profile() {
        let candles: Vec<Candle> = (0..10).map(|i| candle(i, 100.0, 100.0, 100.0, 100.0, 500.0)).collect();
        assert!(compute_volume_profile(&candles, 70.0).is_none());
    }

    #[test]
    fn zero_volume_yields_no_profile() {
        let candles: Vec<Candle> = (0..10)
            .map(|i| candle(i, 100.0, 110.0, 90.0, 105.0, 0.0))
            .collect();
        assert!(compute_volume_profile(&candles, 70.0).is_none());
    }

    #[test]
    fn flat_series_with_tiny_wiggle_puts_poc_at_repeated_price() {
        // 100 candles pinned at 22000 with uniform volume and one thin outlier
        // to give the histogram a nonzero range.
        let mut candles: Vec<Candle> = (0..100)
            .map(|i| candle(i, 22000.0, 22000.0, 22000.0, 22000.0, 1000.0))
            .collect();
        candles.push(candle(100, 22050.0, 22050.0, 22050.0, 22050.0, 1.0));

        let vp = compute_volume_profile(&candles, 70.0).unwrap();
        // POC bin must contain the repeated price.
        assert!((vp.poc - 22000.0).abs() < 1.0, "poc={}", vp.poc);
        assert!(vp.vah >= vp.val);
    }

    #[test]
    fn value_area_covers_target_share_of_volume() {
        let candles: Vec<Candle> = (0..60)
            .map(|i| {
                let base = 22000.0 + (i % 7) as f64 * 40.0;
                candle(i, base, base + 30.0, base - 30.0, base + 10.0, 800.0 + (i % 5) as f64 * 200.0)
            })
            .collect();

        let vp = compute_volume_profile(&candles, 70.0).unwrap();
        assert!(vp.vah >= vp.val);

        // Sum volume of bins whose midpoint is in the value-area list.
        let va_volume: f64 = vp
            .bins
            .iter()
            .filter(|b| vp.value_area_levels.iter().any(|m| (m - b.midpoint()).abs() < 1e-9))
            .map(|b| b.total_volume)
            .sum();
        assert!(va_volume >= vp.total_volume * 0.70 - 1e-6);
    }

    #[test]
    fn overlap_weighting_splits_wide_candle_volume() {
        // One candle spanning the full range, one narrow candle. The narrow
        // candle's bin must not receive the wide candle's entire volume.
        let candles = vec![
            candle(0, 22000.0, 23000.0, 22000.0, 22900.0, 1000.0),
            candle(1, 22500.0, 22510.0, 22490.0, 22505.0, 100.0),
        ];
        let vp = compute_volume_profile(&candles, 70.0).unwrap();
        let max_bin = vp
            .bins
            .iter()
            .map(|b| b.total_volume)
            .fold(f64::MIN, f64::max);
        assert!(max_bin < 1000.0);
    }

    #[test]
    fn buy_sell_split_follows_candle_direction() {
        let candles = vec![
            candle(0, 22000.0, 22100.0, 22000.0, 22100.0, 500.0), // up: buy
            candle(1, 22100.0, 22100.0, 22000.0, 22000.0, 300.0), // down: sell
        ];
        let vp = compute_volume_profile(&candles, 70.0).unwrap();
        let buy: f64 = vp.bins.iter().map(|b| b.buy_volume).sum();
        let sell: f64 = vp.bins.iter().map(|b| b.sell_volume).sum();
        assert!((buy - 500.0).abs() < 1e-6);
        assert!((sell - 300.0).abs() < 1e-6);
    }
}
