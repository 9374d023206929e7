//! Strike selection and premium projection.
//!
//! Converts a directional zone bet into a concrete option contract: picks the
//! underlying entry and target from the zone lists, filters the chain by
//! Greeks validity and theta decay, ranks candidate strikes by quality, and
//! projects entry/target/stop premiums. Returns `None` for any disqualified
//! setup; callers treat that as a normal negative outcome.

use crate::analysis::zones::{Zone, ZoneLists};
use crate::config::EngineConfig;
use crate::options::theta::{adjust_target_for_theta, quality_score, should_avoid, theta_impact};
use crate::types::{OptionChain, OptionQuote, TradeDirection};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionMethod {
    /// Best quality score among strikes near the underlying target.
    TargetZoneQuality,
    /// Strike nearest the underlying target (no usable quality scores).
    TargetZoneClosest,
    /// At-the-money strike (no candidate near the target at all).
    AtmFallback,
}

/// A fully projected trade candidate. Built once per trade cycle; immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSetup {
    pub direction: TradeDirection,
    pub strike: f64,
    pub selection_method: SelectionMethod,

    pub entry_premium: f64,
    pub target_premium: f64,
    pub stop_premium: f64,

    pub underlying_entry: f64,
    pub underlying_target: f64,
    pub underlying_stop: f64,

    pub risk_reward: f64,
    pub risk_amount: f64,
    pub reward_amount: f64,
    pub risk_pct: f64,
    pub reward_pct: f64,

    pub delta: f64,
    pub gamma: f64,
    pub vega: f64,
    pub theta_per_day: f64,
    pub theta_impact_pct: f64,
    pub quality_score: f64,
}

/// Pick the contract best matching a directional bet and project its premiums.
pub fn select_strike(
    zones: &ZoneLists,
    direction: TradeDirection,
    current_price: f64,
    chain: &OptionChain,
    config: &EngineConfig,
) -> Option<TradeSetup> {
    if chain.is_empty() || current_price <= 0.0 {
        return None;
    }

    let (favorable, opposing) = match direction {
        TradeDirection::Call => (&zones.demand, &zones.supply),
        TradeDirection::Put => (&zones.supply, &zones.demand),
    };

    let underlying_entry = nearest_zone(favorable)
        .map(|z| z.zone_mid)
        .unwrap_or(current_price);

    let sign = match direction {
        TradeDirection::Call => 1.0,
        TradeDirection::Put => -1.0,
    };

    let underlying_target = match nearest_zone(opposing) {
        Some(zone) => {
            let raw_distance = (zone.zone_mid - underlying_entry) * sign;
            if raw_distance > config.max_underlying_move {
                info!(
                    raw_target = zone.zone_mid,
                    cap = config.max_underlying_move,
                    "opposing zone beyond max move, capping target"
                );
                underlying_entry + sign * config.max_underlying_move
            } else if raw_distance > 0.0 {
                zone.zone_mid
            } else {
                // Opposing zone on the wrong side of entry; use the default.
                underlying_entry + sign * config.default_target_move
            }
        }
        None => underlying_entry + sign * config.default_target_move,
    };

    let all_quotes = chain.quotes(direction);
    let valid: Vec<OptionQuote> = all_quotes
        .iter()
        .filter(|q| q.has_valid_greeks)
        .cloned()
        .collect();
    let pool = if valid.is_empty() { all_quotes } else { valid };

    let surviving: Vec<OptionQuote> = pool
        .iter()
        .filter(|q| {
            !q.has_valid_greeks
                || !should_avoid(q, config.expected_hold_hours, config.max_theta_impact_pct)
        })
        .cloned()
        .collect();
    if surviving.is_empty() {
        debug!("every candidate contract fails the theta ceiling");
        return None;
    }

    let (quote, selection_method) =
        pick_contract(&surviving, underlying_target, chain.spot_price, config.strike_window)?;

    if quote.premium <= 0.0 {
        return None;
    }

    let underlying_move = (underlying_target - underlying_entry).abs();
    let raw_target_premium = quote.premium + underlying_move * quote.delta.abs();
    let target_premium = adjust_target_for_theta(raw_target_premium, &quote, config.expected_hold_hours);
    let stop_premium = quote.premium * (1.0 - config.stop_loss_pct / 100.0);

    let risk_amount = quote.premium - stop_premium;
    let reward_amount = target_premium - quote.premium;
    if risk_amount <= 0.0 || reward_amount <= 0.0 {
        return None;
    }
    let risk_reward = reward_amount / risk_amount;
    let risk_pct = risk_amount / quote.premium * 100.0;

    if risk_reward < config.min_risk_reward {
        debug!(risk_reward, min = config.min_risk_reward, "setup rejected on risk:reward");
        return None;
    }
    if risk_pct > config.max_risk_pct {
        debug!(risk_pct, max = config.max_risk_pct, "setup rejected on risk size");
        return None;
    }

    // Underlying distance equivalent to the premium stop, via delta.
    let underlying_stop = if quote.delta.abs() > 0.0 {
        underlying_entry - sign * risk_amount / quote.delta.abs()
    } else {
        underlying_entry - sign * config.default_target_move
    };

    let impact = theta_impact(&quote, config.expected_hold_hours);

    Some(TradeSetup {
        direction,
        strike: quote.strike,
        selection_method,
        entry_premium: quote.premium,
        target_premium,
        stop_premium,
        underlying_entry,
        underlying_target,
        underlying_stop,
        risk_reward,
        risk_amount,
        reward_amount,
        risk_pct,
        reward_pct: reward_amount / quote.premium * 100.0,
        delta: quote.delta,
        gamma: quote.gamma,
        vega: quote.vega,
        theta_per_day: quote.theta_per_day,
        theta_impact_pct: impact.impact_pct,
        quality_score: quality_score(&quote),
    })
}

/// Zone nearest the current price by its recorded distance.
fn nearest_zone(zones: &[Zone]) -> Option<&Zone> {
    zones.iter().min_by(|a, b| {
        a.distance_from_price
            .partial_cmp(&b.distance_from_price)
            .unwrap_or(std::cmp::Ordering::Equal)
    })
}

/// Choose a contract near the underlying target, ranked by quality; fall back
/// to the closest strike, then to at-the-money.
fn pick_contract(
    pool: &[OptionQuote],
    underlying_target: f64,
    spot: f64,
    strike_window: f64,
) -> Option<(OptionQuote, SelectionMethod)> {
    let in_window: Vec<&OptionQuote> = pool
        .iter()
        .filter(|q| (q.strike - underlying_target).abs() <= strike_window)
        .collect();

    if !in_window.is_empty() {
        let scored: Vec<&OptionQuote> =
            in_window.iter().copied().filter(|q| q.has_valid_greeks).collect();
        if !scored.is_empty() {
            // Ties break toward the strike closer to the target.
            let best = scored.iter().copied().max_by(|a, b| {
                quality_score(a)
                    .partial_cmp(&quality_score(b))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| {
                        (b.strike - underlying_target)
                            .abs()
                            .partial_cmp(&(a.strike - underlying_target).abs())
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
            })?;
            return Some((best.clone(), SelectionMethod::TargetZoneQuality));
        }
        let closest = in_window.iter().copied().min_by(|a, b| {
            (a.strike - underlying_target)
                .abs()
                .partial_cmp(&(b.strike - underlying_target).abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
        return Some((closest.clone(), SelectionMethod::TargetZoneClosest));
    }

    let atm = pool.iter().min_by(|a, b| {
        (a.strike - spot)
            .abs()
            .partial_cmp(&(b.strike - spot).abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    })?;
    Some((atm.clone(), SelectionMethod::AtmFallback))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::confluence::ConfluenceRating;
    use crate::analysis::zones::ZoneType;
    use crate::types::ChainEntry;
    use chrono::{TimeZone, Utc};

    fn zone(zone_type: ZoneType, mid: f64, current_price: f64, confidence: f64) -> Zone {
        let edge = match zone_type {
            ZoneType::Demand => mid + 10.0,
            ZoneType::Supply => mid - 10.0,
        };
        Zone {
            zone_type,
            zone_top: mid + 10.0,
            zone_bottom: mid - 10.0,
            zone_mid: mid,
            confidence,
            distance_from_price: (current_price - edge).abs() / current_price * 100.0,
            confluence_count: 2,
            factors: vec!["Demand order block (85)".to_string()],
            rating: ConfluenceRating::Moderate,
            ob_strength: 85.0,
            tested: true,
            respected: true,
            timestamp: Utc.with_ymd_and_hms(2026, 1, 5, 9, 15, 0).unwrap(),
        }
    }

    fn entry(strike: f64, premium: f64, delta: f64, theta: f64) -> ChainEntry {
        ChainEntry {
            strike,
            call: OptionQuote::new(strike, premium, delta, 0.001, 8.0, theta),
            put: OptionQuote::new(strike, premium, -delta, 0.001, 8.0, theta),
            call_oi: 100.0,
            put_oi: 100.0,
        }
    }

    fn wide_chain(spot: f64) -> OptionChain {
        OptionChain {
            spot_price: spot,
            entries: (-4..=4)
                .map(|i| entry(spot + i as f64 * 50.0, 120.0, 0.5, -2.0))
                .collect(),
        }
    }

    fn config() -> EngineConfig {
        EngineConfig::default()
    }

    #[test]
    fn call_setup_targets_opposing_supply_zone() {
        let zones = ZoneLists {
            demand: vec![zone(ZoneType::Demand, 21960.0, 22000.0, 85.0)],
            supply: vec![zone(ZoneType::Supply, 22100.0, 22000.0, 80.0)],
        };
        let chain = wide_chain(22000.0);
        let setup = select_strike(&zones, TradeDirection::Call, 22000.0, &chain, &config()).unwrap();

        assert_eq!(setup.direction, TradeDirection::Call);
        assert_eq!(setup.underlying_entry, 21960.0);
        assert_eq!(setup.underlying_target, 22100.0);
        assert_eq!(setup.selection_method, SelectionMethod::TargetZoneQuality);
        // Move 140 * delta 0.5 = 70, plus ~0.92 theta adjustment over 3h.
        assert!(setup.target_premium > 190.0 && setup.target_premium < 192.0);
        // Stop is 2% of a 120 premium.
        assert!((setup.stop_premium - 117.6).abs() < 1e-9);
        assert!(setup.risk_reward >= 2.0);
        assert!(setup.underlying_stop < setup.underlying_entry);
    }

    #[test]
    fn distant_target_is_capped_at_max_move() {
        let zones = ZoneLists {
            demand: vec![zone(ZoneType::Demand, 21960.0, 22000.0, 85.0)],
            supply: vec![zone(ZoneType::Supply, 22400.0, 22000.0, 80.0)],
        };
        let chain = wide_chain(22000.0);
        let setup = select_strike(&zones, TradeDirection::Call, 22000.0, &chain, &config()).unwrap();
        assert_eq!(setup.underlying_target, 21960.0 + 150.0);
    }

    #[test]
    fn no_opposing_zone_uses_default_target() {
        let zones = ZoneLists {
            demand: vec![zone(ZoneType::Demand, 21960.0, 22000.0, 85.0)],
            supply: vec![],
        };
        let chain = wide_chain(22000.0);
        let setup = select_strike(&zones, TradeDirection::Call, 22000.0, &chain, &config()).unwrap();
        assert_eq!(setup.underlying_target, 21960.0 + 80.0);
    }

    #[test]
    fn put_direction_mirrors_sides() {
        let zones = ZoneLists {
            demand: vec![zone(ZoneType::Demand, 21900.0, 22000.0, 85.0)],
            supply: vec![zone(ZoneType::Supply, 22040.0, 22000.0, 88.0)],
        };
        let chain = wide_chain(22000.0);
        let setup = select_strike(&zones, TradeDirection::Put, 22000.0, &chain, &config()).unwrap();
        assert_eq!(setup.underlying_entry, 22040.0);
        assert_eq!(setup.underlying_target, 21900.0);
        assert!(setup.underlying_stop > setup.underlying_entry);
    }

    #[test]
    fn theta_heavy_chain_yields_no_setup() {
        let zones = ZoneLists {
            demand: vec![zone(ZoneType::Demand, 21960.0, 22000.0, 85.0)],
            supply: vec![zone(ZoneType::Supply, 22100.0, 22000.0, 80.0)],
        };
        // Premium 20 with theta -10/day decays ~23% over the hold.
        let chain = OptionChain {
            spot_price: 22000.0,
            entries: (-2..=2)
                .map(|i| entry(22000.0 + i as f64 * 50.0, 20.0, 0.5, -10.0))
                .collect(),
        };
        assert!(select_strike(&zones, TradeDirection::Call, 22000.0, &chain, &config()).is_none());
    }

    #[test]
    fn poor_risk_reward_is_rejected() {
        let zones = ZoneLists {
            demand: vec![zone(ZoneType::Demand, 21990.0, 22000.0, 85.0)],
            // Tiny move: reward cannot clear 2x the premium stop.
            supply: vec![zone(ZoneType::Supply, 21994.0, 22000.0, 80.0)],
        };
        // Low-decay contract so the theta filter passes but reward stays thin.
        let chain = OptionChain {
            spot_price: 22000.0,
            entries: vec![entry(22000.0, 120.0, 0.1, -0.5)],
        };
        assert!(select_strike(&zones, TradeDirection::Call, 22000.0, &chain, &config()).is_none());
    }

    #[test]
    fn atm_fallback_when_no_strike_near_target() {
        let zones = ZoneLists {
            demand: vec![zone(ZoneType::Demand, 21960.0, 22000.0, 85.0)],
            supply: vec![],
        };
        // Only far-from-target strikes exist.
        let chain = OptionChain {
            spot_price: 22000.0,
            entries: vec![entry(21500.0, 120.0, 0.5, -2.0), entry(22600.0, 120.0, 0.5, -2.0)],
        };
        let setup = select_strike(&zones, TradeDirection::Call, 22000.0, &chain, &config()).unwrap();
        assert_eq!(setup.selection_method, SelectionMethod::AtmFallback);
        assert_eq!(setup.strike, 21500.0);
    }

    #[test]
    fn empty_chain_yields_no_setup() {
        let zones = ZoneLists::default();
        let chain = OptionChain {
            spot_price: 22000.0,
            entries: vec![],
        };
        assert!(select_strike(&zones, TradeDirection::Call, 22000.0, &chain, &config()).is_none());
    }
}
