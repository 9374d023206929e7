//! Theta-decay projection for intraday option holds.
//!
//! Theta quotes decay per calendar day; intraday holds only eat the fraction
//! of the trading session actually held, so all projections scale by trading
//! hours rather than wall-clock hours.

use crate::types::OptionQuote;
use serde::{Deserialize, Serialize};

/// Trading hours in one session (09:15 to 15:45 equivalent session length).
pub const TRADING_HOURS_PER_DAY: f64 = 6.5;

/// Projected theta cost of holding one contract.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThetaImpact {
    /// Premium lost to decay per trading hour.
    pub decay_per_hour: f64,
    /// Premium lost over the expected hold.
    pub expected_decay: f64,
    /// Expected decay as a percent of the entry premium.
    pub impact_pct: f64,
}

/// Project theta decay for `quote` over `hold_hours` trading hours.
pub fn theta_impact(quote: &OptionQuote, hold_hours: f64) -> ThetaImpact {
    let decay_per_hour = quote.theta_per_day.abs() / TRADING_HOURS_PER_DAY;
    let expected_decay = decay_per_hour * hold_hours;
    let impact_pct = if quote.premium > 0.0 {
        expected_decay / quote.premium * 100.0
    } else {
        100.0
    };
    ThetaImpact {
        decay_per_hour,
        expected_decay,
        impact_pct,
    }
}

/// Whether the contract decays too fast to hold for `hold_hours`.
pub fn should_avoid(quote: &OptionQuote, hold_hours: f64, max_impact_pct: f64) -> bool {
    theta_impact(quote, hold_hours).impact_pct > max_impact_pct
}

/// Push a nominal target premium further out so the projected gain still
/// nets out after decay over the hold.
pub fn adjust_target_for_theta(target_premium: f64, quote: &OptionQuote, hold_hours: f64) -> f64 {
    target_premium + theta_impact(quote, hold_hours).expected_decay
}

/// Contract quality in [0, 100]: delta magnitude (≤50) plus a theta component
/// (≤50) that loses 5 points per percent of premium decayed daily.
pub fn quality_score(quote: &OptionQuote) -> f64 {
    let delta_component = 50.0 * quote.delta.abs().min(1.0);
    let theta_pct_of_premium = if quote.premium > 0.0 {
        quote.theta_per_day.abs() / quote.premium * 100.0
    } else {
        100.0
    };
    let theta_component = (50.0 - 5.0 * theta_pct_of_premium).max(0.0);
    delta_component + theta_component
}
