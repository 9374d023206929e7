//! Runtime configuration for the decision engine.
//!
//! Every tunable lives on one flat struct. Cycles take a fresh snapshot from
//! the shared [`ConfigHandle`] on each invocation, so external layers can
//! adjust parameters while the engine is running.

use anyhow::{bail, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Explicit historical window used instead of the rolling live window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BacktestRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

/// Configuration for the analysis and trade-decision engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Underlying instrument id (e.g. "13" for the Nifty 50 index).
    pub instrument_id: String,

    /// Exchange segment of the underlying (e.g. "IDX_I").
    pub exchange_segment: String,

    /// Exchange segment for option orders (e.g. "NSE_FNO").
    pub option_segment: String,

    /// Underlying symbol as it appears in the instrument master (e.g. "NIFTY").
    pub underlying_symbol: String,

    /// Units per trade (lot multiple).
    pub order_quantity: i64,

    /// Candle timeframe for the zone cycle, in minutes.
    pub zone_timeframe_mins: u32,

    /// Rolling history window for the live zone cycle, in days.
    pub zone_window_days: i64,

    /// Trade-cycle cadence, in minutes.
    pub trade_cycle_mins: u32,

    /// Snapshot age beyond which a trade cycle forces a zone refresh, seconds.
    pub snapshot_max_age_secs: i64,

    /// Value-area percentage for the volume profile.
    pub value_area_pct: f64,

    /// Order-block detector lookback (candles of prior context required).
    pub ob_lookback: usize,

    /// Minimum fair-value-gap size as a percent of the reference price.
    pub fvg_min_gap_pct: f64,

    /// Price tolerance band for confluence scoring, in underlying units.
    pub confluence_tolerance: f64,

    /// Minimum zone confidence for the proximity check.
    pub min_zone_confidence: f64,

    /// Maximum distance from a zone edge, percent of price.
    pub max_zone_distance_pct: f64,

    /// Minimum probability estimate from the approval service.
    pub min_probability: f64,

    /// Minimum acceptable risk:reward for a setup.
    pub min_risk_reward: f64,

    /// Maximum risk as a percent of entry premium.
    pub max_risk_pct: f64,

    /// Premium stop-loss, percent of entry premium.
    pub stop_loss_pct: f64,

    /// Cap on the projected intraday underlying move, in underlying units.
    pub max_underlying_move: f64,

    /// Default underlying target distance when no opposing zone exists.
    pub default_target_move: f64,

    /// Maximum acceptable theta impact over the hold, percent of premium.
    pub max_theta_impact_pct: f64,

    /// Expected hold duration, hours.
    pub expected_hold_hours: f64,

    /// Half-width of the strike window around the underlying target.
    pub strike_window: f64,

    /// Paper-trade instead of placing live orders.
    pub sandbox: bool,

    /// Historical date range; when set, market-hours gating is bypassed.
    pub backtest: Option<BacktestRange>,

    /// Skip trade cycles on the weekly expiry weekday.
    pub skip_expiry_day: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            instrument_id: "13".to_string(),
            exchange_segment: "IDX_I".to_string(),
            option_segment: "NSE_FNO".to_string(),
            underlying_symbol: "NIFTY".to_string(),
            order_quantity: 50,
            zone_timeframe_mins: 15,
            zone_window_days: 30,
            trade_cycle_mins: 3,
            snapshot_max_age_secs: 900,
            value_area_pct: 70.0,
            ob_lookback: 20,
            fvg_min_gap_pct: 0.3,
            confluence_tolerance: 50.0,
            min_zone_confidence: 80.0,
            max_zone_distance_pct: 0.5,
            min_probability: 80.0,
            min_risk_reward: 2.0,
            max_risk_pct: 10.0,
            stop_loss_pct: 2.0,
            max_underlying_move: 150.0,
            default_target_move: 80.0,
            max_theta_impact_pct: 5.0,
            expected_hold_hours: 3.0,
            strike_window: 100.0,
            sandbox: true,
            backtest: None,
            skip_expiry_day: true,
        }
    }
}

/// Shared, mutable access to the engine configuration.
///
/// The engine never caches a config at construction; each cycle calls
/// [`ConfigHandle::snapshot`] and works off that copy.
#[derive(Clone)]
pub struct ConfigHandle(Arc<RwLock<EngineConfig>>);

impl ConfigHandle {
    pub fn new(config: EngineConfig) -> Self {
        Self(Arc::new(RwLock::new(config)))
    }

    /// Copy of the current configuration.
    pub async fn snapshot(&self) -> EngineConfig {
        self.0.read().await.clone()
    }

    /// Apply a mutation; takes effect on the next cycle invocation.
    pub async fn update<F: FnOnce(&mut EngineConfig)>(&self, f: F) {
        let mut cfg = self.0.write().await;
        f(&mut cfg);
    }
}

/// External credentials required before the engine may enter RUNNING.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub broker_client_id: String,
    pub broker_access_token: String,
    pub approval_api_key: String,
}

impl Credentials {
    pub fn from_env() -> Self {
        Self {
            broker_client_id: std::env::var("BROKER_CLIENT_ID").unwrap_or_default(),
            broker_access_token: std::env::var("BROKER_ACCESS_TOKEN").unwrap_or_default(),
            approval_api_key: std::env::var("APPROVAL_API_KEY").unwrap_or_default(),
        }
    }

    /// Fatal to startup only: a missing credential refuses RUNNING.
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.broker_client_id.is_empty() {
            missing.push("BROKER_CLIENT_ID");
        }
        if self.broker_access_token.is_empty() {
            missing.push("BROKER_ACCESS_TOKEN");
        }
        if self.approval_api_key.is_empty() {
            missing.push("APPROVAL_API_KEY");
        }
        if !missing.is_empty() {
            bail!("missing required credentials: {}", missing.join(", "));
        }
        Ok(())
    }
}
