//! Execution dispatch and trade-record reconciliation.
//!
//! Paper mode synthesizes a record without touching the broker. Live mode
//! resolves the contract, places a bracket order, and records the returned
//! ids. The order-update feed later reconciles status changes into the same
//! records; the list sits behind one mutex because the update path and the
//! trade cycle run concurrently.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::gateway::{ApprovalVerdict, BracketOrderRequest, BrokerGateway};
use crate::options::strike::TradeSetup;
use crate::types::{OrderUpdate, TradeDirection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    /// Simulated fill, sandbox mode.
    Paper,
    /// Live bracket order accepted by the broker.
    Active,
    /// Terminal: filled/completed, realized P&L recorded.
    Closed,
}

/// One dispatched trade, live or paper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: Uuid,
    pub placed_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub status: TradeStatus,

    pub direction: TradeDirection,
    pub strike: f64,
    pub expiry: NaiveDate,
    pub quantity: i64,
    pub security_id: Option<String>,
    pub order_id: Option<String>,

    pub entry_premium: f64,
    pub target_premium: f64,
    pub stop_premium: f64,

    pub probability_estimate: f64,
    pub approval_reasoning: String,

    pub exit_premium: Option<f64>,
    pub realized_pnl: Option<f64>,
}

impl TradeRecord {
    fn from_setup(
        setup: &TradeSetup,
        verdict: &ApprovalVerdict,
        expiry: NaiveDate,
        quantity: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            placed_at: now,
            last_update: now,
            status: TradeStatus::Paper,
            direction: setup.direction,
            strike: setup.strike,
            expiry,
            quantity,
            security_id: None,
            order_id: None,
            entry_premium: setup.entry_premium,
            target_premium: setup.target_premium,
            stop_premium: setup.stop_premium,
            probability_estimate: verdict.probability_estimate,
            approval_reasoning: verdict.reasoning.clone(),
            exit_premium: None,
            realized_pnl: None,
        }
    }
}

/// Shared active-trade list. One mutex covers both the trade cycle's appends
/// and the reconciliation path's updates.
#[derive(Clone, Default)]
pub struct ActiveTrades(Arc<Mutex<Vec<TradeRecord>>>);

impl ActiveTrades {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, record: TradeRecord) {
        self.0.lock().await.push(record);
    }

    pub async fn snapshot(&self) -> Vec<TradeRecord> {
        self.0.lock().await.clone()
    }

    pub async fn open_count(&self) -> usize {
        self.0
            .lock()
            .await
            .iter()
            .filter(|t| t.status != TradeStatus::Closed)
            .count()
    }

    /// Reconcile one order-update event. Returns the updated record when a
    /// matching active trade was found.
    pub async fn apply_update(&self, update: &OrderUpdate) -> Option<TradeRecord> {
        let mut trades = self.0.lock().await;
        let trade = trades
            .iter_mut()
            .find(|t| t.order_id.as_deref() == Some(update.order_id.as_str()))?;

        trade.last_update = Utc::now();
        if update.is_terminal() {
            trade.status = TradeStatus::Closed;
            let exit = update.fill_price().unwrap_or(trade.entry_premium);
            trade.exit_premium = Some(exit);
            trade.realized_pnl = Some((exit - trade.entry_premium) * trade.quantity as f64);
            info!(
                order_id = %update.order_id,
                pnl = trade.realized_pnl,
                "trade closed"
            );
        }
        Some(trade.clone())
    }
}

/// Dispatch an approved setup. Sandbox short-circuits to a paper record with
/// no network call; live placement that fails returns the error without
/// leaving a record behind.
pub async fn dispatch_trade(
    gateway: &Arc<dyn BrokerGateway>,
    setup: &TradeSetup,
    verdict: &ApprovalVerdict,
    config: &EngineConfig,
    expiry: NaiveDate,
    now: DateTime<Utc>,
) -> Result<TradeRecord> {
    let mut record = TradeRecord::from_setup(setup, verdict, expiry, config.order_quantity, now);

    if config.sandbox {
        info!(
            direction = %setup.direction,
            strike = setup.strike,
            entry = setup.entry_premium,
            "paper trade recorded"
        );
        return Ok(record);
    }

    let security_id = gateway
        .resolve_option_instrument(&config.underlying_symbol, expiry, setup.strike, setup.direction)
        .await
        .context("option contract lookup failed")?;

    let order = BracketOrderRequest {
        security_id: security_id.clone(),
        exchange_segment: config.option_segment.clone(),
        quantity: config.order_quantity,
        entry_price: setup.entry_premium,
        target_price: setup.target_premium,
        stop_price: setup.stop_premium,
        correlation_id: record.id.to_string(),
    };

    let ids = match gateway.place_bracket_order(&order).await {
        Ok(ids) => ids,
        Err(e) => {
            warn!(error = %e, "bracket order failed");
            return Err(e);
        }
    };

    record.status = TradeStatus::Active;
    record.security_id = Some(security_id);
    record.order_id = Some(ids.order_id);
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::sim::SimBroker;
    use crate::options::strike::SelectionMethod;

    fn setup() -> TradeSetup {
        TradeSetup {
            direction: TradeDirection::Call,
            strike: 22100.0,
            selection_method: SelectionMethod::TargetZoneQuality,
            entry_premium: 120.0,
            target_premium: 190.9,
            stop_premium: 117.6,
            underlying_entry: 21960.0,
            underlying_target: 22100.0,
            underlying_stop: 21955.2,
            risk_reward: 29.5,
            risk_amount: 2.4,
            reward_amount: 70.9,
            risk_pct: 2.0,
            reward_pct: 59.1,
            delta: 0.5,
            gamma: 0.001,
            vega: 8.0,
            theta_per_day: -2.0,
            theta_impact_pct: 0.77,
            quality_score: 65.0,
        }
    }

    fn verdict() -> ApprovalVerdict {
        ApprovalVerdict {
            approved: true,
            probability_estimate: 85.0,
            reasoning: "test".to_string(),
        }
    }

    fn expiry() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 6).unwrap()
    }

    #[tokio::test]
    async fn sandbox_dispatch_never_touches_the_broker() {
        let broker = Arc::new(SimBroker::new());
        let gateway: Arc<dyn BrokerGateway> = broker.clone();
        let config = EngineConfig::default();
        assert!(config.sandbox);

        let record = dispatch_trade(&gateway, &setup(), &verdict(), &config, expiry(), Utc::now())
            .await
            .unwrap();

        assert_eq!(record.status, TradeStatus::Paper);
        assert!(record.order_id.is_none());
        assert_eq!(broker.order_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn live_dispatch_places_bracket_order() {
        let broker = Arc::new(SimBroker::new());
        let gateway: Arc<dyn BrokerGateway> = broker.clone();
        let mut config = EngineConfig::default();
        config.sandbox = false;

        let record = dispatch_trade(&gateway, &setup(), &verdict(), &config, expiry(), Utc::now())
            .await
            .unwrap();

        assert_eq!(record.status, TradeStatus::Active);
        assert_eq!(record.order_id.as_deref(), Some("SIM-1"));

        let placed = broker.placed_orders.lock().unwrap();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].quantity, config.order_quantity);
        assert_eq!(placed[0].target_price, 190.9);
    }

    #[tokio::test]
    async fn failed_live_order_leaves_no_record_state() {
        let broker = Arc::new(SimBroker::new());
        broker.fail_orders(true);
        let gateway: Arc<dyn BrokerGateway> = broker.clone();
        let mut config = EngineConfig::default();
        config.sandbox = false;

        let result =
            dispatch_trade(&gateway, &setup(), &verdict(), &config, expiry(), Utc::now()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn reconciliation_closes_trade_and_computes_pnl() {
        let trades = ActiveTrades::new();
        let mut record = TradeRecord::from_setup(&setup(), &verdict(), expiry(), 50, Utc::now());
        record.status = TradeStatus::Active;
        record.order_id = Some("ORD-7".to_string());
        trades.push(record).await;

        let update = OrderUpdate {
            order_id: "ORD-7".to_string(),
            status: "TRADED".to_string(),
            raw: serde_json::json!({ "tradedPrice": 150.0 }),
        };
        let updated = trades.apply_update(&update).await.unwrap();

        assert_eq!(updated.status, TradeStatus::Closed);
        assert_eq!(updated.exit_premium, Some(150.0));
        // (150 - 120) * 50 contracts.
        assert_eq!(updated.realized_pnl, Some(1500.0));
        assert_eq!(trades.open_count().await, 0);
    }

    #[tokio::test]
    async fn unknown_order_id_is_ignored() {
        let trades = ActiveTrades::new();
        let update = OrderUpdate {
            order_id: "NOPE".to_string(),
            status: "TRADED".to_string(),
            raw: serde_json::Value::Null,
        };
        assert!(trades.apply_update(&update).await.is_none());
    }

    #[tokio::test]
    async fn non_terminal_update_keeps_trade_active() {
        let trades = ActiveTrades::new();
        let mut record = TradeRecord::from_setup(&setup(), &verdict(), expiry(), 50, Utc::now());
        record.status = TradeStatus::Active;
        record.order_id = Some("ORD-8".to_string());
        trades.push(record).await;

        let update = OrderUpdate {
            order_id: "ORD-8".to_string(),
            status: "PENDING".to_string(),
            raw: serde_json::Value::Null,
        };
        let updated = trades.apply_update(&update).await.unwrap();
        assert_eq!(updated.status, TradeStatus::Active);
        assert!(updated.realized_pnl.is_none());
    }
}
