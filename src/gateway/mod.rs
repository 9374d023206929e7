//! Broker and approval-service collaborators.
//!
//! The engine talks to the outside world through two traits: a broker
//! gateway (historical candles, option chains, order placement, live feeds)
//! and an approval service (probability estimates for candidate setups).
//! Production wires the Dhan HTTP/websocket client and the LLM-backed
//! approval client; tests wire the in-memory simulator.

pub mod approval;
pub mod dhan;
pub mod models;
pub mod sim;

use crate::analysis::zones::ZoneLists;
use crate::options::chain::ChainAnalysis;
use crate::options::strike::TradeSetup;
use crate::types::{Candle, OptionChain, OrderUpdate, Quote, TradeDirection};
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

/// Historical candle query, inclusive of both dates.
#[derive(Debug, Clone)]
pub struct CandleRequest {
    pub instrument_id: String,
    pub exchange_segment: String,
    pub interval_mins: u32,
    pub from: NaiveDate,
    pub to: NaiveDate,
}

/// Bracket order: entry plus broker-managed target and stop legs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BracketOrderRequest {
    pub security_id: String,
    pub exchange_segment: String,
    pub quantity: i64,
    pub entry_price: f64,
    pub target_price: f64,
    pub stop_price: f64,
    /// Client-side correlation id echoed back on the update feed.
    pub correlation_id: String,
}

/// Broker identifiers returned for a placed bracket order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BracketOrderIds {
    pub order_id: String,
    pub order_status: String,
}

/// Verdict from the external probability service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalVerdict {
    pub approved: bool,
    /// Probability estimate in [0, 100].
    pub probability_estimate: f64,
    pub reasoning: String,
}

impl ApprovalVerdict {
    /// The degraded verdict used when the service fails or returns garbage.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            probability_estimate: 0.0,
            reasoning: reason.into(),
        }
    }
}

/// Market-data and execution collaborator.
///
/// Feed methods run a single connection until disconnect, error, or shutdown;
/// the feed supervisor owns the reconnect loop.
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    async fn fetch_candles(&self, request: &CandleRequest) -> Result<Vec<Candle>>;

    /// Available expiry dates for an underlying, soonest first.
    async fn expiry_dates(&self, instrument_id: &str, segment: &str) -> Result<Vec<NaiveDate>>;

    async fn fetch_option_chain(
        &self,
        instrument_id: &str,
        segment: &str,
        expiry: NaiveDate,
    ) -> Result<OptionChain>;

    /// Security id of one option contract, looked up from the broker's
    /// instrument master.
    async fn resolve_option_instrument(
        &self,
        underlying_symbol: &str,
        expiry: NaiveDate,
        strike: f64,
        direction: TradeDirection,
    ) -> Result<String>;

    async fn place_bracket_order(&self, order: &BracketOrderRequest) -> Result<BracketOrderIds>;

    async fn run_quote_feed(
        &self,
        instruments: Vec<(String, String)>,
        tx: mpsc::Sender<Quote>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<()>;

    async fn run_order_update_feed(
        &self,
        tx: mpsc::Sender<OrderUpdate>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<()>;
}

/// External probability/approval collaborator. Callers map any `Err` to a
/// rejected verdict; the service must never be able to crash a cycle.
#[async_trait]
pub trait ApprovalService: Send + Sync {
    async fn evaluate_setup(
        &self,
        setup: &TradeSetup,
        zones: &ZoneLists,
        chain_analysis: Option<&ChainAnalysis>,
    ) -> Result<ApprovalVerdict>;

    /// Optional free-form opinion on a fresh zone analysis, stored with the
    /// snapshot for audit.
    async fn analyze_zones(&self, zones: &ZoneLists) -> Result<serde_json::Value>;
}
