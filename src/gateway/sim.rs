//! In-memory broker and approval stand-ins for engine tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::{mpsc, watch};

use super::{
    ApprovalService, ApprovalVerdict, BracketOrderIds, BracketOrderRequest, BrokerGateway,
    CandleRequest,
};
use crate::analysis::zones::ZoneLists;
use crate::options::chain::ChainAnalysis;
use crate::options::strike::TradeSetup;
use crate::types::{Candle, OptionChain, OrderUpdate, Quote, TradeDirection};

/// Scripted broker. Returns canned data and counts every call so tests can
/// assert which collaborators a cycle actually touched.
#[derive(Default)]
pub struct SimBroker {
    pub candles: Mutex<Vec<Candle>>,
    pub expiries: Mutex<Vec<NaiveDate>>,
    pub chain: Mutex<Option<OptionChain>>,
    pub fail_orders: Mutex<bool>,

    pub candle_calls: AtomicUsize,
    pub chain_calls: AtomicUsize,
    pub order_calls: AtomicUsize,

    pub placed_orders: Mutex<Vec<BracketOrderRequest>>,
    next_order_id: AtomicUsize,
}

impl SimBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_candles(&self, candles: Vec<Candle>) {
        *self.candles.lock().unwrap() = candles;
    }

    pub fn set_expiries(&self, expiries: Vec<NaiveDate>) {
        *self.expiries.lock().unwrap() = expiries;
    }

    pub fn set_chain(&self, chain: OptionChain) {
        *self.chain.lock().unwrap() = Some(chain);
    }

    pub fn fail_orders(&self, fail: bool) {
        *self.fail_orders.lock().unwrap() = fail;
    }
}

#[async_trait]
impl BrokerGateway for SimBroker {
    async fn fetch_candles(&self, _request: &CandleRequest) -> Result<Vec<Candle>> {
        self.candle_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.candles.lock().unwrap().clone())
    }

    async fn expiry_dates(&self, _instrument_id: &str, _segment: &str) -> Result<Vec<NaiveDate>> {
        Ok(self.expiries.lock().unwrap().clone())
    }

    async fn fetch_option_chain(
        &self,
        _instrument_id: &str,
        _segment: &str,
        _expiry: NaiveDate,
    ) -> Result<OptionChain> {
        self.chain_calls.fetch_add(1, Ordering::SeqCst);
        self.chain
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow!("no chain scripted"))
    }

    async fn resolve_option_instrument(
        &self,
        underlying_symbol: &str,
        expiry: NaiveDate,
        strike: f64,
        direction: TradeDirection,
    ) -> Result<String> {
        Ok(format!("{underlying_symbol}-{expiry}-{strike}-{direction}"))
    }

    async fn place_bracket_order(&self, order: &BracketOrderRequest) -> Result<BracketOrderIds> {
        self.order_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_orders.lock().unwrap() {
            return Err(anyhow!("scripted order failure"));
        }
        self.placed_orders.lock().unwrap().push(order.clone());
        let id = self.next_order_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(BracketOrderIds {
            order_id: format!("SIM-{id}"),
            order_status: "PENDING".to_string(),
        })
    }

    async fn run_quote_feed(
        &self,
        _instruments: Vec<(String, String)>,
        _tx: mpsc::Sender<Quote>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        loop {
            shutdown.changed().await?;
            if *shutdown.borrow() {
                return Ok(());
            }
        }
    }

    async fn run_order_update_feed(
        &self,
        _tx: mpsc::Sender<OrderUpdate>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        loop {
            shutdown.changed().await?;
            if *shutdown.borrow() {
                return Ok(());
            }
        }
    }
}

/// Approval stub with a fixed verdict, optionally scripted to fail.
pub struct StaticApproval {
    pub verdict: ApprovalVerdict,
    pub fail: bool,
    pub calls: AtomicUsize,
}

impl StaticApproval {
    pub fn approving(probability: f64) -> Self {
        Self {
            verdict: ApprovalVerdict {
                approved: true,
                probability_estimate: probability,
                reasoning: "scripted approval".to_string(),
            },
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn rejecting() -> Self {
        Self {
            verdict: ApprovalVerdict::rejected("scripted rejection"),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            verdict: ApprovalVerdict::rejected("unused"),
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ApprovalService for StaticApproval {
    async fn evaluate_setup(
        &self,
        _setup: &TradeSetup,
        _zones: &ZoneLists,
        _chain_analysis: Option<&ChainAnalysis>,
    ) -> Result<ApprovalVerdict> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(anyhow!("scripted approval failure"));
        }
        Ok(self.verdict.clone())
    }

    async fn analyze_zones(&self, _zones: &ZoneLists) -> Result<serde_json::Value> {
        if self.fail {
            return Err(anyhow!("scripted approval failure"));
        }
        Ok(serde_json::json!({"opinion": "scripted"}))
    }
}
