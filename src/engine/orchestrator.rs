//! Decision orchestrator.
//!
//! Owns the engine state machine and the two cooperating cycles: the zone
//! cycle rebuilds the analysis snapshot from a fresh candle window, the trade
//! cycle turns a qualifying zone plus a live quote into a dispatched order.
//! Every collaborator call is fault-isolated: a failure aborts only the
//! current cycle invocation and the next scheduled cycle is the retry.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::analysis::fvg::detect_fair_value_gaps;
use crate::analysis::order_blocks::detect_order_blocks;
use crate::analysis::volume_profile::{compute_volume_profile, VolumeProfileResult};
use crate::analysis::zones::{build_zones, market_context, MarketContext, Zone, ZoneLists, ZoneType};
use crate::config::{ConfigHandle, Credentials, EngineConfig};
use crate::engine::execution::{dispatch_trade, ActiveTrades, TradeRecord};
use crate::engine::market_hours::{is_expiry_day, is_market_open, select_expiry, trading_date};
use crate::feeds::{spawn_order_update_feed, spawn_quote_feed, QuoteStore};
use crate::gateway::{ApprovalService, ApprovalVerdict, BrokerGateway, CandleRequest};
use crate::options::chain::analyze_chain;
use crate::options::strike::select_strike;
use crate::types::{EngineEvent, TradeDirection};

/// Ceiling on any single external call made from a cycle.
const EXTERNAL_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Injectable time source; cycles never call `Utc::now` directly.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Stopped,
    Starting,
    Running,
}

/// Result of one zone/trade cycle invocation. Skips are normal outcomes.
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    ZonesUpdated { demand: usize, supply: usize },
    TradeDispatched(TradeRecord),
    Skipped(String),
}

/// The single analysis cache. Replaced wholesale each zone cycle; trade
/// cycles read it through an `Arc` and never observe a partial update.
#[derive(Debug, Clone)]
pub struct AnalysisSnapshot {
    pub zones: ZoneLists,
    pub volume_profile: Option<VolumeProfileResult>,
    pub market_context: MarketContext,
    /// Free-form opinion from the approval service, kept for audit.
    pub zone_opinion: Option<serde_json::Value>,
    pub computed_at: DateTime<Utc>,
}

pub struct Engine {
    config: ConfigHandle,
    gateway: Arc<dyn BrokerGateway>,
    approval: Arc<dyn ApprovalService>,

    quotes: QuoteStore,
    trades: ActiveTrades,
    snapshot: Arc<RwLock<Option<Arc<AnalysisSnapshot>>>>,
    events: broadcast::Sender<EngineEvent>,

    state: Arc<RwLock<EngineState>>,
    shutdown: watch::Sender<bool>,
    feed_tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    clock: Clock,
}

impl Engine {
    pub fn new(
        config: ConfigHandle,
        gateway: Arc<dyn BrokerGateway>,
        approval: Arc<dyn ApprovalService>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let (events, _) = broadcast::channel(256);
        Self {
            config,
            gateway,
            approval,
            quotes: QuoteStore::new(),
            trades: ActiveTrades::new(),
            snapshot: Arc::new(RwLock::new(None)),
            events,
            state: Arc::new(RwLock::new(EngineState::Stopped)),
            shutdown,
            feed_tasks: tokio::sync::Mutex::new(Vec::new()),
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the time source (tests, backtests).
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub async fn state(&self) -> EngineState {
        *self.state.read().await
    }

    pub fn active_trades(&self) -> ActiveTrades {
        self.trades.clone()
    }

    pub fn quote_store(&self) -> QuoteStore {
        self.quotes.clone()
    }

    /// Validate credentials, bring up the live feeds and the reconciliation
    /// task, and transition to RUNNING.
    pub async fn start(&self, credentials: &Credentials) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != EngineState::Stopped {
                return Err(anyhow!("engine already started"));
            }
            *state = EngineState::Starting;
        }

        if let Err(e) = credentials.validate() {
            *self.state.write().await = EngineState::Stopped;
            return Err(e);
        }

        let config = self.config.snapshot().await;
        let instruments = vec![(config.exchange_segment.clone(), config.instrument_id.clone())];

        let mut tasks = self.feed_tasks.lock().await;
        tasks.push(spawn_quote_feed(
            self.gateway.clone(),
            instruments,
            self.quotes.clone(),
            self.events.clone(),
            self.shutdown.subscribe(),
        ));

        let (update_tx, mut update_rx) = mpsc::channel(256);
        tasks.push(spawn_order_update_feed(
            self.gateway.clone(),
            update_tx,
            self.events.clone(),
            self.shutdown.subscribe(),
        ));

        // Reconciliation: order-update events into the active-trade list.
        let trades = self.trades.clone();
        let events = self.events.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(update) = update_rx.recv().await {
                if let Some(record) = trades.apply_update(&update).await {
                    let _ = events.send(EngineEvent::TradeUpdated { record });
                } else {
                    debug!(order_id = %update.order_id, "order update for unknown trade");
                }
            }
        }));

        *self.state.write().await = EngineState::Running;
        let _ = self.events.send(EngineEvent::Started);
        info!("engine running");
        Ok(())
    }

    /// Signal shutdown and wait for the background tasks to drain. Feeds
    /// exit cooperatively between reconnect attempts.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let mut tasks = self.feed_tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }
        *self.state.write().await = EngineState::Stopped;
        let _ = self.events.send(EngineEvent::Stopped);
        info!("engine stopped");
    }

    /// Timer-driven scheduler: runs the zone cycle immediately, then both
    /// cycles on their configured cadences until shutdown.
    pub async fn run(&self) -> Result<()> {
        let config = self.config.snapshot().await;
        let mut zone_timer =
            tokio::time::interval(Duration::from_secs(config.zone_timeframe_mins as u64 * 60));
        let mut trade_timer =
            tokio::time::interval(Duration::from_secs(config.trade_cycle_mins as u64 * 60));
        let mut shutdown = self.shutdown.subscribe();

        loop {
            tokio::select! {
                _ = zone_timer.tick() => {
                    if let Err(e) = self.zone_cycle().await {
                        warn!(error = %e, "zone cycle failed");
                    }
                }
                _ = trade_timer.tick() => {
                    if let Err(e) = self.trade_cycle().await {
                        warn!(error = %e, "trade cycle failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Rebuild the analysis snapshot from a fresh candle window.
    pub async fn zone_cycle(&self) -> Result<CycleOutcome> {
        let config = self.config.snapshot().await;
        let now = (self.clock)();

        let (from, to) = match config.backtest {
            Some(range) => (range.from, range.to),
            None => {
                if !is_market_open(now) {
                    debug!("zone cycle outside market hours");
                    return Ok(self.skip("zone", "outside market hours"));
                }
                let today = trading_date(now);
                (today - ChronoDuration::days(config.zone_window_days), today)
            }
        };

        let request = CandleRequest {
            instrument_id: config.instrument_id.clone(),
            exchange_segment: config.exchange_segment.clone(),
            interval_mins: config.zone_timeframe_mins,
            from,
            to,
        };
        let candles = external(self.gateway.fetch_candles(&request))
            .await
            .context("candle fetch failed")?;
        if candles.is_empty() {
            return Ok(self.skip("zone", "no candles in window"));
        }

        let current_price = match self.quotes.latest(&config.instrument_id).await {
            Some(quote) => quote.last_price,
            None => candles[candles.len() - 1].close,
        };

        let profile = compute_volume_profile(&candles, config.value_area_pct);
        let blocks = detect_order_blocks(&candles, config.ob_lookback);
        let gaps = detect_fair_value_gaps(&candles, config.fvg_min_gap_pct);
        let zones = build_zones(
            &blocks,
            &gaps,
            profile.as_ref(),
            current_price,
            config.confluence_tolerance,
        );
        let context = market_context(&candles, current_price);

        // Best-effort; the snapshot is complete without it.
        let zone_opinion = match external(self.approval.analyze_zones(&zones)).await {
            Ok(opinion) => Some(opinion),
            Err(e) => {
                debug!(error = %e, "zone opinion unavailable");
                None
            }
        };

        let demand = zones.demand.len();
        let supply = zones.supply.len();
        let snapshot = Arc::new(AnalysisSnapshot {
            zones,
            volume_profile: profile,
            market_context: context,
            zone_opinion,
            computed_at: now,
        });
        *self.snapshot.write().await = Some(snapshot);

        info!(demand, supply, current_price, "analysis snapshot replaced");
        let _ = self.events.send(EngineEvent::ZonesUpdated {
            demand_zones: demand,
            supply_zones: supply,
            current_price,
        });
        Ok(CycleOutcome::ZonesUpdated { demand, supply })
    }

    /// Attempt one trade decision against the current snapshot.
    pub async fn trade_cycle(&self) -> Result<CycleOutcome> {
        let config = self.config.snapshot().await;
        let now = (self.clock)();

        if config.backtest.is_none() {
            if config.skip_expiry_day && is_expiry_day(now) {
                return Ok(self.skip("trade", "expiry day"));
            }
            if !is_market_open(now) {
                return Ok(self.skip("trade", "outside market hours"));
            }
        }

        let snapshot = match self.fresh_snapshot(&config, now).await? {
            Some(snapshot) => snapshot,
            None => return Ok(self.skip("trade", "no analysis snapshot")),
        };

        let current_price = match self.quotes.latest(&config.instrument_id).await {
            Some(quote) => quote.last_price,
            None if config.backtest.is_some() => snapshot.market_context.current_price,
            None => return Ok(self.skip("trade", "no live quote")),
        };

        let Some((zone, direction)) = pick_opportunity(&snapshot.zones, current_price, &config)
        else {
            return Ok(self.skip("trade", "no opportunity"));
        };
        debug!(
            %direction,
            zone_mid = zone.zone_mid,
            confidence = zone.confidence,
            "qualifying zone found"
        );

        let expiry = match external(
            self.gateway
                .expiry_dates(&config.instrument_id, &config.exchange_segment),
        )
        .await
        {
            Ok(dates) => select_expiry(&dates, now),
            Err(e) => {
                warn!(error = %e, "expiry list unavailable, using computed weekly expiry");
                crate::engine::market_hours::nearest_weekly_expiry(now)
            }
        };

        let chain = external(self.gateway.fetch_option_chain(
            &config.instrument_id,
            &config.exchange_segment,
            expiry,
        ))
        .await
        .context("option chain fetch failed")?;
        if chain.is_empty() {
            return Ok(self.skip("trade", "empty option chain"));
        }
        let chain_analysis = analyze_chain(&chain);

        let Some(setup) = select_strike(&snapshot.zones, direction, current_price, &chain, &config)
        else {
            return Ok(self.skip("trade", "no valid setup"));
        };

        let verdict = match external(self.approval.evaluate_setup(
            &setup,
            &snapshot.zones,
            chain_analysis.as_ref(),
        ))
        .await
        {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(error = %e, "approval service failed, treating as rejected");
                ApprovalVerdict::rejected(format!("approval unavailable: {e}"))
            }
        };

        if !verdict.approved || verdict.probability_estimate < config.min_probability {
            return Ok(self.skip(
                "trade",
                format!(
                    "rejected (approved={}, probability={:.0})",
                    verdict.approved, verdict.probability_estimate
                ),
            ));
        }

        let record =
            dispatch_trade(&self.gateway, &setup, &verdict, &config, expiry, now).await?;
        self.trades.push(record.clone()).await;
        info!(
            %direction,
            strike = setup.strike,
            status = ?record.status,
            "trade dispatched"
        );
        let _ = self.events.send(EngineEvent::TradeDispatched {
            record: record.clone(),
        });
        Ok(CycleOutcome::TradeDispatched(record))
    }

    /// Current snapshot, refreshed first when missing or stale.
    async fn fresh_snapshot(
        &self,
        config: &EngineConfig,
        now: DateTime<Utc>,
    ) -> Result<Option<Arc<AnalysisSnapshot>>> {
        let current = self.snapshot.read().await.clone();
        let stale = match &current {
            Some(snapshot) => {
                (now - snapshot.computed_at).num_seconds() > config.snapshot_max_age_secs
            }
            None => true,
        };
        if stale {
            debug!("snapshot missing or stale, refreshing");
            self.zone_cycle().await?;
        }
        Ok(self.snapshot.read().await.clone())
    }

    fn skip(&self, cycle: &str, reason: impl Into<String>) -> CycleOutcome {
        let reason = reason.into();
        let _ = self.events.send(EngineEvent::CycleSkipped {
            cycle: cycle.to_string(),
            reason: reason.clone(),
        });
        CycleOutcome::Skipped(reason)
    }
}

/// Bound an external call by the cycle timeout.
async fn external<T>(fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(EXTERNAL_CALL_TIMEOUT, fut)
        .await
        .map_err(|_| anyhow!("external call timed out"))?
}

/// Highest-confidence zone within striking distance of the current price.
/// Demand qualifies against its top edge, supply against its bottom edge.
fn pick_opportunity<'a>(
    zones: &'a ZoneLists,
    price: f64,
    config: &EngineConfig,
) -> Option<(&'a Zone, TradeDirection)> {
    let qualifies = |zone: &Zone| {
        if zone.confidence < config.min_zone_confidence {
            return false;
        }
        let edge = match zone.zone_type {
            ZoneType::Demand => zone.zone_top,
            ZoneType::Supply => zone.zone_bottom,
        };
        (price - edge).abs() / price * 100.0 <= config.max_zone_distance_pct
    };

    let best_demand = zones.demand.iter().find(|z| qualifies(z));
    let best_supply = zones.supply.iter().find(|z| qualifies(z));

    match (best_demand, best_supply) {
        (Some(d), Some(s)) => {
            if d.confidence >= s.confidence {
                Some((d, TradeDirection::Call))
            } else {
                Some((s, TradeDirection::Put))
            }
        }
        (Some(d), None) => Some((d, TradeDirection::Call)),
        (None, Some(s)) => Some((s, TradeDirection::Put)),
        (None, None) => None,
    }
}
