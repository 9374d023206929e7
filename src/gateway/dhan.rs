//! Dhan API Client
//!
//! HTTP client for the Dhan REST API plus the two live websocket feeds
//! (market ticks and order updates). Each feed method drives a single
//! connection; reconnect policy lives in the feed supervisor.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use futures::{SinkExt, StreamExt};
use reqwest::Client;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::models::*;
use super::{BracketOrderIds, BracketOrderRequest, BrokerGateway, CandleRequest};
use crate::types::{Candle, ChainEntry, OptionChain, OptionQuote, OrderUpdate, Quote, TradeDirection};
use async_trait::async_trait;

/// REST API base URL
pub const REST_BASE_URL: &str = "https://api.dhan.co/v2";

/// Live market feed URL
pub const MARKET_FEED_URL: &str = "wss://api-feed.dhan.co";

/// Order update feed URL
pub const ORDER_FEED_URL: &str = "wss://api-order-update.dhan.co";

/// Instrument master CSV (security id lookup for option contracts)
pub const SCRIP_MASTER_URL: &str = "https://images.dhan.co/api-data/api-scrip-master.csv";

/// Subscription request code for the ticker feed
const TICKER_REQUEST_CODE: u32 = 15;

/// One instrument-master row, limited to the columns the lookup needs.
#[derive(Debug, Clone, serde::Deserialize)]
struct MasterRow {
    #[serde(rename = "SEM_SMST_SECURITY_ID", default)]
    security_id: String,
    #[serde(rename = "SEM_INSTRUMENT_NAME", default)]
    instrument_name: String,
    #[serde(rename = "SEM_EXPIRY_DATE", default)]
    expiry_date: String,
    #[serde(rename = "SEM_STRIKE_PRICE", default)]
    strike_price: String,
    #[serde(rename = "SEM_OPTION_TYPE", default)]
    option_type: String,
    #[serde(rename = "SM_SYMBOL_NAME", default)]
    symbol_name: String,
}

/// Dhan API client with token-based authentication
pub struct DhanClient {
    client: Client,
    base_url: String,
    scrip_master_url: String,
    client_id: String,
    access_token: String,
    /// Option contract lookup: (symbol, expiry, strike-in-paise, side) -> id.
    option_ids: tokio::sync::RwLock<Option<std::collections::HashMap<(String, NaiveDate, i64, String), String>>>,
}

impl DhanClient {
    pub fn new(client_id: String, access_token: String) -> Result<Self> {
        Ok(Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .context("failed to build HTTP client")?,
            base_url: REST_BASE_URL.to_string(),
            scrip_master_url: SCRIP_MASTER_URL.to_string(),
            client_id,
            access_token,
            option_ids: tokio::sync::RwLock::new(None),
        })
    }

    /// Override the REST base URL (test servers).
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    /// Load and index the instrument master on first use.
    async fn ensure_master_loaded(&self) -> Result<()> {
        if self.option_ids.read().await.is_some() {
            return Ok(());
        }

        info!("downloading instrument master");
        let body = self
            .client
            .get(&self.scrip_master_url)
            .send()
            .await
            .context("instrument master request failed")?
            .text()
            .await
            .context("instrument master body read failed")?;

        let index = index_option_master(&body);
        info!(contracts = index.len(), "instrument master indexed");
        *self.option_ids.write().await = Some(index);
        Ok(())
    }

    async fn post_json<B: serde::Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("access-token", &self.access_token)
            .header("client-id", &self.client_id)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await
            .with_context(|| format!("request to {path} failed"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("{path} returned {status}: {body}"));
        }
        Ok(response)
    }
}

/// Column arrays to candles; rows with incomplete columns are skipped.
fn candles_from_columns(data: IntradayDataResponse) -> Vec<Candle> {
    let len = data
        .timestamp
        .len()
        .min(data.open.len())
        .min(data.high.len())
        .min(data.low.len())
        .min(data.close.len())
        .min(data.volume.len());

    (0..len)
        .filter_map(|i| {
            let timestamp = DateTime::<Utc>::from_timestamp(data.timestamp[i], 0)?;
            Some(Candle {
                timestamp,
                open: data.open[i],
                high: data.high[i],
                low: data.low[i],
                close: data.close[i],
                volume: data.volume[i],
            })
        })
        .collect()
}

/// Dhan chain payload to the engine's chain type. Strikes without a parseable
/// key are dropped; missing sides become zeroed quotes with invalid Greeks.
fn chain_from_response(response: OptionChainResponse) -> OptionChain {
    let spot_price = response.data.last_price;
    let entries = response
        .data
        .oc
        .into_iter()
        .filter_map(|(key, sides)| {
            let strike: f64 = key.trim().parse().ok()?;
            let quote = |side: Option<OptionSideData>| {
                let side = side.unwrap_or_default();
                OptionQuote::new(
                    strike,
                    side.last_price,
                    side.greeks.delta,
                    side.greeks.gamma,
                    side.greeks.vega,
                    side.greeks.theta,
                )
            };
            let call_oi = sides.ce.as_ref().map(|s| s.oi).unwrap_or(0.0);
            let put_oi = sides.pe.as_ref().map(|s| s.oi).unwrap_or(0.0);
            Some(ChainEntry {
                strike,
                call: quote(sides.ce),
                put: quote(sides.pe),
                call_oi,
                put_oi,
            })
        })
        .collect();

    OptionChain {
        spot_price,
        entries,
    }
}

/// Strikes are matched in integer paise to dodge float-format drift between
/// the master CSV and the chain.
fn strike_key(strike: f64) -> i64 {
    (strike * 100.0).round() as i64
}

/// Index index-option rows of the master CSV by (symbol, expiry, strike, side).
fn index_option_master(
    csv_body: &str,
) -> std::collections::HashMap<(String, NaiveDate, i64, String), String> {
    let mut index = std::collections::HashMap::new();
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(csv_body.as_bytes());

    for row in reader.deserialize::<MasterRow>().flatten() {
        if row.instrument_name != "OPTIDX" || row.security_id.is_empty() {
            continue;
        }
        let Ok(strike) = row.strike_price.trim().parse::<f64>() else {
            continue;
        };
        // Expiry column carries either a bare date or a date-time.
        let date_part = row.expiry_date.split_whitespace().next().unwrap_or_default();
        let Ok(expiry) = NaiveDate::parse_from_str(date_part, "%Y-%m-%d") else {
            continue;
        };
        index.insert(
            (
                row.symbol_name.trim().to_uppercase(),
                expiry,
                strike_key(strike),
                row.option_type.trim().to_uppercase(),
            ),
            row.security_id,
        );
    }
    index
}

#[async_trait]
impl BrokerGateway for DhanClient {
    async fn fetch_candles(&self, request: &CandleRequest) -> Result<Vec<Candle>> {
        let body = IntradayDataRequest {
            security_id: request.instrument_id.clone(),
            exchange_segment: request.exchange_segment.clone(),
            instrument: "INDEX".to_string(),
            interval: request.interval_mins,
            from_date: request.from.format("%Y-%m-%d").to_string(),
            to_date: request.to.format("%Y-%m-%d").to_string(),
        };

        let response = self.post_json("/charts/intraday", &body).await?;
        let data: IntradayDataResponse = response
            .json()
            .await
            .context("failed to parse intraday data response")?;

        let candles = candles_from_columns(data);
        debug!(count = candles.len(), from = %request.from, to = %request.to, "fetched candles");
        Ok(candles)
    }

    async fn expiry_dates(&self, instrument_id: &str, segment: &str) -> Result<Vec<NaiveDate>> {
        let body = OptionChainRequest {
            underlying_scrip: instrument_id.to_string(),
            underlying_seg: segment.to_string(),
            expiry: None,
        };

        let response = self.post_json("/optionchain/expirylist", &body).await?;
        let list: ExpiryListResponse = response
            .json()
            .await
            .context("failed to parse expiry list response")?;

        let mut dates: Vec<NaiveDate> = list
            .data
            .iter()
            .filter_map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
            .collect();
        dates.sort();
        Ok(dates)
    }

    async fn fetch_option_chain(
        &self,
        instrument_id: &str,
        segment: &str,
        expiry: NaiveDate,
    ) -> Result<OptionChain> {
        let body = OptionChainRequest {
            underlying_scrip: instrument_id.to_string(),
            underlying_seg: segment.to_string(),
            expiry: Some(expiry.format("%Y-%m-%d").to_string()),
        };

        let response = self.post_json("/optionchain", &body).await?;
        let parsed: OptionChainResponse = response
            .json()
            .await
            .context("failed to parse option chain response")?;

        let chain = chain_from_response(parsed);
        debug!(strikes = chain.entries.len(), spot = chain.spot_price, %expiry, "fetched option chain");
        Ok(chain)
    }

    async fn resolve_option_instrument(
        &self,
        underlying_symbol: &str,
        expiry: NaiveDate,
        strike: f64,
        direction: TradeDirection,
    ) -> Result<String> {
        self.ensure_master_loaded().await?;

        let side = match direction {
            TradeDirection::Call => "CE",
            TradeDirection::Put => "PE",
        };
        let key = (
            underlying_symbol.to_uppercase(),
            expiry,
            strike_key(strike),
            side.to_string(),
        );

        let guard = self.option_ids.read().await;
        guard
            .as_ref()
            .and_then(|index| index.get(&key).cloned())
            .ok_or_else(|| {
                anyhow!("no contract for {underlying_symbol} {expiry} {strike} {side} in instrument master")
            })
    }

    async fn place_bracket_order(&self, order: &BracketOrderRequest) -> Result<BracketOrderIds> {
        let body = SuperOrderRequest {
            dhan_client_id: self.client_id.clone(),
            correlation_id: order.correlation_id.clone(),
            transaction_type: "BUY".to_string(),
            exchange_segment: order.exchange_segment.clone(),
            product_type: "INTRADAY".to_string(),
            order_type: "LIMIT".to_string(),
            security_id: order.security_id.clone(),
            quantity: order.quantity,
            price: order.entry_price,
            target_price: order.target_price,
            stop_loss_price: order.stop_price,
        };

        let response = self.post_json("/super/orders", &body).await?;
        let parsed: SuperOrderResponse = response
            .json()
            .await
            .context("failed to parse super order response")?;

        if let Some(error) = parsed.error_message {
            return Err(anyhow!("order rejected: {error}"));
        }
        let order_id = parsed
            .order_id
            .ok_or_else(|| anyhow!("order response missing order id"))?;

        info!(%order_id, security = %order.security_id, "bracket order placed");
        Ok(BracketOrderIds {
            order_id,
            order_status: parsed.order_status.unwrap_or_else(|| "PENDING".to_string()),
        })
    }

    async fn run_quote_feed(
        &self,
        instruments: Vec<(String, String)>,
        tx: mpsc::Sender<Quote>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let url = format!(
            "{}?version=2&token={}&clientId={}&authType=2",
            MARKET_FEED_URL, self.access_token, self.client_id
        );
        let (ws_stream, _) = connect_async(&url)
            .await
            .context("market feed connect failed")?;
        info!("market feed connected");

        let (mut write, mut read) = ws_stream.split();

        let subscribe = FeedSubscribeRequest {
            request_code: TICKER_REQUEST_CODE,
            instrument_count: instruments.len(),
            instrument_list: instruments
                .iter()
                .map(|(segment, id)| FeedInstrument {
                    exchange_segment: segment.clone(),
                    security_id: id.clone(),
                })
                .collect(),
        };
        write
            .send(Message::Text(serde_json::to_string(&subscribe)?.into()))
            .await
            .context("market feed subscribe failed")?;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(());
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Ok(tick) = serde_json::from_str::<FeedTick>(&text) {
                                if tick.last_price > 0.0 {
                                    let quote = Quote {
                                        instrument: tick.security_id,
                                        last_price: tick.last_price,
                                        received_at: Utc::now(),
                                    };
                                    if tx.send(quote).await.is_err() {
                                        return Ok(());
                                    }
                                }
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            warn!("market feed closed by server");
                            return Err(anyhow!("market feed disconnected"));
                        }
                        Some(Err(e)) => {
                            return Err(anyhow!("market feed error: {e}"));
                        }
                        Some(Ok(_)) => {}
                    }
                }
            }
        }
    }

    async fn run_order_update_feed(
        &self,
        tx: mpsc::Sender<OrderUpdate>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let (ws_stream, _) = connect_async(ORDER_FEED_URL)
            .await
            .context("order feed connect failed")?;
        info!("order update feed connected");

        let (mut write, mut read) = ws_stream.split();

        let auth = serde_json::json!({
            "LoginReq": {
                "MsgCode": 42,
                "ClientId": self.client_id,
                "Token": self.access_token,
            },
            "UserType": "SELF",
        });
        write
            .send(Message::Text(auth.to_string().into()))
            .await
            .context("order feed auth failed")?;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(());
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            let parsed: OrderUpdateMessage = match serde_json::from_str(&text) {
                                Ok(m) => m,
                                Err(_) => continue,
                            };
                            if parsed.message_type != "order_alert" {
                                continue;
                            }
                            let order_id = parsed
                                .data
                                .get("orderNo")
                                .and_then(|v| v.as_str())
                                .unwrap_or_default()
                                .to_string();
                            let status = parsed
                                .data
                                .get("status")
                                .and_then(|v| v.as_str())
                                .unwrap_or_default()
                                .to_string();
                            if order_id.is_empty() {
                                continue;
                            }
                            let update = OrderUpdate {
                                order_id,
                                status,
                                raw: parsed.data,
                            };
                            if tx.send(update).await.is_err() {
                                return Ok(());
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            warn!("order update feed closed by server");
                            return Err(anyhow!("order update feed disconnected"));
                        }
                        Some(Err(e)) => {
                            return Err(anyhow!("order update feed error: {e}"));
                        }
                        Some(Ok(_)) => {}
                    }
                }
            }
        }
    }
}
