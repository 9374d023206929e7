//! Dhan API Data Models
//!
//! Request and response types for the Dhan REST and websocket APIs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Historical candles
// ============================================================================

/// Request body for the intraday historical-data endpoint
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntradayDataRequest {
    /// Security id of the instrument (e.g. "13" for the Nifty 50 index)
    pub security_id: String,
    /// Exchange segment (e.g. "IDX_I")
    pub exchange_segment: String,
    /// Instrument kind (e.g. "INDEX")
    pub instrument: String,
    /// Candle interval in minutes
    pub interval: u32,
    /// Inclusive start date, "YYYY-MM-DD"
    pub from_date: String,
    /// Inclusive end date, "YYYY-MM-DD"
    pub to_date: String,
}

/// Column-oriented candle arrays as returned by the historical endpoint
#[derive(Debug, Deserialize)]
pub struct IntradayDataResponse {
    #[serde(default)]
    pub open: Vec<f64>,
    #[serde(default)]
    pub high: Vec<f64>,
    #[serde(default)]
    pub low: Vec<f64>,
    #[serde(default)]
    pub close: Vec<f64>,
    #[serde(default)]
    pub volume: Vec<f64>,
    /// Epoch seconds per candle
    #[serde(default)]
    pub timestamp: Vec<i64>,
}

// ============================================================================
// Option chain
// ============================================================================

/// Request body for the option-chain and expiry-list endpoints
#[derive(Debug, Serialize)]
pub struct OptionChainRequest {
    /// Underlying security id
    #[serde(rename = "UnderlyingScrip")]
    pub underlying_scrip: String,
    /// Underlying exchange segment
    #[serde(rename = "UnderlyingSeg")]
    pub underlying_seg: String,
    /// Expiry date, "YYYY-MM-DD"; omitted for the expiry-list endpoint
    #[serde(rename = "Expiry", skip_serializing_if = "Option::is_none")]
    pub expiry: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExpiryListResponse {
    /// Expiry dates, "YYYY-MM-DD", soonest first
    #[serde(default)]
    pub data: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct OptionChainResponse {
    pub data: OptionChainData,
}

#[derive(Debug, Deserialize)]
pub struct OptionChainData {
    /// Underlying last traded price
    #[serde(default)]
    pub last_price: f64,
    /// Strike (as a formatted string key) to both option sides
    #[serde(default)]
    pub oc: BTreeMap<String, StrikeData>,
}

#[derive(Debug, Deserialize)]
pub struct StrikeData {
    /// Call side
    #[serde(default)]
    pub ce: Option<OptionSideData>,
    /// Put side
    #[serde(default)]
    pub pe: Option<OptionSideData>,
}

#[derive(Debug, Deserialize, Default)]
pub struct OptionSideData {
    #[serde(default)]
    pub last_price: f64,
    #[serde(default)]
    pub oi: f64,
    #[serde(default)]
    pub implied_volatility: f64,
    #[serde(default)]
    pub greeks: GreeksData,
}

#[derive(Debug, Deserialize, Default)]
pub struct GreeksData {
    #[serde(default)]
    pub delta: f64,
    #[serde(default)]
    pub gamma: f64,
    #[serde(default)]
    pub vega: f64,
    /// Premium decay per calendar day
    #[serde(default)]
    pub theta: f64,
}

// ============================================================================
// Orders
// ============================================================================

/// Request body for a super (bracket) order: entry leg plus broker-managed
/// target and stop-loss legs
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuperOrderRequest {
    pub dhan_client_id: String,
    /// Echoed back on the order-update feed
    pub correlation_id: String,
    /// "BUY" for long options
    pub transaction_type: String,
    /// Exchange segment for the option (e.g. "NSE_FNO")
    pub exchange_segment: String,
    /// "INTRADAY"
    pub product_type: String,
    /// "LIMIT"
    pub order_type: String,
    pub security_id: String,
    pub quantity: i64,
    /// Entry limit price
    pub price: f64,
    pub target_price: f64,
    pub stop_loss_price: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuperOrderResponse {
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub order_status: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

// ============================================================================
// Websocket feeds
// ============================================================================

/// Subscription message for the live market feed
#[derive(Debug, Serialize)]
pub struct FeedSubscribeRequest {
    #[serde(rename = "RequestCode")]
    pub request_code: u32,
    #[serde(rename = "InstrumentCount")]
    pub instrument_count: usize,
    #[serde(rename = "InstrumentList")]
    pub instrument_list: Vec<FeedInstrument>,
}

#[derive(Debug, Serialize)]
pub struct FeedInstrument {
    #[serde(rename = "ExchangeSegment")]
    pub exchange_segment: String,
    #[serde(rename = "SecurityId")]
    pub security_id: String,
}

/// Ticker message pushed by the market feed
#[derive(Debug, Deserialize)]
pub struct FeedTick {
    #[serde(rename = "type", default)]
    pub message_type: String,
    #[serde(rename = "securityId", default)]
    pub security_id: String,
    /// Last traded price
    #[serde(rename = "LTP", alias = "ltp", default)]
    pub last_price: f64,
}

/// Order event pushed by the order-update feed
#[derive(Debug, Deserialize)]
pub struct OrderUpdateMessage {
    #[serde(rename = "Type", default)]
    pub message_type: String,
    #[serde(rename = "Data", default)]
    pub data: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_chain_response_parses_dhan_shape() {
        let raw = r#"{
            "data": {
                "last_price": 22045.5,
                "oc": {
                    "22000.000000": {
                        "ce": {
                            "last_price": 120.5,
                            "oi": 1500000,
                            "implied_volatility": 12.4,
                            "greeks": {"delta": 0.55, "gamma": 0.0012, "vega": 8.1, "theta": -9.3}
                        },
                        "pe": {
                            "last_price": 80.2,
                            "oi": 2100000,
                            "implied_volatility": 13.1,
                            "greeks": {"delta": -0.45, "gamma": 0.0012, "vega": 8.0, "theta": -8.8}
                        }
                    }
                }
            }
        }"#;
        let parsed: OptionChainResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.data.last_price, 22045.5);
        let strike = parsed.data.oc.get("22000.000000").unwrap();
        assert_eq!(strike.ce.as_ref().unwrap().greeks.delta, 0.55);
        assert_eq!(strike.pe.as_ref().unwrap().oi, 2100000.0);
    }

    #[test]
    fn missing_greeks_default_to_zero() {
        let raw = r#"{"last_price": 120.5, "oi": 100}"#;
        let side: OptionSideData = serde_json::from_str(raw).unwrap();
        assert_eq!(side.greeks.delta, 0.0);
        assert_eq!(side.greeks.theta, 0.0);
    }

    #[test]
    fn intraday_response_tolerates_missing_columns() {
        let raw = r#"{"open": [1.0], "close": [2.0]}"#;
        let parsed: IntradayDataResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.open.len(), 1);
        assert!(parsed.timestamp.is_empty());
    }
}
