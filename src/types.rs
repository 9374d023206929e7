use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single OHLCV candle. Immutable once produced by the data gateway;
/// windows are always ordered by timestamp ascending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    /// Absolute body size (open-to-close).
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    /// Full candle range (high-to-low).
    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

/// Latest traded quote for an instrument, pushed by the live feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub instrument: String,
    pub last_price: f64,
    pub received_at: DateTime<Utc>,
}

/// Asynchronous order status event delivered by the broker's update feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub order_id: String,
    pub status: String,
    /// Untouched broker payload, kept for fill-price extraction and audit.
    pub raw: serde_json::Value,
}

impl OrderUpdate {
    /// Whether this status terminates the order (fill or completion).
    pub fn is_terminal(&self) -> bool {
        matches!(self.status.as_str(), "TRADED" | "FILLED" | "CLOSED")
    }

    /// Fill price if the broker included one in the payload.
    pub fn fill_price(&self) -> Option<f64> {
        self.raw
            .get("tradedPrice")
            .or_else(|| self.raw.get("averageTradedPrice"))
            .and_then(|v| v.as_f64())
    }
}

/// Direction of an options bet on the underlying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeDirection {
    /// Long call, a bullish bet off a demand zone.
    Call,
    /// Long put, a bearish bet off a supply zone.
    Put,
}

impl std::fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => write!(f, "CALL"),
            Self::Put => write!(f, "PUT"),
        }
    }
}

/// A single option contract quote with Greeks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionQuote {
    pub strike: f64,
    pub premium: f64,
    pub delta: f64,
    pub gamma: f64,
    pub vega: f64,
    /// Daily premium decay, normally negative.
    pub theta_per_day: f64,
    /// True only when theta and delta are nonzero and premium is positive.
    pub has_valid_greeks: bool,
}

impl OptionQuote {
    pub fn new(
        strike: f64,
        premium: f64,
        delta: f64,
        gamma: f64,
        vega: f64,
        theta_per_day: f64,
    ) -> Self {
        let has_valid_greeks = premium > 0.0 && delta != 0.0 && theta_per_day != 0.0;
        Self {
            strike,
            premium,
            delta,
            gamma,
            vega,
            theta_per_day,
            has_valid_greeks,
        }
    }
}

/// One strike row of an option chain: both sides plus open interest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainEntry {
    pub strike: f64,
    pub call: OptionQuote,
    pub put: OptionQuote,
    pub call_oi: f64,
    pub put_oi: f64,
}

/// Full option chain for one expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionChain {
    pub spot_price: f64,
    pub entries: Vec<ChainEntry>,
}

impl OptionChain {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Quotes for one side of the chain.
    pub fn quotes(&self, direction: TradeDirection) -> Vec<OptionQuote> {
        self.entries
            .iter()
            .map(|e| match direction {
                TradeDirection::Call => e.call.clone(),
                TradeDirection::Put => e.put.clone(),
            })
            .collect()
    }
}

/// Events broadcast to the presentation layer. Payloads are the analysis and
/// trade entities themselves; the transport is outside this crate.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    Started,
    Stopped,
    ZonesUpdated {
        demand_zones: usize,
        supply_zones: usize,
        current_price: f64,
    },
    CycleSkipped {
        cycle: String,
        reason: String,
    },
    TradeDispatched {
        record: crate::engine::execution::TradeRecord,
    },
    TradeUpdated {
        record: crate::engine::execution::TradeRecord,
    },
    FeedDown {
        feed: String,
    },
}
