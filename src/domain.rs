// ===============================
// src/domain.rs
// ===============================
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Unix seconds with sub-second precision, the pipeline's timestamp unit.
pub fn unix_now() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1e6
}

/// Order direction as strategies emit it on the wire ("BUY"/"SELL").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Buy,
    Sell,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Buy => "BUY",
            OrderType::Sell => "SELL",
        }
    }
}

/// Best bid/ask snapshot for one symbol at one instant.
/// `timestamp` is unix seconds; `None` on the 24-byte wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub bid: f64,
    pub ask: f64,
    pub timestamp: Option<f64>,
    pub symbol: String,
}

impl Quote {
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }
}

/// A strategy's request to enter or exit, prior to execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub order_type: OrderType,
    pub symbol: String,
    pub price: f64,
    pub strategy_name: String,
    pub timestamp: f64,
}

/// Tracked open exposure in one symbol. Replaced wholesale, never mutated;
/// at most one per symbol (a BUY on an open symbol overwrites it).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub entry_price: f64,
    pub amount: f64,
    pub strategy_name: String,
    pub entry_time: f64,
}

/// Immutable record of a completed round trip. The `order_id`/`fee`/
/// `exchange`/`status` diagnostics are only populated in live mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub timestamp: f64,
    pub strategy_name: String,
    pub symbol: String,
    pub order_type: String,
    pub entry_price: f64,
    pub amount: f64,
    pub exit_price: f64,
    pub exit_time: f64,
    pub pnl_pct: f64,
    pub pnl_usd: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Everything the JSONL recorder can persist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    Quote(Quote),
    Intent(OrderIntent),
    Trade(TradeRecord),
    Note(String),
}
