// ===============================
// src/config.rs
// ===============================
use std::env;

use dotenvy::dotenv;
use tokio::time::Duration;

use crate::codec::QuoteWire;
use crate::queue;

/// Execution mode for the trade daemon.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunMode {
    Live,
    Backtest,
}

impl RunMode {
    pub fn from_env(key: &str, default_mode: RunMode) -> RunMode {
        match env::var(key).unwrap_or_default().to_ascii_lowercase().as_str() {
            "live" => RunMode::Live,
            "backtest" => RunMode::Backtest,
            _ => default_mode,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Live => "live",
            RunMode::Backtest => "backtest",
        }
    }
}

/// Where the quote publisher gets its prices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeedMode {
    Mock,
    BinanceWs,
    BinanceRest,
}

impl FeedMode {
    pub fn from_env(key: &str, default_mode: FeedMode) -> FeedMode {
        match env::var(key).unwrap_or_default().to_ascii_lowercase().as_str() {
            "mock" => FeedMode::Mock,
            "binance_ws" => FeedMode::BinanceWs,
            "binance_rest" => FeedMode::BinanceRest,
            _ => default_mode,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FeedMode::Mock => "mock",
            FeedMode::BinanceWs => "binance_ws",
            FeedMode::BinanceRest => "binance_rest",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Args {
    // channel endpoints (host:port; bind side and connect side share the value)
    pub quote_addr: String,
    pub order_addr: String,

    // wire & daemon behavior
    pub quote_wire: QuoteWire,
    pub run_mode: RunMode,
    pub queue_capacity: usize,
    pub op_timeout_ms: u64,
    pub notional_usd: f64,
    pub record_cap: usize,

    // strategy / publisher identity
    pub symbol: String,
    pub strategy_name: String,
    pub ema_fast: usize,
    pub ema_slow: usize,

    // files / metrics
    pub record_file: Option<String>,
    pub metrics_port: u16,

    // feed & exchange endpoints
    pub feed_mode: FeedMode,
    pub publish_interval_ms: u64,
    pub binance_ws_url: String,
    pub binance_rest_url: String,
    pub binance_api_key: String,
    pub binance_api_secret: String,
    pub binance_recv_window: u64,
}

impl Args {
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

pub fn load() -> Args {
    // Make sure .env is read (RECORD_FILE, SYMBOL, keys, ...)
    let _ = dotenv();

    let quote_addr = env::var("QUOTE_ADDR").unwrap_or_else(|_| "127.0.0.1:5000".to_string());
    let order_addr = env::var("ORDER_ADDR").unwrap_or_else(|_| "127.0.0.1:5001".to_string());

    let quote_wire = env::var("QUOTE_WIRE")
        .ok()
        .and_then(|s| QuoteWire::parse(&s))
        .unwrap_or(QuoteWire::BidAskTs);
    let run_mode = RunMode::from_env("RUN_MODE", RunMode::Backtest);

    let queue_capacity = env::var("QUEUE_CAPACITY")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(queue::DEFAULT_CAPACITY);
    let op_timeout_ms = env::var("OP_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(queue::DEFAULT_OP_TIMEOUT.as_millis() as u64);
    let notional_usd = env::var("TRADE_SIZE_USD")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(10.0);
    // Live keeps a bounded ring of closed trades; backtest aggregates all of
    // them for the final report.
    let record_cap = match run_mode {
        RunMode::Live => env::var("RECORD_CAP")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10_000),
        RunMode::Backtest => usize::MAX,
    };

    let symbol = env::var("SYMBOL")
        .unwrap_or_else(|_| "BTCUSDT".to_string())
        .to_ascii_uppercase();
    let strategy_name = env::var("STRATEGY_NAME").unwrap_or_else(|_| "ema_9_25".to_string());
    let ema_fast = env::var("EMA_FAST")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(9);
    let ema_slow = env::var("EMA_SLOW")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(25);

    let record_file = env::var("RECORD_FILE").ok();
    let metrics_port = env::var("METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(9898);

    let feed_mode = FeedMode::from_env("FEED_MODE", FeedMode::Mock);
    let publish_interval_ms = env::var("PUBLISH_INTERVAL_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(100);

    let binance_ws_url = env::var("BINANCE_WS_URL")
        .unwrap_or_else(|_| "wss://testnet.binance.vision/ws".to_string());
    let binance_rest_url = env::var("BINANCE_REST_URL")
        .unwrap_or_else(|_| "https://testnet.binance.vision".to_string());
    let binance_api_key = env::var("BINANCE_API_KEY").unwrap_or_default();
    let binance_api_secret = env::var("BINANCE_API_SECRET").unwrap_or_default();
    let binance_recv_window = env::var("BINANCE_RECV_WINDOW")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(5000);

    Args {
        quote_addr,
        order_addr,
        quote_wire,
        run_mode,
        queue_capacity,
        op_timeout_ms,
        notional_usd,
        record_cap,
        symbol,
        strategy_name,
        ema_fast,
        ema_slow,
        record_file,
        metrics_port,
        feed_mode,
        publish_interval_ms,
        binance_ws_url,
        binance_rest_url,
        binance_api_key,
        binance_api_secret,
        binance_recv_window,
    }
}
