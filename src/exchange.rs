// ===============================
// src/exchange.rs
// ===============================
//
// Exchange connectivity boundary. The engine only sees the ExchangeClient
// trait; the Binance implementation signs REST requests (HMAC-SHA256 over the
// query string) the same way for testnet and mainnet, only the base URL
// differs.
//
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::ExchangeError;

#[derive(Debug, Clone, PartialEq)]
pub struct Ticker {
    pub bid: f64,
    pub ask: f64,
    pub last: f64,
}

/// What the engine keeps from an accepted order, for TradeRecord diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderAck {
    pub id: String,
    pub status: String,
    pub filled: f64,
    pub fee: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Balance {
    pub free: f64,
    pub used: f64,
    pub total: f64,
}

#[async_trait]
pub trait ExchangeClient: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, ExchangeError>;
    async fn create_market_buy_order(
        &self,
        symbol: &str,
        amount: f64,
    ) -> Result<OrderAck, ExchangeError>;
    async fn create_market_sell_order(
        &self,
        symbol: &str,
        amount: f64,
    ) -> Result<OrderAck, ExchangeError>;
    async fn fetch_balance(&self, currency: &str) -> Result<Balance, ExchangeError>;
}

pub fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub fn sign_query(secret: &str, query: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC key");
    mac.update(query.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Quotes and intents carry "BTC/USDT" or "BTCUSDT" interchangeably; Binance
/// only speaks the latter.
pub fn binance_symbol(symbol: &str) -> String {
    symbol.replace('/', "").to_ascii_uppercase()
}

// ---- REST response models ----

#[derive(Debug, Deserialize)]
struct BookTickerResp {
    #[serde(rename = "bidPrice")]
    bid_price: String,
    #[serde(rename = "askPrice")]
    ask_price: String,
}

#[derive(Debug, Deserialize)]
struct PriceResp {
    price: String,
}

#[derive(Debug, Deserialize)]
struct FillResp {
    #[serde(default)]
    commission: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrderResp {
    #[serde(rename = "orderId")]
    order_id: u64,
    status: String,
    #[serde(rename = "executedQty", default)]
    executed_qty: Option<String>,
    #[serde(default)]
    fills: Vec<FillResp>,
}

#[derive(Debug, Deserialize)]
struct AssetBalanceResp {
    asset: String,
    free: String,
    locked: String,
}

#[derive(Debug, Deserialize)]
struct AccountResp {
    balances: Vec<AssetBalanceResp>,
}

fn parse_f64(s: &str, what: &str) -> Result<f64, ExchangeError> {
    s.parse::<f64>()
        .map_err(|e| ExchangeError::new(format!("bad {what} {s:?}: {e}")))
}

/// Binance Spot REST client (testnet or mainnet, per base URL).
pub struct BinanceClient {
    http: reqwest::Client,
    rest_base: String,
    api_key: String,
    api_secret: String,
    recv_window: u64,
}

impl BinanceClient {
    pub fn new(rest_base: String, api_key: String, api_secret: String, recv_window: u64) -> Self {
        Self {
            http: reqwest::Client::new(),
            rest_base,
            api_key,
            api_secret,
            recv_window,
        }
    }

    async fn get_public(&self, path: &str, query: &str) -> Result<String, ExchangeError> {
        let url = format!("{}{}?{}", self.rest_base, path, query);
        let rsp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ExchangeError::new(format!("GET {path}: {e}")))?;
        let code = rsp.status();
        let body = rsp
            .text()
            .await
            .map_err(|e| ExchangeError::new(format!("GET {path} body: {e}")))?;
        if !code.is_success() {
            return Err(ExchangeError::new(format!("GET {path} -> {code}: {body}")));
        }
        Ok(body)
    }

    async fn signed(
        &self,
        method: reqwest::Method,
        path: &str,
        params: Vec<(String, String)>,
    ) -> Result<String, ExchangeError> {
        let mut params = params;
        params.push(("timestamp".to_string(), timestamp_ms().to_string()));
        params.push(("recvWindow".to_string(), self.recv_window.to_string()));
        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let sig = sign_query(&self.api_secret, &query);
        let url = format!("{}{}?{}&signature={}", self.rest_base, path, query, sig);

        let rsp = self
            .http
            .request(method.clone(), url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| ExchangeError::new(format!("{method} {path}: {e}")))?;
        let code = rsp.status();
        let body = rsp
            .text()
            .await
            .map_err(|e| ExchangeError::new(format!("{method} {path} body: {e}")))?;
        if !code.is_success() {
            return Err(ExchangeError::new(format!(
                "{method} {path} -> {code}: {body}"
            )));
        }
        Ok(body)
    }

    async fn market_order(
        &self,
        side: &str,
        symbol: &str,
        amount: f64,
    ) -> Result<OrderAck, ExchangeError> {
        let params = vec![
            ("symbol".to_string(), binance_symbol(symbol)),
            ("side".to_string(), side.to_string()),
            ("type".to_string(), "MARKET".to_string()),
            ("quantity".to_string(), format!("{amount}")),
        ];
        let body = self
            .signed(reqwest::Method::POST, "/api/v3/order", params)
            .await?;
        let resp: OrderResp = serde_json::from_str(&body)
            .map_err(|e| ExchangeError::new(format!("order response decode: {e} ({body})")))?;

        let filled = match resp.executed_qty.as_deref() {
            Some(q) => parse_f64(q, "executedQty")?,
            None => 0.0,
        };
        let fee = resp
            .fills
            .iter()
            .filter_map(|f| f.commission.as_deref().and_then(|c| c.parse::<f64>().ok()))
            .reduce(|a, b| a + b);

        Ok(OrderAck {
            id: resp.order_id.to_string(),
            status: resp.status,
            filled,
            fee,
        })
    }
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    fn name(&self) -> &str {
        "binance"
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, ExchangeError> {
        let sym = binance_symbol(symbol);
        let book = self
            .get_public("/api/v3/ticker/bookTicker", &format!("symbol={sym}"))
            .await?;
        let book: BookTickerResp = serde_json::from_str(&book)
            .map_err(|e| ExchangeError::new(format!("bookTicker decode: {e}")))?;
        let last = self
            .get_public("/api/v3/ticker/price", &format!("symbol={sym}"))
            .await?;
        let last: PriceResp = serde_json::from_str(&last)
            .map_err(|e| ExchangeError::new(format!("price decode: {e}")))?;
        Ok(Ticker {
            bid: parse_f64(&book.bid_price, "bidPrice")?,
            ask: parse_f64(&book.ask_price, "askPrice")?,
            last: parse_f64(&last.price, "price")?,
        })
    }

    async fn create_market_buy_order(
        &self,
        symbol: &str,
        amount: f64,
    ) -> Result<OrderAck, ExchangeError> {
        self.market_order("BUY", symbol, amount).await
    }

    async fn create_market_sell_order(
        &self,
        symbol: &str,
        amount: f64,
    ) -> Result<OrderAck, ExchangeError> {
        self.market_order("SELL", symbol, amount).await
    }

    async fn fetch_balance(&self, currency: &str) -> Result<Balance, ExchangeError> {
        let body = self
            .signed(reqwest::Method::GET, "/api/v3/account", Vec::new())
            .await?;
        let account: AccountResp = serde_json::from_str(&body)
            .map_err(|e| ExchangeError::new(format!("account decode: {e}")))?;
        let want = currency.to_ascii_uppercase();
        let entry = account
            .balances
            .into_iter()
            .find(|b| b.asset == want)
            .ok_or_else(|| ExchangeError::new(format!("no balance entry for {want}")))?;
        let free = parse_f64(&entry.free, "free")?;
        let used = parse_f64(&entry.locked, "locked")?;
        Ok(Balance {
            free,
            used,
            total: free + used,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signs_like_the_binance_docs_example() {
        // Reference vector from the Binance spot API documentation.
        let secret = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            sign_query(secret, query),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn symbol_normalization() {
        assert_eq!(binance_symbol("BTC/USDT"), "BTCUSDT");
        assert_eq!(binance_symbol("xrpusdt"), "XRPUSDT");
    }

    #[test]
    fn order_response_fee_is_summed_over_fills() {
        let body = r#"{"orderId":12345,"status":"FILLED","executedQty":"0.00025",
            "fills":[{"commission":"0.001"},{"commission":"0.002"}]}"#;
        let resp: OrderResp = serde_json::from_str(body).unwrap();
        let fee: f64 = resp
            .fills
            .iter()
            .filter_map(|f| f.commission.as_deref().and_then(|c| c.parse::<f64>().ok()))
            .sum();
        assert!((fee - 0.003).abs() < 1e-12);
        assert_eq!(resp.order_id, 12345);
    }
}
