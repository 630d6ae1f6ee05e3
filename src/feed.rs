// ===============================
// src/feed.rs
// ===============================
//
// Quote sources for the publisher:
// - run_mock         : random-walk generator for offline runs
// - run_binance_ws   : Binance bookTicker stream (testnet & mainnet)
// - run_rest_poll    : fetch_ticker polling through the ExchangeClient
//
// Every source pushes Quote values into one mpsc bus; the publisher binary
// owns the encode-and-fan-out side.
//
use std::sync::Arc;

use futures_util::StreamExt; // for .next()
use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tokio_tungstenite::connect_async;
use tracing::{error, info, warn};
use url::Url;

use crate::domain::{unix_now, Quote};
use crate::exchange::ExchangeClient;

/// Random-walk bid/ask around 100.0 for running the pipeline with no
/// exchange at all.
pub async fn run_mock(quote_tx: mpsc::Sender<Quote>, symbol: String, interval_ms: u64) {
    let mut bid: f64 = 100.0;
    loop {
        // don't hold ThreadRng across .await
        let step = rand::thread_rng().gen_range(-3..=3) as f64 * 0.01;
        bid = (bid + step).max(50.0);
        let quote = Quote {
            bid,
            ask: bid + 0.01,
            timestamp: Some(unix_now()),
            symbol: symbol.clone(),
        };
        if quote_tx.send(quote).await.is_err() {
            return;
        }
        sleep(Duration::from_millis(interval_ms)).await;
    }
}

/// Binance bookTicker WS adapter (read-only).
///
/// - `ws_base`: wss://testnet.binance.vision/ws or wss://stream.binance.com:9443/ws
/// - `symbol` is the domain symbol ("BTCUSDT"); lower-cased into the topic.
pub async fn run_binance_ws(quote_tx: mpsc::Sender<Quote>, symbol: String, ws_base: String) {
    let topic = format!("{}@bookTicker", symbol.to_lowercase());
    let ws_url = format!("{}/{}", ws_base.trim_end_matches('/'), topic);

    if let Err(e) = Url::parse(&ws_url) {
        error!(?e, %ws_url, "bad ws url");
        return;
    }

    let mut attempt: u32 = 0;
    loop {
        info!(%ws_url, "connecting binance bookTicker");
        match connect_async(ws_url.as_str()).await {
            Ok((mut ws, _resp)) => {
                info!("connected to bookTicker for {}", symbol);
                attempt = 0; // reset backoff

                while let Some(frame) = ws.next().await {
                    match frame {
                        Ok(m) if m.is_text() => {
                            // {"u":400900217,"s":"BNBUSDT","b":"25.35","B":"31.21","a":"25.36","A":"40.66"}
                            let txt = match m.into_text() {
                                Ok(t) => t,
                                Err(e) => {
                                    warn!(?e, "failed to read text frame");
                                    continue;
                                }
                            };
                            if let Ok(v) = serde_json::from_str::<serde_json::Value>(&txt) {
                                let b = v.get("b").and_then(|x| x.as_str());
                                let a = v.get("a").and_then(|x| x.as_str());
                                if let (Some(b), Some(a)) = (b, a) {
                                    let bid = b.parse::<f64>().unwrap_or(0.0);
                                    let ask = a.parse::<f64>().unwrap_or(0.0);
                                    if bid > 0.0 && ask > 0.0 {
                                        let quote = Quote {
                                            bid,
                                            ask,
                                            timestamp: Some(unix_now()),
                                            symbol: symbol.clone(),
                                        };
                                        if quote_tx.send(quote).await.is_err() {
                                            return;
                                        }
                                    }
                                }
                            }
                        }
                        Ok(_) => {
                            // ignore non-text frames
                        }
                        Err(e) => {
                            error!(?e, "ws read error");
                            break;
                        }
                    }
                }
                info!("bookTicker disconnected, will reconnect…");
            }
            Err(e) => {
                error!(?e, "connect failed");
            }
        }

        // Exponential backoff + jitter
        attempt = attempt.saturating_add(1);
        let shift = attempt.min(6);
        let factor = 1u64 << shift; // 1,2,4,...,64
        let base_ms = 500u64.saturating_mul(factor); // 0.5s..32s
        let jitter = rand::thread_rng().gen_range(0..=250);
        sleep(Duration::from_millis(base_ms + jitter)).await;
    }
}

/// Poll fetch_ticker at a fixed cadence. A failed poll is one missed sample,
/// not a feed outage.
pub async fn run_rest_poll(
    quote_tx: mpsc::Sender<Quote>,
    exchange: Arc<dyn ExchangeClient>,
    symbol: String,
    interval_ms: u64,
) {
    loop {
        match exchange.fetch_ticker(&symbol).await {
            Ok(ticker) => {
                let quote = Quote {
                    bid: ticker.bid,
                    ask: ticker.ask,
                    timestamp: Some(unix_now()),
                    symbol: symbol.clone(),
                };
                if quote_tx.send(quote).await.is_err() {
                    return;
                }
            }
            Err(e) => warn!(%e, symbol = %symbol, "ticker poll failed"),
        }
        sleep(Duration::from_millis(interval_ms)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_feed_emits_sane_quotes() {
        let (tx, mut rx) = mpsc::channel(8);
        let task = tokio::spawn(run_mock(tx, "BTCUSDT".to_string(), 1));
        for _ in 0..5 {
            let q = rx.recv().await.unwrap();
            assert_eq!(q.symbol, "BTCUSDT");
            assert!(q.bid >= 50.0);
            assert!(q.ask > q.bid);
            assert!(q.timestamp.is_some());
        }
        task.abort();
    }

    #[tokio::test]
    async fn mock_feed_stops_when_consumer_is_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        // must return, not spin
        run_mock(tx, "BTCUSDT".to_string(), 1).await;
    }
}
