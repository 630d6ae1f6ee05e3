// ===============================
// src/strategy.rs
// ===============================
//
// Dual-EMA crossover (trend following):
//   fast EMA crosses above slow EMA -> BUY (golden cross)
//   fast EMA crosses back below     -> SELL (dead cross)
//
// The state machine only goes long/flat; the daemon owns what a SELL means.
// Quotes for other symbols are ignored, the EMAs warm up over one slow
// period before any signal is trusted.
//
use tracing::{info, warn};

use crate::codec::{self, QuoteWire};
use crate::domain::{unix_now, OrderIntent, OrderType, Quote};
use crate::transport::{OrderSink, QuoteSubscriber};

pub struct EmaCrossState {
    symbol: String,
    strategy_name: String,
    fast_period: usize,
    slow_period: usize,
    fast_ema: Option<f64>,
    slow_ema: Option<f64>,
    warmup_left: usize,
    long: bool,
}

fn update_ema(prev: Option<f64>, price: f64, period: usize) -> f64 {
    match prev {
        None => price,
        Some(prev) => {
            let k = 2.0 / (period as f64 + 1.0);
            price * k + prev * (1.0 - k)
        }
    }
}

impl EmaCrossState {
    pub fn new(symbol: String, strategy_name: String, fast_period: usize, slow_period: usize) -> Self {
        Self {
            symbol,
            strategy_name,
            fast_period,
            slow_period,
            fast_ema: None,
            slow_ema: None,
            warmup_left: slow_period,
            long: false,
        }
    }

    pub fn on_quote(&mut self, q: &Quote) -> Option<OrderIntent> {
        if q.symbol != self.symbol {
            return None;
        }
        let mid = q.mid();
        self.fast_ema = Some(update_ema(self.fast_ema, mid, self.fast_period));
        self.slow_ema = Some(update_ema(self.slow_ema, mid, self.slow_period));

        if self.warmup_left > 0 {
            self.warmup_left -= 1;
            return None;
        }
        let (fast, slow) = (self.fast_ema?, self.slow_ema?);

        if fast > slow && !self.long {
            self.long = true;
            // enter at the ask, where a market buy actually fills
            return Some(self.intent(OrderType::Buy, q.ask, q.timestamp));
        }
        if fast < slow && self.long {
            self.long = false;
            return Some(self.intent(OrderType::Sell, q.bid, q.timestamp));
        }
        None
    }

    fn intent(&self, order_type: OrderType, price: f64, ts: Option<f64>) -> OrderIntent {
        OrderIntent {
            order_type,
            symbol: self.symbol.clone(),
            price,
            strategy_name: self.strategy_name.clone(),
            timestamp: ts.unwrap_or_else(unix_now),
        }
    }
}

/// Signal loop: quotes in, intents out. A malformed quote or an unreachable
/// daemon costs one message, never the loop.
pub async fn run(
    mut quotes: QuoteSubscriber,
    orders: OrderSink,
    wire: QuoteWire,
    mut state: EmaCrossState,
) {
    loop {
        let frame = match quotes.recv().await {
            Ok(f) => f,
            Err(e) => {
                warn!(%e, "quote feed lost, strategy stopping");
                return;
            }
        };
        let quote = match codec::decode_quote(&frame, wire) {
            Ok(q) => q,
            Err(e) => {
                warn!(%e, "skipping malformed quote");
                continue;
            }
        };
        if let Some(intent) = state.on_quote(&quote) {
            info!(
                side = intent.order_type.as_str(),
                symbol = %intent.symbol,
                price = intent.price,
                "signal"
            );
            match codec::encode_intent(&intent) {
                Ok(frame) => {
                    if !orders.try_send(frame) {
                        warn!(side = intent.order_type.as_str(), "could not push intent, dropped");
                    }
                }
                Err(e) => warn!(%e, "intent encode failed"),
            }
        }
    }
}
