// ===============================
// src/engine.rs
// ===============================
//
// Order execution. One engine instance owns the position map and the trade
// records; only the daemon's process loop calls execute(), so the state needs
// no internal locking (&mut self is the whole concurrency contract).
//
// Per-symbol state machine: FLAT -> OPEN on BUY -> FLAT on matching SELL.
// SELL with no open position is a warning no-op, not an implicit short.
// BUY on an open symbol overwrites the position instead of averaging in;
// that is inherited behavior, kept visible with a warning log.
//
use std::collections::VecDeque;
use std::sync::Arc;

use ahash::AHashMap as HashMap;
use tracing::{info, warn};

use crate::config::RunMode;
use crate::domain::{unix_now, OrderIntent, OrderType, Position, TradeRecord};
use crate::error::ExchangeError;
use crate::exchange::{ExchangeClient, OrderAck};
use crate::metrics::{OPEN_POSITIONS, PNL_USD_TOTAL, TRADES_CLOSED};

#[derive(Debug, Clone)]
pub struct EngineCfg {
    pub mode: RunMode,
    /// Fixed quote-currency notional per trade; sizing is never balance-aware.
    pub notional_usd: f64,
    /// Trade records kept in memory; oldest evicted past this point.
    /// Backtest runs set this to usize::MAX (unbounded aggregation).
    pub record_cap: usize,
}

impl Default for EngineCfg {
    fn default() -> Self {
        Self {
            mode: RunMode::Backtest,
            notional_usd: 10.0,
            record_cap: 10_000,
        }
    }
}

pub struct ExecutionEngine {
    cfg: EngineCfg,
    exchange: Arc<dyn ExchangeClient>,
    positions: HashMap<String, Position>,
    trades: VecDeque<TradeRecord>,
    total_trades: u64,
}

impl ExecutionEngine {
    pub fn new(cfg: EngineCfg, exchange: Arc<dyn ExchangeClient>) -> Self {
        Self {
            cfg,
            exchange,
            positions: HashMap::new(),
            trades: VecDeque::new(),
            total_trades: 0,
        }
    }

    /// Apply one intent. Ok(Some) only when a position was closed; the error
    /// carries the failed exchange call and leaves state untouched (a failed
    /// BUY opens nothing, a failed SELL keeps the position).
    pub async fn execute(
        &mut self,
        intent: &OrderIntent,
    ) -> Result<Option<TradeRecord>, ExchangeError> {
        match intent.order_type {
            OrderType::Buy => self.open_long(intent).await.map(|_| None),
            OrderType::Sell => self.close_long(intent).await,
        }
    }

    async fn open_long(&mut self, intent: &OrderIntent) -> Result<(), ExchangeError> {
        let amount = self.cfg.notional_usd / intent.price;

        let ack = match self.cfg.mode {
            RunMode::Live => Some(
                self.exchange
                    .create_market_buy_order(&intent.symbol, amount)
                    .await?,
            ),
            RunMode::Backtest => None,
        };

        if let Some(prev) = self.positions.get(&intent.symbol) {
            warn!(
                symbol = %intent.symbol,
                prev_entry = prev.entry_price,
                new_entry = intent.price,
                "BUY on open position, overwriting"
            );
        }
        self.positions.insert(
            intent.symbol.clone(),
            Position {
                symbol: intent.symbol.clone(),
                entry_price: intent.price,
                amount,
                strategy_name: intent.strategy_name.clone(),
                entry_time: unix_now(),
            },
        );
        OPEN_POSITIONS.set(self.positions.len() as i64);

        match &ack {
            Some(a) => info!(
                symbol = %intent.symbol,
                price = intent.price,
                amount,
                order_id = %a.id,
                status = %a.status,
                "LONG opened"
            ),
            None => info!(symbol = %intent.symbol, price = intent.price, amount, "LONG opened (sim)"),
        }
        Ok(())
    }

    async fn close_long(
        &mut self,
        intent: &OrderIntent,
    ) -> Result<Option<TradeRecord>, ExchangeError> {
        let Some(pos) = self.positions.get(&intent.symbol) else {
            warn!(symbol = %intent.symbol, strategy = %intent.strategy_name, "no position to close");
            return Ok(None);
        };

        // Live: sell the tracked amount, never a size recomputed from the
        // current price. Backtest: no exchange call at all.
        let ack: Option<OrderAck> = match self.cfg.mode {
            RunMode::Live => Some(
                self.exchange
                    .create_market_sell_order(&intent.symbol, pos.amount)
                    .await?,
            ),
            RunMode::Backtest => None,
        };

        // Past the exchange call, closing can no longer fail: take the position.
        let pos = self
            .positions
            .remove(&intent.symbol)
            .expect("position checked above");
        OPEN_POSITIONS.set(self.positions.len() as i64);

        let exit_price = intent.price;
        let pnl_pct = (exit_price - pos.entry_price) / pos.entry_price * 100.0;
        let pnl_usd = (exit_price - pos.entry_price) * pos.amount;
        let now = unix_now();

        let record = TradeRecord {
            timestamp: now,
            strategy_name: pos.strategy_name.clone(),
            symbol: pos.symbol.clone(),
            order_type: "CLOSE_LONG".to_string(),
            entry_price: pos.entry_price,
            amount: pos.amount,
            exit_price,
            exit_time: now,
            pnl_pct,
            pnl_usd,
            order_id: ack.as_ref().map(|a| a.id.clone()),
            fee: ack.as_ref().and_then(|a| a.fee),
            exchange: ack.as_ref().map(|_| self.exchange.name().to_string()),
            status: ack.as_ref().map(|a| a.status.clone()),
        };

        self.trades.push_back(record.clone());
        while self.trades.len() > self.cfg.record_cap {
            self.trades.pop_front();
        }
        self.total_trades += 1;
        TRADES_CLOSED.inc();
        PNL_USD_TOTAL.add(pnl_usd);

        info!(
            symbol = %record.symbol,
            pnl_pct,
            pnl_usd,
            total = self.total_trades,
            "position closed"
        );
        Ok(Some(record))
    }

    pub fn positions(&self) -> &HashMap<String, Position> {
        &self.positions
    }

    pub fn trades(&self) -> impl Iterator<Item = &TradeRecord> {
        self.trades.iter()
    }

    pub fn record_count(&self) -> usize {
        self.trades.len()
    }

    /// Monotonic close counter; unlike record_count it survives ring eviction.
    pub fn total_trades(&self) -> u64 {
        self.total_trades
    }

    pub fn snapshot(&self) -> crate::stats::MetricsSnapshot {
        crate::stats::summarize(self.trades.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{Balance, Ticker};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Scripted exchange double: records calls, optionally fails a side.
    #[derive(Default)]
    struct MockExchange {
        fail_buy: bool,
        fail_sell: bool,
        calls: Mutex<Vec<(String, String, f64)>>,
    }

    #[async_trait]
    impl ExchangeClient for MockExchange {
        fn name(&self) -> &str {
            "mock"
        }

        async fn fetch_ticker(&self, _symbol: &str) -> Result<Ticker, ExchangeError> {
            Ok(Ticker {
                bid: 100.0,
                ask: 100.1,
                last: 100.05,
            })
        }

        async fn create_market_buy_order(
            &self,
            symbol: &str,
            amount: f64,
        ) -> Result<OrderAck, ExchangeError> {
            if self.fail_buy {
                return Err(ExchangeError::new("insufficient balance"));
            }
            self.calls
                .lock()
                .unwrap()
                .push(("buy".into(), symbol.into(), amount));
            Ok(OrderAck {
                id: "order-1".into(),
                status: "FILLED".into(),
                filled: amount,
                fee: Some(0.01),
            })
        }

        async fn create_market_sell_order(
            &self,
            symbol: &str,
            amount: f64,
        ) -> Result<OrderAck, ExchangeError> {
            if self.fail_sell {
                return Err(ExchangeError::new("network down"));
            }
            self.calls
                .lock()
                .unwrap()
                .push(("sell".into(), symbol.into(), amount));
            Ok(OrderAck {
                id: "order-2".into(),
                status: "FILLED".into(),
                filled: amount,
                fee: Some(0.02),
            })
        }

        async fn fetch_balance(&self, _currency: &str) -> Result<Balance, ExchangeError> {
            Ok(Balance {
                free: 1000.0,
                used: 0.0,
                total: 1000.0,
            })
        }
    }

    fn intent(order_type: OrderType, symbol: &str, price: f64) -> OrderIntent {
        OrderIntent {
            order_type,
            symbol: symbol.to_string(),
            price,
            strategy_name: "test".to_string(),
            timestamp: 0.0,
        }
    }

    fn backtest_engine(notional: f64) -> ExecutionEngine {
        ExecutionEngine::new(
            EngineCfg {
                mode: RunMode::Backtest,
                notional_usd: notional,
                record_cap: usize::MAX,
            },
            Arc::new(MockExchange::default()),
        )
    }

    #[tokio::test]
    async fn round_trip_pnl_up_ten_percent() {
        // notional 100 @ 100 -> amount 1; exit 110 -> +10% / +$10
        let mut eng = backtest_engine(100.0);
        eng.execute(&intent(OrderType::Buy, "BTCUSDT", 100.0))
            .await
            .unwrap();
        let rec = eng
            .execute(&intent(OrderType::Sell, "BTCUSDT", 110.0))
            .await
            .unwrap()
            .unwrap();
        assert!((rec.pnl_pct - 10.0).abs() < 1e-9);
        assert!((rec.pnl_usd - 10.0).abs() < 1e-9);
        assert_eq!(rec.order_type, "CLOSE_LONG");
        assert!(rec.order_id.is_none());
        assert!(eng.positions().is_empty());
    }

    #[tokio::test]
    async fn round_trip_pnl_down_ten_percent() {
        // notional 200 @ 100 -> amount 2; exit 90 -> -10% / -$20
        let mut eng = backtest_engine(200.0);
        eng.execute(&intent(OrderType::Buy, "ETHUSDT", 100.0))
            .await
            .unwrap();
        let rec = eng
            .execute(&intent(OrderType::Sell, "ETHUSDT", 90.0))
            .await
            .unwrap()
            .unwrap();
        assert!((rec.pnl_pct + 10.0).abs() < 1e-9);
        assert!((rec.pnl_usd + 20.0).abs() < 1e-9);
        assert!((rec.amount - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn sell_without_position_is_a_noop() {
        let mut eng = backtest_engine(100.0);
        let out = eng
            .execute(&intent(OrderType::Sell, "BTCUSDT", 100.0))
            .await
            .unwrap();
        assert!(out.is_none());
        assert_eq!(eng.record_count(), 0);
        assert_eq!(eng.total_trades(), 0);
        assert!(eng.positions().is_empty());
    }

    #[tokio::test]
    async fn buy_overwrites_open_position() {
        let mut eng = backtest_engine(100.0);
        eng.execute(&intent(OrderType::Buy, "BTCUSDT", 100.0))
            .await
            .unwrap();
        eng.execute(&intent(OrderType::Buy, "BTCUSDT", 120.0))
            .await
            .unwrap();
        assert_eq!(eng.positions().len(), 1);
        let pos = eng.positions().get("BTCUSDT").unwrap();
        assert!((pos.entry_price - 120.0).abs() < 1e-9);
        // the close settles against the overwritten entry
        let rec = eng
            .execute(&intent(OrderType::Sell, "BTCUSDT", 132.0))
            .await
            .unwrap()
            .unwrap();
        assert!((rec.pnl_pct - 10.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn at_most_one_position_per_symbol() {
        let mut eng = backtest_engine(100.0);
        let script = [
            intent(OrderType::Buy, "BTCUSDT", 100.0),
            intent(OrderType::Buy, "ETHUSDT", 10.0),
            intent(OrderType::Sell, "BTCUSDT", 101.0),
            intent(OrderType::Buy, "BTCUSDT", 102.0),
            intent(OrderType::Buy, "BTCUSDT", 103.0),
            intent(OrderType::Sell, "SOLUSDT", 1.0),
        ];
        for i in &script {
            eng.execute(i).await.unwrap();
            let mut seen = std::collections::HashSet::new();
            for sym in eng.positions().keys() {
                assert!(seen.insert(sym.clone()));
            }
            assert!(eng.positions().len() <= 2);
        }
    }

    #[tokio::test]
    async fn live_mode_records_exchange_diagnostics() {
        let exchange = Arc::new(MockExchange::default());
        let mut eng = ExecutionEngine::new(
            EngineCfg {
                mode: RunMode::Live,
                notional_usd: 100.0,
                record_cap: 10_000,
            },
            exchange.clone(),
        );
        eng.execute(&intent(OrderType::Buy, "XRPUSDT", 0.5))
            .await
            .unwrap();
        let rec = eng
            .execute(&intent(OrderType::Sell, "XRPUSDT", 0.55))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rec.order_id.as_deref(), Some("order-2"));
        assert_eq!(rec.status.as_deref(), Some("FILLED"));
        assert_eq!(rec.exchange.as_deref(), Some("mock"));
        assert_eq!(rec.fee, Some(0.02));

        // sell size is the tracked entry amount (200 = 100/0.5), not resized
        let calls = exchange.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].0, "sell");
        assert!((calls[1].2 - 200.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn failed_buy_opens_nothing() {
        let mut eng = ExecutionEngine::new(
            EngineCfg {
                mode: RunMode::Live,
                notional_usd: 100.0,
                record_cap: 10_000,
            },
            Arc::new(MockExchange {
                fail_buy: true,
                ..Default::default()
            }),
        );
        assert!(eng
            .execute(&intent(OrderType::Buy, "BTCUSDT", 100.0))
            .await
            .is_err());
        assert!(eng.positions().is_empty());
    }

    #[tokio::test]
    async fn failed_sell_keeps_the_position() {
        let exchange = Arc::new(MockExchange {
            fail_sell: true,
            ..Default::default()
        });
        let mut eng = ExecutionEngine::new(
            EngineCfg {
                mode: RunMode::Live,
                notional_usd: 100.0,
                record_cap: 10_000,
            },
            exchange,
        );
        eng.execute(&intent(OrderType::Buy, "BTCUSDT", 100.0))
            .await
            .unwrap();
        assert!(eng
            .execute(&intent(OrderType::Sell, "BTCUSDT", 110.0))
            .await
            .is_err());
        assert_eq!(eng.positions().len(), 1);
        assert_eq!(eng.record_count(), 0);
    }

    #[tokio::test]
    async fn record_ring_evicts_oldest_but_counter_keeps_counting() {
        let mut eng = ExecutionEngine::new(
            EngineCfg {
                mode: RunMode::Backtest,
                notional_usd: 100.0,
                record_cap: 2,
            },
            Arc::new(MockExchange::default()),
        );
        for exit in [101.0, 102.0, 103.0] {
            eng.execute(&intent(OrderType::Buy, "BTCUSDT", 100.0))
                .await
                .unwrap();
            eng.execute(&intent(OrderType::Sell, "BTCUSDT", exit))
                .await
                .unwrap();
        }
        assert_eq!(eng.record_count(), 2);
        assert_eq!(eng.total_trades(), 3);
        let exits: Vec<f64> = eng.trades().map(|t| t.exit_price).collect();
        assert_eq!(exits, vec![102.0, 103.0]);
    }
}
