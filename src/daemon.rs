// ===============================
// src/daemon.rs
// ===============================
//
// The order-execution daemon: two loops, one bounded queue between them.
//
//   ingest : order channel -> decode -> enqueue   (recv timeout bounds it)
//   process: dequeue -> engine.execute -> sink    (dequeue timeout bounds it)
//
// The queue is the only structure both loops touch; the engine state belongs
// to the process loop alone. Every in-loop error costs one message. Shutdown
// flips a watch flag both loops poll on their timeouts; the in-flight
// execute finishes, then the final report goes out.
//
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::codec;
use crate::config::{Args, RunMode};
use crate::domain::Event;
use crate::engine::{EngineCfg, ExecutionEngine};
use crate::error::TransportError;
use crate::exchange::ExchangeClient;
use crate::metrics::{
    EXEC_ERRORS, INTENTS_DROPPED, INTENTS_EXECUTED, INTENTS_RECEIVED, QUEUE_DEPTH,
};
use crate::queue::{self, OrderConsumer, OrderProducer};
use crate::recorder;
use crate::stats::MetricsSnapshot;
use crate::transport::OrderReceiver;

pub struct Daemon {
    args: Args,
    exchange: Arc<dyn ExchangeClient>,
    receiver: OrderReceiver,
}

impl Daemon {
    /// Bind the order channel. The bind error is the caller's cue to exit
    /// non-zero; nothing after startup is fatal.
    pub async fn bind(
        args: Args,
        exchange: Arc<dyn ExchangeClient>,
    ) -> Result<Self, TransportError> {
        let receiver = OrderReceiver::bind(&args.order_addr).await?;
        info!(
            addr = %receiver.local_addr(),
            mode = args.run_mode.as_str(),
            notional = args.notional_usd,
            queue = args.queue_capacity,
            "trade daemon up"
        );
        Ok(Self {
            args,
            exchange,
            receiver,
        })
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.receiver.local_addr()
    }

    /// Run ingest and process until `shutdown` flips, then report.
    pub async fn run_until(self, shutdown: watch::Receiver<bool>) -> MetricsSnapshot {
        let Self {
            args,
            exchange,
            receiver,
        } = self;
        let (producer, consumer) = queue::bounded(args.queue_capacity, args.op_timeout());

        let record_tx = args.record_file.clone().map(|path| {
            let (tx, rx) = mpsc::channel::<Event>(8192);
            tokio::spawn(recorder::run(rx, path));
            tx
        });

        let engine = ExecutionEngine::new(
            EngineCfg {
                mode: args.run_mode,
                notional_usd: args.notional_usd,
                record_cap: args.record_cap,
            },
            exchange,
        );

        let ingest = tokio::spawn(ingest_loop(
            receiver,
            producer,
            args.op_timeout(),
            shutdown.clone(),
        ));
        let process = tokio::spawn(process_loop(consumer, engine, record_tx, shutdown));

        let _ = ingest.await;
        let engine = process.await.expect("process loop panicked");

        let snapshot = engine.snapshot();
        match args.run_mode {
            RunMode::Backtest => {
                // final report, same shape the python backtester printed on exit
                println!("{:=<60}", "");
                println!("BACKTEST RESULTS");
                println!("{:=<60}", "");
                println!("{snapshot}");
                println!("open positions: {}", engine.positions().len());
                println!("{:=<60}", "");
            }
            RunMode::Live => {
                info!(
                    trades = engine.total_trades(),
                    open_positions = engine.positions().len(),
                    pnl_usd = snapshot.total_pnl_usd,
                    "live session closed"
                );
            }
        }
        snapshot
    }
}

async fn ingest_loop(
    mut receiver: OrderReceiver,
    producer: OrderProducer,
    timeout: tokio::time::Duration,
    shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            info!("ingest loop stopping");
            return;
        }
        let Some(frame) = receiver.recv_timeout(timeout).await else {
            continue;
        };
        let intent = match codec::decode_intent(&frame) {
            Ok(intent) => intent,
            Err(e) => {
                warn!(%e, "discarding malformed intent");
                INTENTS_DROPPED.with_label_values(&["malformed"]).inc();
                continue;
            }
        };
        INTENTS_RECEIVED.inc();
        match producer.enqueue(intent).await {
            Ok(()) => QUEUE_DEPTH.set(producer.occupancy() as i64),
            Err(e) => {
                warn!(%e, "order queue full, intent dropped");
                INTENTS_DROPPED.with_label_values(&["queue_full"]).inc();
            }
        }
    }
}

async fn process_loop(
    mut consumer: OrderConsumer,
    mut engine: ExecutionEngine,
    record_tx: Option<mpsc::Sender<Event>>,
    shutdown: watch::Receiver<bool>,
) -> ExecutionEngine {
    loop {
        if *shutdown.borrow() {
            info!("process loop stopping");
            return engine;
        }
        let Some(intent) = consumer.dequeue().await else {
            continue;
        };
        QUEUE_DEPTH.set(consumer.occupancy() as i64);
        match engine.execute(&intent).await {
            Ok(maybe_record) => {
                INTENTS_EXECUTED.inc();
                if let (Some(record), Some(tx)) = (maybe_record, &record_tx) {
                    if tx.try_send(Event::Trade(record)).is_err() {
                        warn!("trade sink saturated, record not persisted");
                    }
                }
            }
            Err(e) => {
                EXEC_ERRORS.inc();
                warn!(
                    %e,
                    side = intent.order_type.as_str(),
                    symbol = %intent.symbol,
                    price = intent.price,
                    strategy = %intent.strategy_name,
                    "execution failed, continuing"
                );
            }
        }
    }
}
