// ===============================
// src/bin/trade_daemon.rs
// ===============================
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};

use tradepipe::config;
use tradepipe::daemon::Daemon;
use tradepipe::exchange::BinanceClient;
use tradepipe::metrics;

#[tokio::main]
async fn main() {
    // ---- Logging ----
    tracing_subscriber::fmt().with_env_filter("info").init();

    // ---- Config ----
    let args = config::load();

    // ---- Metrics ----
    metrics::init();
    tokio::spawn(metrics::serve_metrics(args.metrics_port));

    info!(
        mode = args.run_mode.as_str(),
        order_addr = %args.order_addr,
        wire = args.quote_wire.as_str(),
        queue_capacity = args.queue_capacity,
        timeout_ms = args.op_timeout_ms,
        notional = args.notional_usd,
        record_file = ?args.record_file,
        "startup config"
    );

    let exchange = Arc::new(BinanceClient::new(
        args.binance_rest_url.clone(),
        args.binance_api_key.clone(),
        args.binance_api_secret.clone(),
        args.binance_recv_window,
    ));

    // A daemon that cannot bind its channel cannot perform its function.
    let daemon = match Daemon::bind(args, exchange).await {
        Ok(d) => d,
        Err(e) => {
            error!(%e, "daemon startup failed");
            std::process::exit(1);
        }
    };

    // The only cancellation primitive: process-level shutdown.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    daemon.run_until(shutdown_rx).await;
}
