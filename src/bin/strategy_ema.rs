// ===============================
// src/bin/strategy_ema.rs
// ===============================
use tracing::{error, info};

use tradepipe::config;
use tradepipe::strategy::{self, EmaCrossState};
use tradepipe::transport::{OrderSink, QuoteSubscriber};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let args = config::load();

    info!(
        strategy = %args.strategy_name,
        symbol = %args.symbol,
        quote_addr = %args.quote_addr,
        order_addr = %args.order_addr,
        ema_fast = args.ema_fast,
        ema_slow = args.ema_slow,
        "startup config"
    );

    let quotes = match QuoteSubscriber::connect(&args.quote_addr).await {
        Ok(s) => s,
        Err(e) => {
            error!(%e, "quote subscribe failed");
            std::process::exit(1);
        }
    };
    let orders = match OrderSink::connect(&args.order_addr).await {
        Ok(s) => s,
        Err(e) => {
            error!(%e, "order sink connect failed");
            std::process::exit(1);
        }
    };

    let state = EmaCrossState::new(
        args.symbol.clone(),
        args.strategy_name.clone(),
        args.ema_fast,
        args.ema_slow,
    );

    tokio::select! {
        _ = strategy::run(quotes, orders, args.quote_wire, state) => {}
        _ = tokio::signal::ctrl_c() => info!("strategy stopped"),
    }
}
