// ===============================
// src/bin/quote_publisher.rs
// ===============================
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use tradepipe::codec;
use tradepipe::config::{self, FeedMode};
use tradepipe::domain::Quote;
use tradepipe::exchange::BinanceClient;
use tradepipe::feed;
use tradepipe::metrics::{self, QUOTES_PUBLISHED, QUOTE_SUBSCRIBERS};
use tradepipe::transport::QuotePublisher;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let args = config::load();

    metrics::init();
    tokio::spawn(metrics::serve_metrics(args.metrics_port));

    info!(
        feed = args.feed_mode.as_str(),
        symbol = %args.symbol,
        quote_addr = %args.quote_addr,
        wire = args.quote_wire.as_str(),
        interval_ms = args.publish_interval_ms,
        "startup config"
    );

    let publisher = match QuotePublisher::bind(&args.quote_addr).await {
        Ok(p) => p,
        Err(e) => {
            error!(%e, "publisher startup failed");
            std::process::exit(1);
        }
    };

    let (quote_tx, mut quote_rx) = mpsc::channel::<Quote>(1024);
    match args.feed_mode {
        FeedMode::Mock => {
            tokio::spawn(feed::run_mock(
                quote_tx,
                args.symbol.clone(),
                args.publish_interval_ms,
            ));
        }
        FeedMode::BinanceWs => {
            tokio::spawn(feed::run_binance_ws(
                quote_tx,
                args.symbol.clone(),
                args.binance_ws_url.clone(),
            ));
        }
        FeedMode::BinanceRest => {
            let exchange = Arc::new(BinanceClient::new(
                args.binance_rest_url.clone(),
                args.binance_api_key.clone(),
                args.binance_api_secret.clone(),
                args.binance_recv_window,
            ));
            tokio::spawn(feed::run_rest_poll(
                quote_tx,
                exchange,
                args.symbol.clone(),
                args.publish_interval_ms,
            ));
        }
    }

    loop {
        tokio::select! {
            maybe_quote = quote_rx.recv() => {
                let Some(quote) = maybe_quote else {
                    warn!("feed closed, publisher stopping");
                    break;
                };
                match codec::encode_quote(&quote, args.quote_wire) {
                    Ok(frame) => {
                        publisher.publish(frame);
                        QUOTES_PUBLISHED.inc();
                        QUOTE_SUBSCRIBERS.set(publisher.subscriber_count() as i64);
                    }
                    Err(e) => warn!(%e, "quote encode failed, skipped"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }
}
