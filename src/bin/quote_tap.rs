// ===============================
// src/bin/quote_tap.rs
// ===============================
//
// Diagnostic subscriber: attach to any quote channel and print what it
// carries.
//
use chrono::Local;
use clap::Parser;
use tracing::warn;

use tradepipe::codec::{self, QuoteWire};
use tradepipe::transport::QuoteSubscriber;

#[derive(Parser)]
#[command(name = "quote_tap", about = "Subscribe to a quote channel and print quotes.")]
struct Cli {
    /// Publisher address to connect to
    #[arg(long, default_value = "127.0.0.1:5000")]
    addr: String,

    /// Wire shape on this channel: bid_ask or bid_ask_ts
    #[arg(long, default_value = "bid_ask_ts")]
    wire: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let cli = Cli::parse();

    let Some(wire) = QuoteWire::parse(&cli.wire) else {
        eprintln!("unknown wire shape {:?} (bid_ask | bid_ask_ts)", cli.wire);
        std::process::exit(2);
    };

    let mut sub = match QuoteSubscriber::connect(&cli.addr).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("connect failed: {e}");
            std::process::exit(1);
        }
    };

    println!("Listening for quotes... on {}", cli.addr);
    println!("{:-<40}", "");

    loop {
        let frame = match sub.recv().await {
            Ok(f) => f,
            Err(e) => {
                eprintln!("feed closed: {e}");
                break;
            }
        };
        match codec::decode_quote(&frame, wire) {
            Ok(q) => {
                let ts = Local::now().format("%Y-%m-%d %H:%M:%S");
                println!("[{ts}] {}: bid={:.2} ask={:.2}", q.symbol, q.bid, q.ask);
            }
            Err(e) => warn!(%e, "skipping malformed quote"),
        }
    }
}
