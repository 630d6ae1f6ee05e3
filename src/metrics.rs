// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Gauge, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Quote pipeline --------
pub static QUOTES_PUBLISHED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("quotes_published_total", "quotes fanned out").unwrap());

pub static QUOTE_SUBSCRIBERS: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("quote_subscribers", "connected quote subscribers").unwrap());

// -------- Order pipeline --------
pub static INTENTS_RECEIVED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("order_intents_received_total", "intents decoded off the wire").unwrap()
});

pub static INTENTS_DROPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "order_intents_dropped_total",
            "intents discarded (labels: reason = malformed|queue_full)",
        ),
        &["reason"],
    )
    .unwrap()
});

pub static INTENTS_EXECUTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("order_intents_executed_total", "intents applied by the engine").unwrap()
});

pub static EXEC_ERRORS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("exec_errors_total", "failed exchange calls").unwrap());

pub static QUEUE_DEPTH: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("order_queue_depth", "queued intents").unwrap());

// -------- Positions & PnL --------
pub static OPEN_POSITIONS: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("open_positions", "tracked open positions").unwrap());

pub static TRADES_CLOSED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("trades_closed_total", "completed round trips").unwrap());

pub static PNL_USD_TOTAL: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("pnl_usd_total", "realized PnL (quote currency)").unwrap());

pub fn init() {
    // Register all metrics to the custom registry
    for m in [
        REGISTRY.register(Box::new(QUOTES_PUBLISHED.clone())),
        REGISTRY.register(Box::new(QUOTE_SUBSCRIBERS.clone())),
        REGISTRY.register(Box::new(INTENTS_RECEIVED.clone())),
        REGISTRY.register(Box::new(INTENTS_DROPPED.clone())),
        REGISTRY.register(Box::new(INTENTS_EXECUTED.clone())),
        REGISTRY.register(Box::new(EXEC_ERRORS.clone())),
        REGISTRY.register(Box::new(QUEUE_DEPTH.clone())),
        REGISTRY.register(Box::new(OPEN_POSITIONS.clone())),
        REGISTRY.register(Box::new(TRADES_CLOSED.clone())),
        REGISTRY.register(Box::new(PNL_USD_TOTAL.clone())),
    ] {
        let _ = m;
    }
}

// Encode all metrics in Prometheus text format
fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

// Serve one HTTP request (GET / or /metrics), tiny HTTP 1.1 responder
fn handle_client(mut stream: TcpStream) {
    // Read a bit to consume headers (no full parse)
    let mut _req_buf = [0u8; 1024];
    let _ = stream.read(&mut _req_buf);

    let body = encode_metrics();
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );

    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(&body);
    let _ = stream.flush();
}

// Run the metrics server in a dedicated OS thread (keeps Tokio runtime clean)
pub async fn serve_metrics(port: u16) {
    thread::spawn(move || {
        let addr = format!("0.0.0.0:{port}");
        let listener = match TcpListener::bind(&addr) {
            Ok(l) => l,
            Err(e) => {
                eprintln!("metrics bind {addr} failed: {e}");
                return;
            }
        };
        eprintln!("metrics listening on http://{addr}/ (and /metrics)");

        for conn in listener.incoming() {
            match conn {
                Ok(stream) => handle_client(stream),
                Err(e) => eprintln!("metrics accept error: {e}"),
            }
        }
    });
}
