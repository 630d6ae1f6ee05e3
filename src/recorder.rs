// ===============================
// src/recorder.rs
// ===============================
//
// JSONL persistence sink. One Event per line, appended; buffered writes with
// a periodic flush and a count-based flush. A failed write triggers one
// reopen-and-retry, then the event is dropped; the sink never stalls or
// kills the process loop feeding it.
//
// Activated by RECORD_FILE=/path/to/trades.jsonl (see config.rs).
//
use std::path::Path;
use tokio::{
    fs::{self, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{error, info};

use crate::domain::Event;

async fn open_writer(path: &str) -> Option<BufWriter<tokio::fs::File>> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = fs::create_dir_all(parent).await {
                error!(?e, %path, "recorder: create_dir_all failed");
            }
        }
    }
    match OpenOptions::new().create(true).append(true).open(path).await {
        Ok(file) => Some(BufWriter::new(file)),
        Err(e) => {
            error!(?e, %path, "recorder: open failed");
            None
        }
    }
}

pub async fn run(mut rx: mpsc::Receiver<Event>, path: String) {
    info!(%path, "recorder: started");
    let mut writer = open_writer(&path).await;

    let mut tick = interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut since_last_flush: u32 = 0;
    const FLUSH_EVERY_N_EVENTS: u32 = 1000;

    loop {
        tokio::select! {
            maybe_ev = rx.recv() => {
                match maybe_ev {
                    Some(ev) => {
                        let mut line = match serde_json::to_string(&ev) {
                            Ok(s) => s,
                            Err(e) => {
                                error!(?e, "recorder: serialize error, skip event");
                                continue;
                            }
                        };
                        line.push('\n');

                        if writer.is_none() {
                            writer = open_writer(&path).await;
                        }
                        let Some(w) = writer.as_mut() else {
                            error!("recorder: no writer, drop event");
                            continue;
                        };

                        if let Err(e) = w.write_all(line.as_bytes()).await {
                            error!(?e, "recorder: write failed, attempting reopen");
                            writer = open_writer(&path).await;
                            if let Some(w) = writer.as_mut() {
                                if let Err(e2) = w.write_all(line.as_bytes()).await {
                                    error!(?e2, "recorder: write failed again after reopen, drop event");
                                    continue;
                                }
                            } else {
                                continue;
                            }
                        }

                        since_last_flush += 1;
                        if since_last_flush >= FLUSH_EVERY_N_EVENTS {
                            if let Some(w) = writer.as_mut() {
                                let _ = w.flush().await;
                            }
                            since_last_flush = 0;
                        }
                    }
                    None => {
                        if let Some(w) = writer.as_mut() {
                            let _ = w.flush().await;
                        }
                        info!("recorder: channel closed, stopped");
                        break;
                    }
                }
            }

            _ = tick.tick() => {
                if let Some(w) = writer.as_mut() {
                    let _ = w.flush().await;
                }
                since_last_flush = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TradeRecord;

    fn record() -> TradeRecord {
        TradeRecord {
            timestamp: 1_700_000_000.0,
            strategy_name: "ema_9_25".to_string(),
            symbol: "BTCUSDT".to_string(),
            order_type: "CLOSE_LONG".to_string(),
            entry_price: 100.0,
            amount: 1.0,
            exit_price: 105.0,
            exit_time: 1_700_000_060.0,
            pnl_pct: 5.0,
            pnl_usd: 5.0,
            order_id: None,
            fee: None,
            exchange: None,
            status: None,
        }
    }

    #[tokio::test]
    async fn writes_one_json_line_per_event() {
        let dir = std::env::temp_dir().join(format!("recorder_test_{}", std::process::id()));
        let path = dir.join("trades.jsonl");
        let path_str = path.to_string_lossy().to_string();

        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(run(rx, path_str.clone()));
        tx.send(Event::Trade(record())).await.unwrap();
        tx.send(Event::Note("shutdown".to_string())).await.unwrap();
        drop(tx);
        task.await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let ev: Event = serde_json::from_str(lines[0]).unwrap();
        match ev {
            Event::Trade(t) => assert_eq!(t.symbol, "BTCUSDT"),
            other => panic!("unexpected event: {other:?}"),
        }
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
