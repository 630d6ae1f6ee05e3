// ===============================
// src/transport.rs
// ===============================
//
// Plain-TCP carriers for the two channel roles, with u32 big-endian length
// prefix framing:
// - Quote channel: one publisher binds, many subscribers connect; fan-out is
//   at-most-once, no replay, and a slow subscriber loses frames instead of
//   slowing the feed.
// - Order channel: many strategy sinks connect, one daemon receiver binds;
//   fan-in is at-most-once and the receive side is timeout-bounded so the
//   ingest loop can poll for shutdown.
//
// Bind/connect failures surface as errors for the caller to treat as fatal
// at startup. Everything after that is per-connection and non-fatal.
//
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

use crate::error::TransportError;

pub const MAX_FRAME: usize = 64 * 1024;

/// Per-subscriber outbound buffer (frames). A subscriber further behind than
/// this loses frames, not the publisher its cadence.
const SUB_BUFFER: usize = 1024;
/// Strategy-side outbound buffer while the daemon link is down or slow.
const SINK_BUFFER: usize = 1024;
/// Fan-in buffer between connection readers and the ingest loop.
const RECV_BUFFER: usize = 1024;

async fn write_frame<W: AsyncWrite + Unpin>(
    stream: &mut W,
    payload: &[u8],
) -> Result<(), TransportError> {
    if payload.len() > MAX_FRAME {
        return Err(TransportError::Oversized {
            got: payload.len(),
            max: MAX_FRAME,
        });
    }
    stream.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    stream.write_all(payload).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_frame<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Vec<u8>, TransportError> {
    let mut len_bytes = [0u8; 4];
    if let Err(e) = stream.read_exact(&mut len_bytes).await {
        return Err(if e.kind() == std::io::ErrorKind::UnexpectedEof {
            TransportError::Closed
        } else {
            TransportError::Io(e)
        });
    }
    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME {
        return Err(TransportError::Oversized {
            got: len,
            max: MAX_FRAME,
        });
    }
    let mut buf = vec![0u8; len];
    if let Err(e) = stream.read_exact(&mut buf).await {
        return Err(if e.kind() == std::io::ErrorKind::UnexpectedEof {
            TransportError::Closed
        } else {
            TransportError::Io(e)
        });
    }
    Ok(buf)
}

// ---------------------------------------------------------------------------
// Quote channel, publisher side
// ---------------------------------------------------------------------------

pub struct QuotePublisher {
    local_addr: SocketAddr,
    subs: Arc<Mutex<Vec<mpsc::Sender<Arc<[u8]>>>>>,
}

impl QuotePublisher {
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::Bind {
                addr: addr.to_string(),
                source: e,
            })?;
        let local_addr = listener.local_addr().map_err(TransportError::Io)?;
        info!(%local_addr, "quote publisher listening");

        let subs: Arc<Mutex<Vec<mpsc::Sender<Arc<[u8]>>>>> = Arc::new(Mutex::new(Vec::new()));
        let subs_accept = subs.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        info!(%peer, "subscriber connected");
                        let _ = stream.set_nodelay(true);
                        let (tx, rx) = mpsc::channel::<Arc<[u8]>>(SUB_BUFFER);
                        subs_accept.lock().unwrap().push(tx);
                        tokio::spawn(subscriber_writer(stream, peer, rx));
                    }
                    Err(e) => {
                        warn!(?e, "quote accept error");
                        sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        });

        Ok(Self { local_addr, subs })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn subscriber_count(&self) -> usize {
        self.subs.lock().unwrap().len()
    }

    /// Fan one encoded frame out to every live subscriber. Returns how many
    /// buffers took it; a saturated subscriber just misses this frame.
    pub fn publish(&self, frame: Vec<u8>) -> usize {
        let frame: Arc<[u8]> = frame.into();
        let mut delivered = 0;
        let mut subs = self.subs.lock().unwrap();
        subs.retain(|tx| match tx.try_send(frame.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("slow subscriber, frame dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        delivered
    }
}

async fn subscriber_writer(
    mut stream: TcpStream,
    peer: SocketAddr,
    mut rx: mpsc::Receiver<Arc<[u8]>>,
) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = write_frame(&mut stream, &frame).await {
            info!(%peer, %e, "subscriber dropped");
            return;
        }
    }
}

// ---------------------------------------------------------------------------
// Quote channel, subscriber side
// ---------------------------------------------------------------------------

pub struct QuoteSubscriber {
    stream: TcpStream,
}

impl QuoteSubscriber {
    pub async fn connect(addr: &str) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TransportError::Connect {
                addr: addr.to_string(),
                source: e,
            })?;
        let _ = stream.set_nodelay(true);
        info!(%addr, "subscribed to quote feed");
        Ok(Self { stream })
    }

    pub async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        read_frame(&mut self.stream).await
    }

    /// Ok(None) on timeout; a normal poll outcome.
    pub async fn recv_timeout(&mut self, dur: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        match timeout(dur, read_frame(&mut self.stream)).await {
            Ok(res) => res.map(Some),
            Err(_) => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Order channel, strategy side (push)
// ---------------------------------------------------------------------------

pub struct OrderSink {
    tx: mpsc::Sender<Vec<u8>>,
}

impl OrderSink {
    /// The first connect is startup and its failure is the caller's fatal
    /// error; once up, a lost daemon link is re-dialed with backoff while
    /// intents buffer (and overflow to the floor) on this side.
    pub async fn connect(addr: &str) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TransportError::Connect {
                addr: addr.to_string(),
                source: e,
            })?;
        let _ = stream.set_nodelay(true);
        info!(%addr, "order sink connected");

        let (tx, rx) = mpsc::channel::<Vec<u8>>(SINK_BUFFER);
        tokio::spawn(sink_writer(stream, addr.to_string(), rx));
        Ok(Self { tx })
    }

    /// Never blocks the signal loop: false means the outbound buffer is full
    /// or the writer is gone, and the caller logs-and-continues.
    pub fn try_send(&self, frame: Vec<u8>) -> bool {
        self.tx.try_send(frame).is_ok()
    }
}

async fn sink_writer(stream: TcpStream, addr: String, mut rx: mpsc::Receiver<Vec<u8>>) {
    let mut stream = Some(stream);
    let mut attempt: u32 = 0;
    loop {
        let mut s = match stream.take() {
            Some(s) => s,
            None => {
                // Re-dial with capped exponential backoff.
                attempt = attempt.saturating_add(1);
                let backoff = 500u64.saturating_mul(1 << attempt.min(6));
                sleep(Duration::from_millis(backoff)).await;
                match TcpStream::connect(&addr).await {
                    Ok(s) => {
                        info!(%addr, "order sink reconnected");
                        attempt = 0;
                        let _ = s.set_nodelay(true);
                        s
                    }
                    Err(e) => {
                        warn!(%addr, ?e, "order sink reconnect failed");
                        continue;
                    }
                }
            }
        };
        loop {
            match rx.recv().await {
                Some(frame) => {
                    if let Err(e) = write_frame(&mut s, &frame).await {
                        warn!(%addr, %e, "order sink write failed, will reconnect");
                        break;
                    }
                }
                None => return,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Order channel, daemon side (pull / fan-in)
// ---------------------------------------------------------------------------

pub struct OrderReceiver {
    local_addr: SocketAddr,
    rx: mpsc::Receiver<Vec<u8>>,
}

impl OrderReceiver {
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::Bind {
                addr: addr.to_string(),
                source: e,
            })?;
        let local_addr = listener.local_addr().map_err(TransportError::Io)?;
        info!(%local_addr, "order receiver listening");

        let (tx, rx) = mpsc::channel::<Vec<u8>>(RECV_BUFFER);
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        info!(%peer, "strategy connected");
                        let _ = stream.set_nodelay(true);
                        tokio::spawn(fanin_reader(stream, peer, tx.clone()));
                    }
                    Err(e) => {
                        warn!(?e, "order accept error");
                        sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        });

        Ok(Self { local_addr, rx })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// None on timeout so the ingest loop can check for shutdown instead of
    /// blocking forever.
    pub async fn recv_timeout(&mut self, dur: Duration) -> Option<Vec<u8>> {
        match timeout(dur, self.rx.recv()).await {
            Ok(frame) => frame,
            Err(_) => None,
        }
    }
}

async fn fanin_reader(mut stream: TcpStream, peer: SocketAddr, tx: mpsc::Sender<Vec<u8>>) {
    loop {
        match read_frame(&mut stream).await {
            Ok(frame) => {
                if tx.send(frame).await.is_err() {
                    return;
                }
            }
            Err(TransportError::Closed) => {
                info!(%peer, "strategy disconnected");
                return;
            }
            Err(e) => {
                // Framing is unrecoverable on a broken stream; cut this peer,
                // the channel itself keeps serving the others.
                warn!(%peer, %e, "dropping strategy connection");
                return;
            }
        }
    }
}
