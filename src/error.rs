// ===============================
// src/error.rs
// ===============================
use thiserror::Error;

/// Wire payload does not match the expected shape/schema.
/// Policy: log and discard the single message, never crash the loop.
#[derive(Debug, Error)]
#[error("malformed message: {0}")]
pub struct MalformedMessage(pub String);

/// Transport faults. Bind/connect failures at startup are the only fatal
/// class in the whole pipeline; everything else is per-message.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("bind {addr} failed: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("connect {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame of {got} bytes exceeds maximum {max}")]
    Oversized { got: usize, max: usize },
    #[error("peer closed")]
    Closed,
}

/// Exchange call failed (network, auth, rejected order, insufficient funds).
/// The engine logs with order context and continues; never exits the process.
#[derive(Debug, Error)]
#[error("exchange error: {0}")]
pub struct ExchangeError(pub String);

impl ExchangeError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Bounded queue at capacity on enqueue. Policy: drop the item and log
/// occupancy; no retry (a stalled ingest loop would shed inbound messages
/// at the transport instead, which is worse).
#[derive(Debug, Error)]
#[error("order queue full ({occupancy}/{capacity})")]
pub struct QueueFull {
    pub occupancy: usize,
    pub capacity: usize,
}
