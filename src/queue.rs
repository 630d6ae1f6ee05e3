// ===============================
// src/queue.rs
// ===============================
//
// Bounded FIFO between the ingest and process loops. Enqueue blocks up to a
// short timeout when full, then fails with QueueFull (caller drops and logs,
// never retries). Dequeue blocks up to the same timeout when empty and
// returns None, which the process loop treats as a normal poll, not a fault.
//
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::time::{timeout, Duration};

use crate::domain::OrderIntent;
use crate::error::QueueFull;

pub const DEFAULT_CAPACITY: usize = 1000;
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_millis(1000);

pub fn bounded(capacity: usize, op_timeout: Duration) -> (OrderProducer, OrderConsumer) {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    let depth = Arc::new(AtomicUsize::new(0));
    (
        OrderProducer {
            tx,
            depth: depth.clone(),
            capacity,
            op_timeout,
        },
        OrderConsumer {
            rx,
            depth,
            op_timeout,
        },
    )
}

/// Ingest-side handle. Cloneable, but the daemon runs a single ingest loop.
#[derive(Clone)]
pub struct OrderProducer {
    tx: mpsc::Sender<OrderIntent>,
    depth: Arc<AtomicUsize>,
    capacity: usize,
    op_timeout: Duration,
}

impl OrderProducer {
    pub async fn enqueue(&self, intent: OrderIntent) -> Result<(), QueueFull> {
        // Count up before the send so the consumer's decrement can never
        // observe the item ahead of the increment.
        self.depth.fetch_add(1, Ordering::Relaxed);
        match self.tx.send_timeout(intent, self.op_timeout).await {
            Ok(()) => Ok(()),
            // Closed only happens mid-shutdown; the message is dropped either way.
            Err(SendTimeoutError::Timeout(_)) | Err(SendTimeoutError::Closed(_)) => {
                self.depth.fetch_sub(1, Ordering::Relaxed);
                Err(QueueFull {
                    occupancy: self.occupancy().min(self.capacity),
                    capacity: self.capacity,
                })
            }
        }
    }

    pub fn occupancy(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Process-side handle. Single consumer by construction (`&mut self`), which
/// is what lets the execution engine skip internal locking.
pub struct OrderConsumer {
    rx: mpsc::Receiver<OrderIntent>,
    depth: Arc<AtomicUsize>,
    op_timeout: Duration,
}

impl OrderConsumer {
    pub fn occupancy(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    /// None on timeout or when every producer is gone; both mean "poll again
    /// or notice shutdown", not an error.
    pub async fn dequeue(&mut self) -> Option<OrderIntent> {
        match timeout(self.op_timeout, self.rx.recv()).await {
            Ok(Some(intent)) => {
                self.depth.fetch_sub(1, Ordering::Relaxed);
                Some(intent)
            }
            Ok(None) => None,
            Err(_) => None,
        }
    }
}
