//! Fan-out of admitted records to live subscribers
//!
//! Each subscriber gets its own bounded queue. [`BroadcastChannel::broadcast`] encodes a
//! record once and `try_send`s the frame into every queue, so it never waits on a socket:
//! a subscriber whose queue is full misses that frame, a subscriber whose queue is closed
//! is pruned, and everyone else is unaffected.

use crate::errors::{RelayError, RelayResult, SafeReadLock, SafeWriteLock};
use crate::log_record::LogRecord;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

const RESOURCE: &str = "subscriber_registry";

/// Event name carried by every relayed record.
pub const LOG_UPDATE_EVENT: &str = "log-update";
/// Event name of the greeting sent when a subscriber connects.
pub const CONNECTED_EVENT: &str = "connected";

/// An encoded outbound text frame, shared by every queue it is pushed into.
pub type Frame = Arc<str>;

/// Identity of one subscriber connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    event: &'a str,
    data: &'a T,
}

/// Encode `data` as `{"event": ..., "data": ...}`.
pub fn encode_frame<T: Serialize>(event: &str, data: &T) -> RelayResult<Frame> {
    let text = serde_json::to_string(&Envelope { event, data })
        .map_err(|e| RelayError::serialization(format!("encode {event} frame"), e))?;
    Ok(Arc::from(text))
}

/// What one `broadcast` call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Subscribers whose queue was full; they miss this record.
    pub dropped: usize,
    /// Subscribers found disconnected and removed.
    pub pruned: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BroadcastStats {
    pub subscribers: usize,
    pub delivered_total: u64,
    pub dropped_total: u64,
    pub pruned_total: u64,
}

/// Registry of live subscribers plus the fan-out operation.
pub struct BroadcastChannel {
    subscribers: RwLock<HashMap<ConnectionId, mpsc::Sender<Frame>>>,
    queue_capacity: usize,
    delivered: AtomicU64,
    dropped: AtomicU64,
    pruned: AtomicU64,
}

impl BroadcastChannel {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            queue_capacity: queue_capacity.max(1),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            pruned: AtomicU64::new(0),
        }
    }

    /// Add a subscriber. It receives every record broadcast from now on until the
    /// returned [`Subscription`] is dropped or [`BroadcastChannel::unregister`]ed.
    pub fn register(self: &Arc<Self>) -> RelayResult<Subscription> {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let id = ConnectionId::new();
        self.subscribers.safe_write(RESOURCE)?.insert(id, tx);
        Ok(Subscription {
            id,
            frames: rx,
            channel: Arc::clone(self),
        })
    }

    /// Remove a subscriber. Returns false if it was already gone.
    pub fn unregister(&self, id: ConnectionId) -> RelayResult<bool> {
        Ok(self.subscribers.safe_write(RESOURCE)?.remove(&id).is_some())
    }

    pub fn subscriber_count(&self) -> RelayResult<usize> {
        Ok(self.subscribers.safe_read(RESOURCE)?.len())
    }

    /// Push a record to every registered subscriber.
    pub fn broadcast(&self, record: &LogRecord) -> RelayResult<BroadcastReport> {
        let frame = encode_frame(LOG_UPDATE_EVENT, record)?;
        self.broadcast_frame(&frame)
    }

    pub fn broadcast_frame(&self, frame: &Frame) -> RelayResult<BroadcastReport> {
        let mut report = BroadcastReport::default();
        let mut closed = Vec::new();

        {
            let subscribers = self.subscribers.safe_read(RESOURCE)?;
            for (id, queue) in subscribers.iter() {
                match queue.try_send(Arc::clone(frame)) {
                    Ok(()) => report.delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        report.dropped += 1;
                        tracing::warn!(connection_id = %id, "subscriber queue full, record skipped");
                    }
                    Err(TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self.subscribers.safe_write(RESOURCE)?;
            for id in closed {
                if subscribers.remove(&id).is_some() {
                    report.pruned += 1;
                    tracing::debug!(connection_id = %id, "pruned closed subscriber");
                }
            }
        }

        self.delivered.fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.dropped.fetch_add(report.dropped as u64, Ordering::Relaxed);
        self.pruned.fetch_add(report.pruned as u64, Ordering::Relaxed);
        Ok(report)
    }

    #[cfg(test)]
    pub(crate) fn poison_registry(&self) {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = self.subscribers.write();
            panic!("subscriber registry poisoned");
        }));
    }

    pub fn stats(&self) -> RelayResult<BroadcastStats> {
        Ok(BroadcastStats {
            subscribers: self.subscriber_count()?,
            delivered_total: self.delivered.load(Ordering::Relaxed),
            dropped_total: self.dropped.load(Ordering::Relaxed),
            pruned_total: self.pruned.load(Ordering::Relaxed),
        })
    }
}

/// Handle for one registered subscriber. Dropping it unregisters the subscriber.
pub struct Subscription {
    id: ConnectionId,
    frames: mpsc::Receiver<Frame>,
    channel: Arc<BroadcastChannel>,
}

impl Subscription {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Next queued frame; `None` once the subscriber has been removed from the registry.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.frames.recv().await
    }

    /// Next queued frame without waiting.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.frames.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Err(e) = self.channel.unregister(self.id) {
            tracing::error!(connection_id = %self.id, error = %e, "failed to unregister subscriber");
        }
    }
}
