//! Consumer loop
//!
//! Pulls one message at a time from a [`MessageSource`] and hands its payload to the
//! [`Relay`]. Per-message problems are logged and consumption continues; the loop only
//! ends on shutdown or when the source is exhausted.

use crate::errors::RelayResult;
use crate::relay::{Disposition, Relay};
use serde::Serialize;
use std::future::Future;
use tokio::sync::{broadcast, mpsc};

/// One broker delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMessage {
    pub partition: i32,
    pub offset: i64,
    /// `None` for tombstones.
    pub payload: Option<Vec<u8>>,
}

impl SourceMessage {
    pub fn new(partition: i32, offset: i64, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            partition,
            offset,
            payload: Some(payload.into()),
        }
    }
}

/// Where the relay reads deliveries from.
pub trait MessageSource: Send {
    /// Next delivery in the order the broker assigned it. `Some(Err(_))` is a read
    /// failure the source expects to recover from; `None` means no more messages will
    /// ever arrive.
    fn next_message(&mut self) -> impl Future<Output = Option<RelayResult<SourceMessage>>> + Send;
}

/// In-process source fed through an mpsc channel.
pub struct ChannelSource {
    rx: mpsc::Receiver<RelayResult<SourceMessage>>,
}

impl ChannelSource {
    pub fn new(capacity: usize) -> (mpsc::Sender<RelayResult<SourceMessage>>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self { rx })
    }
}

impl MessageSource for ChannelSource {
    async fn next_message(&mut self) -> Option<RelayResult<SourceMessage>> {
        self.rx.recv().await
    }
}

/// Totals for one run of the loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerSummary {
    pub processed: u64,
    pub broadcast: u64,
    pub duplicates: u64,
    pub rejected: u64,
    pub failed: u64,
    pub read_errors: u64,
}

/// Consume until shutdown or until the source ends.
pub async fn run<S: MessageSource>(
    mut source: S,
    relay: &Relay,
    mut shutdown: broadcast::Receiver<()>,
) -> ConsumerSummary {
    let mut summary = ConsumerSummary::default();

    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => {
                tracing::info!("consumer received shutdown signal, stopping");
                break;
            }
            next = source.next_message() => match next {
                None => {
                    tracing::info!("message source exhausted");
                    break;
                }
                Some(Err(e)) => {
                    summary.read_errors += 1;
                    tracing::warn!(error = %e, "broker read failed, waiting for client to recover");
                }
                Some(Ok(message)) => handle_message(relay, &message, &mut summary),
            }
        }
    }

    summary
}

fn handle_message(relay: &Relay, message: &SourceMessage, summary: &mut ConsumerSummary) {
    summary.processed += 1;
    let payload = message.payload.as_deref().unwrap_or_default();

    match relay.process(payload) {
        Disposition::Broadcast(report) => {
            summary.broadcast += 1;
            tracing::debug!(
                partition = message.partition,
                offset = message.offset,
                delivered = report.delivered,
                dropped = report.dropped,
                "record broadcast"
            );
        }
        Disposition::Duplicate => {
            summary.duplicates += 1;
            tracing::trace!(partition = message.partition, offset = message.offset, "duplicate dropped");
        }
        Disposition::Rejected(failure) => {
            summary.rejected += 1;
            tracing::warn!(
                partition = message.partition,
                offset = message.offset,
                reason = %failure,
                "invalid log record dropped"
            );
        }
        Disposition::Failed(e) => {
            summary.failed += 1;
            tracing::error!(
                partition = message.partition,
                offset = message.offset,
                error = %e,
                "record dropped after internal failure"
            );
        }
    }
}
