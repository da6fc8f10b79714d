//! The per-message pipeline: validate, deduplicate, broadcast.

use crate::broadcast_channel::{BroadcastChannel, BroadcastReport};
use crate::config::RelayConfig;
use crate::dedup_filter::DedupFilter;
use crate::errors::RelayError;
use crate::record_validator::{RecordValidator, ValidationFailure};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Outcome of pushing one payload through the relay.
#[derive(Debug)]
pub enum Disposition {
    Broadcast(BroadcastReport),
    Duplicate,
    Rejected(ValidationFailure),
    /// An internal failure (poisoned lock, encoding error) dropped this message only.
    Failed(RelayError),
}

#[derive(Debug, Default)]
pub struct RelayMetrics {
    received: AtomicU64,
    rejected: AtomicU64,
    duplicates: AtomicU64,
    broadcast: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelayMetricsSnapshot {
    pub received: u64,
    pub rejected: u64,
    pub duplicates: u64,
    pub broadcast: u64,
    pub failed: u64,
}

impl RelayMetrics {
    fn record(&self, disposition: &Disposition) {
        self.received.fetch_add(1, Ordering::Relaxed);
        let counter = match disposition {
            Disposition::Broadcast(_) => &self.broadcast,
            Disposition::Duplicate => &self.duplicates,
            Disposition::Rejected(_) => &self.rejected,
            Disposition::Failed(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RelayMetricsSnapshot {
        RelayMetricsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            broadcast: self.broadcast.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

pub struct Relay {
    validator: RecordValidator,
    dedup: Arc<DedupFilter>,
    channel: Arc<BroadcastChannel>,
    metrics: RelayMetrics,
}

impl Relay {
    pub fn new(
        validator: RecordValidator,
        dedup: Arc<DedupFilter>,
        channel: Arc<BroadcastChannel>,
    ) -> Self {
        Self {
            validator,
            dedup,
            channel,
            metrics: RelayMetrics::default(),
        }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(
            RecordValidator::new(&config.validation),
            Arc::new(DedupFilter::new(config.dedup.window())),
            Arc::new(BroadcastChannel::new(config.server.subscriber_queue_capacity)),
        )
    }

    pub fn validator(&self) -> &RecordValidator {
        &self.validator
    }

    pub fn dedup(&self) -> &Arc<DedupFilter> {
        &self.dedup
    }

    pub fn channel(&self) -> &Arc<BroadcastChannel> {
        &self.channel
    }

    pub fn metrics(&self) -> RelayMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Run one payload through validation, dedup and broadcast. Never fails: every
    /// problem is reported in the returned [`Disposition`].
    pub fn process(&self, payload: &[u8]) -> Disposition {
        let disposition = self.dispatch(payload);
        self.metrics.record(&disposition);
        disposition
    }

    fn dispatch(&self, payload: &[u8]) -> Disposition {
        let record = match self.validator.validate_bytes(payload) {
            Ok(record) => record,
            Err(failure) => return Disposition::Rejected(failure),
        };

        match self.dedup.admit(&record) {
            Ok(true) => {}
            Ok(false) => return Disposition::Duplicate,
            Err(e) => return Disposition::Failed(e),
        }

        match self.channel.broadcast(&record) {
            Ok(report) => Disposition::Broadcast(report),
            Err(e) => {
                // Nobody received it, so a redelivery must not count as a duplicate.
                if let Err(forget_err) = self.dedup.forget(&record) {
                    tracing::error!(error = %forget_err, "could not withdraw dedup admission");
                }
                Disposition::Failed(e)
            }
        }
    }
}
