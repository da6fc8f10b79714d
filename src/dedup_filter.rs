//! Duplicate suppression over a trailing time window
//!
//! Broker redelivery (rebalances, restarts before an offset commit) can hand the relay
//! the same event more than once. The filter remembers the identity of every record it
//! admitted for one window and refuses repeats until that identity expires.
//!
//! Every key lives exactly one window. Because the window never changes, keys expire in
//! the order they were admitted, so a FIFO of `(expires_at, key)` gives the same removal
//! times as one timer per key. Expired keys are evicted before each admission decision
//! and by a periodic sweeper that keeps memory flat when traffic stops.

use crate::errors::{RelayResult, SafeLock};
use crate::log_record::LogRecord;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const RESOURCE: &str = "dedup_filter";

/// Identity of a logical event for duplicate detection.
///
/// A non-empty `traceId` wins. Without one the message text and the normalized
/// timestamp are concatenated; two distinct events sharing both collide, and the
/// later one is dropped.
pub fn dedup_key(record: &LogRecord) -> String {
    match record.trace_id() {
        Some(trace_id) if !trace_id.is_empty() => trace_id.to_string(),
        _ => format!("{}{}", record.message(), record.timestamp_string()),
    }
}

#[derive(Default)]
struct DedupState {
    /// Key to the instant its window closes.
    seen: HashMap<String, Instant>,
    expiries: VecDeque<(Instant, String)>,
}

impl DedupState {
    fn evict_expired(&mut self, now: Instant) -> usize {
        let mut evicted = 0;
        while let Some((expires_at, _)) = self.expiries.front() {
            if *expires_at > now {
                break;
            }
            if let Some((expires_at, key)) = self.expiries.pop_front() {
                // A forgotten and re-admitted key leaves a stale entry behind; skip it.
                if self.seen.get(&key) == Some(&expires_at) {
                    self.seen.remove(&key);
                    evicted += 1;
                }
            }
        }
        evicted
    }
}

/// In-memory dedup window
pub struct DedupFilter {
    state: Mutex<DedupState>,
    window: Duration,
    admitted: AtomicU64,
    duplicates: AtomicU64,
}

impl DedupFilter {
    pub fn new(window: Duration) -> Self {
        Self {
            state: Mutex::new(DedupState::default()),
            window,
            admitted: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Returns true the first time a record's identity is seen within the window.
    pub fn admit(&self, record: &LogRecord) -> RelayResult<bool> {
        let key = dedup_key(record);
        let mut state = self.state.safe_lock(RESOURCE)?;
        // Read the clock under the lock so expiry instants stay in queue order.
        let now = Instant::now();
        Ok(self.admit_key(&mut state, key, now))
    }

    /// Same as [`DedupFilter::admit`] against a caller-supplied clock. Callers must
    /// pass non-decreasing instants.
    pub fn admit_at(&self, record: &LogRecord, now: Instant) -> RelayResult<bool> {
        let key = dedup_key(record);
        let mut state = self.state.safe_lock(RESOURCE)?;
        Ok(self.admit_key(&mut state, key, now))
    }

    fn admit_key(&self, state: &mut DedupState, key: String, now: Instant) -> bool {
        state.evict_expired(now);

        if state.seen.contains_key(&key) {
            self.duplicates.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let expires_at = now + self.window;
        state.seen.insert(key.clone(), expires_at);
        state.expiries.push_back((expires_at, key));
        self.admitted.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Withdraw an admission so a redelivery of the same record is let through again.
    /// Returns false if the record's identity was not tracked.
    pub fn forget(&self, record: &LogRecord) -> RelayResult<bool> {
        let key = dedup_key(record);
        Ok(self.state.safe_lock(RESOURCE)?.seen.remove(&key).is_some())
    }

    /// Drop every key whose window has elapsed. Returns how many were removed.
    pub fn cleanup_expired(&self) -> RelayResult<usize> {
        self.cleanup_expired_at(Instant::now())
    }

    pub fn cleanup_expired_at(&self, now: Instant) -> RelayResult<usize> {
        let mut state = self.state.safe_lock(RESOURCE)?;
        Ok(state.evict_expired(now))
    }

    /// Forget everything. Used on shutdown; pending expiries are not persisted.
    pub fn clear(&self) -> RelayResult<usize> {
        let mut state = self.state.safe_lock(RESOURCE)?;
        let dropped = state.seen.len();
        state.seen.clear();
        state.expiries.clear();
        Ok(dropped)
    }

    pub fn tracked_keys(&self) -> RelayResult<usize> {
        Ok(self.state.safe_lock(RESOURCE)?.seen.len())
    }

    pub fn stats(&self) -> RelayResult<DedupStats> {
        Ok(DedupStats {
            tracked_keys: self.tracked_keys()?,
            window_secs: self.window.as_secs(),
            admitted_total: self.admitted.load(Ordering::Relaxed),
            duplicates_total: self.duplicates.load(Ordering::Relaxed),
        })
    }

    /// Periodically evict expired keys until shutdown is signalled.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let filter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => match filter.cleanup_expired() {
                        Ok(0) => {}
                        Ok(evicted) => tracing::trace!(evicted, "dedup keys expired"),
                        Err(e) => tracing::error!(error = %e, "dedup sweep failed"),
                    },
                }
            }
            tracing::debug!("dedup sweeper stopped");
        })
    }
}

/// Statistics for the dedup filter
#[derive(Debug, Clone, serde::Serialize)]
pub struct DedupStats {
    pub tracked_keys: usize,
    pub window_secs: u64,
    pub admitted_total: u64,
    pub duplicates_total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_record::LogLevel;
    use chrono::{TimeZone, Utc};

    fn record(message: &str, trace_id: Option<&str>) -> LogRecord {
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let builder = LogRecord::builder(ts, LogLevel::Error, message, "db");
        match trace_id {
            Some(id) => builder.trace_id(id).build(),
            None => builder.build(),
        }
    }

    #[test]
    fn key_prefers_trace_id() {
        assert_eq!(dedup_key(&record("db timeout", Some("t1"))), "t1");
        assert_eq!(
            dedup_key(&record("db timeout", None)),
            "db timeout2024-01-15T00:00:00Z"
        );
        assert_eq!(
            dedup_key(&record("db timeout", Some(""))),
            "db timeout2024-01-15T00:00:00Z"
        );
    }

    #[test]
    fn repeats_inside_window_are_refused() {
        let filter = DedupFilter::new(Duration::from_secs(300));
        let start = Instant::now();
        let r = record("db timeout", Some("t1"));

        assert!(filter.admit_at(&r, start).unwrap());
        assert!(!filter.admit_at(&r, start + Duration::from_secs(1)).unwrap());
        assert!(!filter.admit_at(&r, start + Duration::from_secs(299)).unwrap());
        assert!(filter.admit_at(&r, start + Duration::from_secs(300)).unwrap());

        let stats = filter.stats().unwrap();
        assert_eq!(stats.admitted_total, 2);
        assert_eq!(stats.duplicates_total, 2);
    }

    #[test]
    fn a_duplicate_does_not_extend_the_window() {
        let filter = DedupFilter::new(Duration::from_secs(10));
        let start = Instant::now();
        let r = record("m", Some("t1"));

        assert!(filter.admit_at(&r, start).unwrap());
        assert!(!filter.admit_at(&r, start + Duration::from_secs(9)).unwrap());
        assert!(filter.admit_at(&r, start + Duration::from_secs(10)).unwrap());
    }

    #[test]
    fn keys_expire_independently() {
        let filter = DedupFilter::new(Duration::from_secs(10));
        let start = Instant::now();
        let first = record("m", Some("a"));
        let second = record("m", Some("b"));

        assert!(filter.admit_at(&first, start).unwrap());
        assert!(filter.admit_at(&second, start + Duration::from_secs(5)).unwrap());

        assert_eq!(filter.cleanup_expired_at(start + Duration::from_secs(10)).unwrap(), 1);
        assert_eq!(filter.tracked_keys().unwrap(), 1);
        assert!(filter.admit_at(&first, start + Duration::from_secs(11)).unwrap());
        assert!(!filter.admit_at(&second, start + Duration::from_secs(14)).unwrap());
        assert!(filter.admit_at(&second, start + Duration::from_secs(15)).unwrap());
    }

    #[test]
    fn distinct_trace_ids_with_same_text_both_pass() {
        let filter = DedupFilter::new(Duration::from_secs(300));
        assert!(filter.admit(&record("db timeout", Some("t1"))).unwrap());
        assert!(filter.admit(&record("db timeout", Some("t2"))).unwrap());
    }

    #[test]
    fn fallback_identity_collides_on_same_text_and_time() {
        let filter = DedupFilter::new(Duration::from_secs(300));
        assert!(filter.admit(&record("disk full", None)).unwrap());
        assert!(!filter.admit(&record("disk full", None)).unwrap());
    }

    #[test]
    fn clear_drops_pending_entries() {
        let filter = DedupFilter::new(Duration::from_secs(300));
        let r = record("m", Some("t1"));
        filter.admit(&r).unwrap();
        assert_eq!(filter.clear().unwrap(), 1);
        assert!(filter.admit(&r).unwrap());
    }

    #[test]
    fn forgotten_key_is_admitted_again_with_a_fresh_window() {
        let filter = DedupFilter::new(Duration::from_secs(10));
        let start = Instant::now();
        let r = record("m", Some("t1"));

        assert!(filter.admit_at(&r, start).unwrap());
        assert!(filter.forget(&r).unwrap());
        assert!(!filter.forget(&r).unwrap());
        assert_eq!(filter.tracked_keys().unwrap(), 0);

        assert!(filter.admit_at(&r, start + Duration::from_secs(4)).unwrap());
        // The first admission's expiry must not end the second one early.
        assert_eq!(filter.cleanup_expired_at(start + Duration::from_secs(10)).unwrap(), 0);
        assert!(!filter.admit_at(&r, start + Duration::from_secs(13)).unwrap());
        assert!(filter.admit_at(&r, start + Duration::from_secs(14)).unwrap());
    }

    #[tokio::test]
    async fn sweeper_evicts_without_traffic() {
        let filter = Arc::new(DedupFilter::new(Duration::from_millis(50)));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let sweeper = filter.spawn_sweeper(Duration::from_millis(10), shutdown_rx);

        filter.admit(&record("m", Some("t1"))).unwrap();
        assert_eq!(filter.tracked_keys().unwrap(), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(filter.tracked_keys().unwrap(), 0);

        shutdown_tx.send(()).unwrap();
        sweeper.await.unwrap();
    }
}
