use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::relay::Relay;

/// Shared state behind the HTTP and WebSocket handlers.
pub struct AppState {
    pub relay: Arc<Relay>,
    pub started_at: DateTime<Utc>,
    ready: AtomicBool,
    shutting_down: AtomicBool,
    shutdown: broadcast::Sender<()>,
}

impl AppState {
    pub fn new(relay: Arc<Relay>, shutdown: broadcast::Sender<()>) -> Self {
        Self {
            relay,
            started_at: Utc::now(),
            ready: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            shutdown,
        }
    }

    /// Ready once the broker subscription is live, not ready again once shutdown begins.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
        tracing::debug!(ready, "readiness changed");
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Subscribe, then check [`AppState::is_shutting_down`]: the flag is set before the
    /// signal is sent, so one of the two always reports a shutdown that already began.
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    /// Mark not ready, then tell every task and connection to stop. Safe to call twice.
    pub fn begin_shutdown(&self) {
        self.set_ready(false);
        if !self.shutting_down.swap(true, Ordering::SeqCst) {
            tracing::info!("shutdown started");
        }
        let _ = self.shutdown.send(());
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}
