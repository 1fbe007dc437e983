//! Sync status aggregation for UI consumption
//!
//! The aggregator derives `pending_count` from the store on demand and on a
//! fixed interval; it never maintains its own copy of pending state. The
//! `is_syncing` flag is session-local UI state toggled by the driver around a
//! drain pass and intentionally resets to false on reload - the count, not
//! the flag, is the durable signal.

use std::sync::Arc;

use tokio::sync::watch;

use crate::db::ActionQueue;
use crate::error::Result;

/// Read-only status snapshot exposed to the UI tree.
///
/// These are the only values other subsystems may read; per-action fields
/// (attempts, last error) are not part of the stable public surface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSnapshot {
    /// Connectivity signal (mutually exclusive with `is_online()`)
    pub is_offline: bool,
    /// Actions awaiting confirmed delivery
    pub pending_count: u64,
    /// Terminally failed actions awaiting manual retry/discard
    pub failed_count: u64,
    /// A drain pass is in flight (session-local, not persisted)
    pub is_syncing: bool,
    /// Local storage is unavailable; queueing is session-only this session
    pub degraded: bool,
}

impl SyncSnapshot {
    #[must_use]
    pub const fn is_online(&self) -> bool {
        !self.is_offline
    }
}

/// Derives and publishes [`SyncSnapshot`] updates
#[derive(Clone)]
pub struct StatusAggregator {
    tx: Arc<watch::Sender<SyncSnapshot>>,
}

impl StatusAggregator {
    #[must_use]
    pub fn new(initially_offline: bool) -> Self {
        let (tx, _rx) = watch::channel(SyncSnapshot {
            is_offline: initially_offline,
            ..SyncSnapshot::default()
        });
        Self { tx: Arc::new(tx) }
    }

    /// Current snapshot
    #[must_use]
    pub fn snapshot(&self) -> SyncSnapshot {
        self.tx.borrow().clone()
    }

    /// Subscribe to snapshot updates
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.tx.subscribe()
    }

    /// Recompute counts from the store and publish.
    ///
    /// Called on the fixed refresh interval and after every enqueue/replay
    /// event; convergence within the polling interval is the contract.
    pub async fn refresh<Q: ActionQueue>(&self, queue: &Q) -> Result<()> {
        let counts = queue.count_pending().await?;
        self.tx.send_if_modified(|snapshot| {
            if snapshot.pending_count == counts.total && snapshot.failed_count == counts.failed {
                false
            } else {
                snapshot.pending_count = counts.total;
                snapshot.failed_count = counts.failed;
                true
            }
        });
        Ok(())
    }

    /// Toggled by the driver around a drain pass
    pub fn set_syncing(&self, syncing: bool) {
        self.tx.send_if_modified(|snapshot| {
            if snapshot.is_syncing == syncing {
                false
            } else {
                snapshot.is_syncing = syncing;
                true
            }
        });
    }

    /// Mirror of the connectivity monitor's signal
    pub fn set_offline(&self, offline: bool) {
        self.tx.send_if_modified(|snapshot| {
            if snapshot.is_offline == offline {
                false
            } else {
                snapshot.is_offline = offline;
                true
            }
        });
    }

    /// Raised once when the store degrades to session-only queueing
    pub fn set_degraded(&self, degraded: bool) {
        self.tx.send_if_modified(|snapshot| {
            if snapshot.degraded == degraded {
                false
            } else {
                snapshot.degraded = degraded;
                true
            }
        });
    }
}

impl Default for StatusAggregator {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryActionQueue;
    use crate::models::{ActionKind, HttpMethod};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_refresh_reflects_store() {
        let queue = MemoryActionQueue::new();
        let status = StatusAggregator::new(false);

        status.refresh(&queue).await.unwrap();
        assert_eq!(status.snapshot().pending_count, 0);

        queue
            .enqueue(
                ActionKind::ClockIn,
                "/api/v1/attendance/clock-in",
                HttpMethod::Post,
                json!({}),
            )
            .await
            .unwrap();

        status.refresh(&queue).await.unwrap();
        assert_eq!(status.snapshot().pending_count, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_syncing_flag_is_session_local() {
        let status = StatusAggregator::new(false);
        assert!(!status.snapshot().is_syncing);

        status.set_syncing(true);
        assert!(status.snapshot().is_syncing);

        status.set_syncing(false);
        assert!(!status.snapshot().is_syncing);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_offline_and_online_mutually_exclusive() {
        let status = StatusAggregator::new(true);
        let snapshot = status.snapshot();
        assert!(snapshot.is_offline);
        assert!(!snapshot.is_online());

        status.set_offline(false);
        let snapshot = status.snapshot();
        assert!(!snapshot.is_offline);
        assert!(snapshot.is_online());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_subscribers_notified_on_refresh() {
        let queue = MemoryActionQueue::new();
        let status = StatusAggregator::new(false);
        let mut rx = status.subscribe();
        rx.borrow_and_update();

        queue
            .enqueue(
                ActionKind::CreateRecord,
                "/api/v1/records",
                HttpMethod::Post,
                json!({}),
            )
            .await
            .unwrap();
        status.refresh(&queue).await.unwrap();

        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().pending_count, 1);
    }
}
