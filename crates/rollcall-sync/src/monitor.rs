//! Connectivity monitor
//!
//! Exposes a boolean is-offline signal and notifies subscribers on change.
//! Never touches the action store. The platform's reachability signal feeds
//! `set_offline`; where that signal is unreliable, the optional probe task
//! polls a health endpoint instead.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Shared online/offline signal
#[derive(Clone)]
pub struct ConnectivityMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    /// Create a monitor with the given initial state
    #[must_use]
    pub fn new(initially_offline: bool) -> Self {
        let (tx, _rx) = watch::channel(initially_offline);
        Self { tx: Arc::new(tx) }
    }

    /// Current offline state
    #[must_use]
    pub fn is_offline(&self) -> bool {
        *self.tx.borrow()
    }

    /// Current online state
    #[must_use]
    pub fn is_online(&self) -> bool {
        !self.is_offline()
    }

    /// Record a connectivity transition. Subscribers are notified only on an
    /// actual change.
    pub fn set_offline(&self, offline: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == offline {
                false
            } else {
                *current = offline;
                true
            }
        });

        if changed {
            if offline {
                tracing::warn!("Connectivity lost; queueing mutations locally");
            } else {
                tracing::info!("Connectivity restored");
            }
        }
    }

    /// Subscribe to connectivity transitions
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Spawn a periodic reachability probe against `url`.
    ///
    /// Optional hardening for platforms whose native signal is unreliable;
    /// a failed HEAD request flips the monitor offline, a successful one
    /// flips it back.
    pub fn spawn_probe(
        &self,
        client: reqwest::Client,
        url: String,
        interval: Duration,
    ) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let reachable = match client.head(&url).send().await {
                    Ok(response) => response.status().is_success(),
                    Err(error) => {
                        tracing::debug!("Reachability probe failed: {error}");
                        false
                    }
                };
                monitor.set_offline(!reachable);
            }
        })
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        // Assume online until told otherwise
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_initial_state() {
        assert!(ConnectivityMonitor::new(true).is_offline());
        assert!(ConnectivityMonitor::new(false).is_online());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_subscribers_see_transitions() {
        let monitor = ConnectivityMonitor::new(false);
        let mut rx = monitor.subscribe();

        monitor.set_offline(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());

        monitor.set_offline(false);
        rx.changed().await.unwrap();
        assert!(!*rx.borrow_and_update());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_no_notification_without_change() {
        let monitor = ConnectivityMonitor::new(false);
        let mut rx = monitor.subscribe();
        rx.borrow_and_update();

        monitor.set_offline(false);
        assert!(!rx.has_changed().unwrap());
    }
}
