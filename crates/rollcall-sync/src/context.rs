//! Sync context - app-lifetime composition root
//!
//! Wires the store, monitor, aggregator, and driver together once, owns their
//! task lifetimes, and exposes a read-only status snapshot to the UI tree.
//! Constructed explicitly and injected rather than accessed as a hidden
//! global; `start`/`shutdown` bracket the wiring lifetime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::api::ApiClient;
use crate::config::SyncConfig;
use crate::db::ActionQueue;
use crate::driver::{AutoSyncDriver, DrainOutcome};
use crate::error::Result;
use crate::models::{ActionId, ActionKind, HttpMethod, PendingAction};
use crate::monitor::ConnectivityMonitor;
use crate::status::{StatusAggregator, SyncSnapshot};

const PROBE_HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Composition root for the offline sync engine.
///
/// All mutation goes through [`SyncContext::enqueue`]; consumers never touch
/// the store directly.
pub struct SyncContext<Q, C> {
    queue: Arc<Q>,
    driver: Arc<AutoSyncDriver<Q, C>>,
    monitor: ConnectivityMonitor,
    status: StatusAggregator,
    config: SyncConfig,
    retry: Arc<Notify>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    probe: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl<Q, C> SyncContext<Q, C>
where
    Q: ActionQueue + 'static,
    C: ApiClient + 'static,
{
    /// Wire up the engine around the given store and API client
    pub fn new(queue: Q, api: C, config: SyncConfig) -> Self {
        let queue = Arc::new(queue);
        let monitor = ConnectivityMonitor::default();
        let status = StatusAggregator::new(monitor.is_offline());
        let driver = Arc::new(AutoSyncDriver::new(
            Arc::clone(&queue),
            Arc::new(api),
            monitor.clone(),
            status.clone(),
            config.clone(),
        ));
        let (shutdown_tx, _rx) = watch::channel(false);

        Self {
            queue,
            driver,
            monitor,
            status,
            config,
            retry: Arc::new(Notify::new()),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            probe: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    /// Queue a mutation for delivery.
    ///
    /// The action is always enqueued first, even when online, so every
    /// mutation follows the same path; when online the driver is nudged for
    /// an immediate best-effort pass.
    pub async fn enqueue(
        &self,
        kind: ActionKind,
        endpoint: &str,
        method: HttpMethod,
        payload: Value,
    ) -> Result<PendingAction> {
        let action = self.queue.enqueue(kind, endpoint, method, payload).await?;

        self.publish_store_state().await;
        if self.monitor.is_online() {
            self.retry.notify_one();
        }

        Ok(action)
    }

    /// Start the driver, the status poll, and (if configured) the
    /// reachability probe. Idempotent.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut tasks = self.lock_tasks();

        tasks.push(tokio::spawn(
            Arc::clone(&self.driver).run(self.shutdown_tx.subscribe(), Arc::clone(&self.retry)),
        ));

        tasks.push(tokio::spawn(status_poll_loop(
            Arc::clone(&self.queue),
            self.status.clone(),
            self.shutdown_tx.subscribe(),
            self.config.status_refresh_interval,
        )));

        if let Some(url) = self.config.probe_url.clone() {
            match reqwest::Client::builder().timeout(PROBE_HTTP_TIMEOUT).build() {
                Ok(client) => {
                    let handle =
                        self.monitor
                            .spawn_probe(client, url, self.config.probe_interval);
                    *self.lock_probe() = Some(handle);
                }
                Err(error) => {
                    tracing::warn!("Reachability probe disabled, HTTP client failed: {error}");
                }
            }
        }

        tracing::info!("Offline sync engine started");
    }

    /// Stop the engine between passes. An in-flight delivery completes or
    /// fails naturally before the driver exits.
    pub async fn shutdown(&self) {
        if !self.started.swap(false, Ordering::AcqRel) {
            return;
        }

        let _ = self.shutdown_tx.send(true);

        if let Some(probe) = self.lock_probe().take() {
            probe.abort();
        }

        let tasks = std::mem::take(&mut *self.lock_tasks());
        for task in tasks {
            if let Err(error) = task.await {
                if !error.is_cancelled() {
                    tracing::warn!("Sync task ended abnormally: {error}");
                }
            }
        }

        let _ = self.shutdown_tx.send(false);
        tracing::info!("Offline sync engine stopped");
    }

    /// Run a drain cycle right now (manual "retry now")
    pub async fn drain_now(&self) -> Result<DrainOutcome> {
        self.retry.notify_one();
        self.driver.drain().await
    }

    /// Manually retry a terminally failed action
    pub async fn retry_action(&self, id: ActionId) -> Result<()> {
        self.queue.retry(id).await?;
        self.publish_store_state().await;
        if self.monitor.is_online() {
            self.retry.notify_one();
        }
        Ok(())
    }

    /// Discard a failed action permanently
    pub async fn discard_action(&self, id: ActionId) -> Result<()> {
        self.queue.remove(id).await?;
        self.publish_store_state().await;
        Ok(())
    }

    /// Current read-only status snapshot
    #[must_use]
    pub fn snapshot(&self) -> SyncSnapshot {
        self.status.snapshot()
    }

    /// Subscribe to status snapshot updates
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.status.subscribe()
    }

    /// Connectivity signal; the platform layer feeds transitions into it
    #[must_use]
    pub const fn monitor(&self) -> &ConnectivityMonitor {
        &self.monitor
    }

    /// Read access to the queue for diagnostics views
    #[must_use]
    pub fn queue(&self) -> &Q {
        &self.queue
    }

    async fn publish_store_state(&self) {
        if let Err(error) = self.status.refresh(self.queue.as_ref()).await {
            tracing::debug!("Status refresh failed: {error}");
        }
        self.status.set_degraded(self.queue.is_degraded());
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_probe(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.probe.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn status_poll_loop<Q: ActionQueue>(
    queue: Arc<Q>,
    status: StatusAggregator,
    mut shutdown: watch::Receiver<bool>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(error) = status.refresh(queue.as_ref()).await {
                    tracing::debug!("Periodic status refresh failed: {error}");
                }
                status.set_degraded(queue.is_degraded());
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
