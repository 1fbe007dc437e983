//! Auto-sync driver - replays the pending queue against the API
//!
//! One cycle runs `IDLE -> DRAINING -> (IDLE | BACKOFF)`. A drain is
//! triggered by an offline-to-online transition, by the interval timer while
//! online, or by an explicit manual retry. At most one drain runs per client;
//! the store's `mark_syncing` transition guards against a second process
//! draining the same persisted queue (detect-and-skip, not a hard
//! cross-process lock).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};

use crate::api::{ApiClient, DeliveryError};
use crate::config::SyncConfig;
use crate::db::ActionQueue;
use crate::error::{Error, Result};
use crate::monitor::ConnectivityMonitor;
use crate::status::StatusAggregator;

/// Result of one drain cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Nothing to deliver
    Idle,
    /// Reached the end of the queue this pass
    Drained { delivered: usize, skipped: usize },
    /// A transient failure halted the pass to preserve ordering; retry after
    /// the given backoff unless pre-empted by reconnect or manual retry
    Halted { delivered: usize, backoff: Duration },
    /// Another context claimed the head of the queue; this context yields
    Conflict,
    /// Currently offline; nothing attempted
    Offline,
    /// A drain is already in progress on this client
    AlreadyDraining,
}

/// Orchestrates replay of pending actions
pub struct AutoSyncDriver<Q, C> {
    queue: Arc<Q>,
    api: Arc<C>,
    monitor: ConnectivityMonitor,
    status: StatusAggregator,
    config: SyncConfig,
    drain_active: AtomicBool,
}

impl<Q, C> AutoSyncDriver<Q, C>
where
    Q: ActionQueue + 'static,
    C: ApiClient + 'static,
{
    pub fn new(
        queue: Arc<Q>,
        api: Arc<C>,
        monitor: ConnectivityMonitor,
        status: StatusAggregator,
        config: SyncConfig,
    ) -> Self {
        Self {
            queue,
            api,
            monitor,
            status,
            config,
            drain_active: AtomicBool::new(false),
        }
    }

    /// Run one drain cycle.
    ///
    /// Returns immediately when offline or when another drain is in progress
    /// on this client.
    pub async fn drain(&self) -> Result<DrainOutcome> {
        if self.monitor.is_offline() {
            return Ok(DrainOutcome::Offline);
        }

        if self
            .drain_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(DrainOutcome::AlreadyDraining);
        }

        self.status.set_syncing(true);
        let outcome = self.drain_pass().await;
        self.status.set_syncing(false);
        self.drain_active.store(false, Ordering::Release);

        if let Err(error) = self.status.refresh(self.queue.as_ref()).await {
            tracing::debug!("Status refresh after drain failed: {error}");
        }

        outcome
    }

    /// Deliver queued actions in FIFO order.
    ///
    /// Later actions may depend on earlier ones reaching the server first, so
    /// a transiently failed action halts the whole pass. An action that has
    /// exhausted its retry budget is terminally `FAILED` and skipped by
    /// policy, letting later independent actions proceed; it stays in the
    /// store for manual retry or discard, never silently dropped.
    async fn drain_pass(&self) -> Result<DrainOutcome> {
        let actions = self.queue.list_pending().await?;
        if actions.is_empty() {
            return Ok(DrainOutcome::Idle);
        }

        tracing::debug!("Draining {} pending action(s)", actions.len());
        let mut delivered = 0;
        let mut skipped = 0;

        for action in actions {
            if action.is_terminally_failed(self.config.max_attempts) {
                skipped += 1;
                continue;
            }

            match self.queue.mark_syncing(action.id).await {
                Ok(()) => {}
                Err(Error::ConflictSkipped(id)) => {
                    tracing::info!(
                        "Action {id} already claimed elsewhere; yielding this drain pass"
                    );
                    return Ok(DrainOutcome::Conflict);
                }
                Err(Error::NotFound(_)) => continue,
                Err(error) => return Err(error),
            }

            match self.api.deliver(&action).await {
                Ok(()) => {
                    self.queue.mark_synced(action.id).await?;
                    self.queue.remove(action.id).await?;
                    delivered += 1;
                    tracing::debug!(id = %action.id, kind = %action.kind, "Action synced");
                }
                Err(DeliveryError::Rejected { status, message }) => {
                    let reason = format!("HTTP {status}: {message}");
                    self.queue.mark_failed(action.id, &reason).await?;
                    skipped += 1;

                    if action.attempts + 1 >= self.config.max_attempts {
                        tracing::warn!(
                            id = %action.id,
                            "Action exhausted its retry budget ({reason}); \
                             awaiting manual retry or discard"
                        );
                    } else {
                        tracing::debug!(id = %action.id, "Action rejected ({reason}); skipping this pass");
                    }
                }
                Err(DeliveryError::Transient(message)) => {
                    self.queue.mark_failed(action.id, &message).await?;
                    let backoff = backoff_delay(
                        action.attempts + 1,
                        self.config.backoff_base,
                        self.config.backoff_max,
                    );
                    tracing::info!(
                        id = %action.id,
                        "Transient delivery failure ({message}); \
                         halting drain, next attempt in {backoff:?}"
                    );
                    return Ok(DrainOutcome::Halted { delivered, backoff });
                }
            }
        }

        Ok(DrainOutcome::Drained { delivered, skipped })
    }

    /// Drive drains until shutdown.
    ///
    /// Wakes on the interval timer, on offline-to-online transitions, and on
    /// manual-retry notifications; the latter two pre-empt any backoff delay.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>, retry: Arc<Notify>) {
        let mut offline_rx = self.monitor.subscribe();
        let mut delay = self.config.drain_interval;

        // Catch up on work persisted before this session
        self.run_once(&mut delay).await;

        loop {
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                changed = offline_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if *offline_rx.borrow_and_update() {
                        self.status.set_offline(true);
                        delay = self.config.drain_interval;
                        continue;
                    }
                    self.status.set_offline(false);
                }
                () = retry.notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            self.run_once(&mut delay).await;
        }

        tracing::debug!("Auto-sync driver stopped");
    }

    async fn run_once(&self, delay: &mut Duration) {
        match self.drain().await {
            // A successful pass resets backoff to the steady-state interval
            Ok(DrainOutcome::Halted { backoff, .. }) => *delay = backoff,
            Ok(_) => *delay = self.config.drain_interval,
            Err(error) => {
                tracing::warn!("Drain pass failed: {error}");
                *delay = self.config.drain_interval;
            }
        }
    }
}

/// Exponential backoff seeded from the head-of-queue action's attempt count
fn backoff_delay(attempts: u32, base: Duration, max: Duration) -> Duration {
    let exponent = attempts.saturating_sub(1).min(16);
    let delay = base.saturating_mul(1_u32 << exponent);
    delay.min(max)
}
