//! Persistent action queue - the single source of truth for unsynced work

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use libsql::Connection;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::{
    ActionId, ActionKind, ActionStatus, HttpMethod, PendingAction, PendingCounts,
};

/// Trait for pending-action storage operations (async)
///
/// All mutation of the persisted queue goes through this trait; no other
/// component touches the storage directly.
pub trait ActionQueue: Send + Sync {
    /// Insert a new `PENDING` action. Durable before the call returns.
    fn enqueue(
        &self,
        kind: ActionKind,
        endpoint: &str,
        method: HttpMethod,
        payload: Value,
    ) -> impl Future<Output = Result<PendingAction>> + Send;

    /// All actions not in terminal `SYNCED` state, FIFO by creation order.
    /// Safe to call repeatedly; does not consume.
    fn list_pending(&self) -> impl Future<Output = Result<Vec<PendingAction>>> + Send;

    /// Fetch a single action by id
    fn get(&self, id: ActionId) -> impl Future<Output = Result<Option<PendingAction>>> + Send;

    /// Claim an action for delivery. Fails with `ConflictSkipped` if the
    /// action is already `SYNCING` or `SYNCED` (another context got there
    /// first - detect-and-skip, not a hard lock).
    fn mark_syncing(&self, id: ActionId) -> impl Future<Output = Result<()>> + Send;

    /// Record confirmed server acknowledgement. Terminal.
    fn mark_synced(&self, id: ActionId) -> impl Future<Output = Result<()>> + Send;

    /// Record a failed delivery attempt: status `FAILED`, attempts + 1,
    /// reason stored in `last_error`.
    fn mark_failed(&self, id: ActionId, reason: &str) -> impl Future<Output = Result<()>> + Send;

    /// Cheap aggregate for UI polling; does not load payloads
    fn count_pending(&self) -> impl Future<Output = Result<PendingCounts>> + Send;

    /// Permanently delete a record. Used only after `SYNCED` confirmation or
    /// explicit user discard.
    fn remove(&self, id: ActionId) -> impl Future<Output = Result<()>> + Send;

    /// Manual retry of a `FAILED` action: back to `PENDING`, attempts reset.
    /// The only path that ever resets `attempts`.
    fn retry(&self, id: ActionId) -> impl Future<Output = Result<()>> + Send;

    /// Whether the queue has fallen back to session-only storage
    fn is_degraded(&self) -> bool {
        false
    }
}

/// Archived metadata of a confirmed-synced action (diagnostics only)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncedAction {
    pub id: ActionId,
    pub kind: ActionKind,
    pub endpoint: String,
    pub created_at: i64,
    pub synced_at: i64,
}

/// libSQL implementation of `ActionQueue`
#[derive(Clone)]
pub struct LibSqlActionQueue {
    conn: Connection,
}

impl LibSqlActionQueue {
    /// Create a new queue over the given connection
    pub const fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Recently confirmed actions, newest first (feeds the diagnostics view)
    pub async fn list_recently_synced(&self, limit: usize) -> Result<Vec<SyncedAction>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, kind, endpoint, created_at, synced_at
                 FROM synced_actions
                 ORDER BY synced_at DESC
                 LIMIT ?",
                libsql::params![limit as i64],
            )
            .await?;

        let mut synced = Vec::new();
        while let Some(row) = rows.next().await? {
            let id: String = row.get(0)?;
            let kind: String = row.get(1)?;
            synced.push(SyncedAction {
                id: parse_field(&id, "id")?,
                kind: parse_field(&kind, "kind")?,
                endpoint: row.get(2)?,
                created_at: row.get(3)?,
                synced_at: row.get(4)?,
            });
        }
        Ok(synced)
    }

    /// Current status of an action, if the row exists
    async fn status_of(&self, id: ActionId) -> Result<Option<ActionStatus>> {
        let mut rows = self
            .conn
            .query(
                "SELECT status FROM pending_actions WHERE id = ?",
                libsql::params![id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => {
                let status: String = row.get(0)?;
                Ok(Some(parse_field(&status, "status")?))
            }
            None => Ok(None),
        }
    }

    fn parse_action(row: &libsql::Row) -> Result<PendingAction> {
        let id: String = row.get(0)?;
        let kind: String = row.get(1)?;
        let method: String = row.get(3)?;
        let payload: String = row.get(4)?;
        let status: String = row.get(7)?;
        let attempts: i64 = row.get(8)?;

        Ok(PendingAction {
            id: parse_field(&id, "id")?,
            kind: parse_field(&kind, "kind")?,
            endpoint: row.get(2)?,
            method: parse_field(&method, "method")?,
            payload: serde_json::from_str(&payload)?,
            idempotency_key: row.get(5)?,
            created_at: row.get(6)?,
            status: parse_field(&status, "status")?,
            attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
            last_error: row.get(9)?,
        })
    }
}

fn parse_field<T>(raw: &str, field: &str) -> Result<T>
where
    T: std::str::FromStr,
{
    raw.parse()
        .map_err(|_| Error::InvalidInput(format!("corrupt {field} column: {raw}")))
}

impl ActionQueue for LibSqlActionQueue {
    async fn enqueue(
        &self,
        kind: ActionKind,
        endpoint: &str,
        method: HttpMethod,
        payload: Value,
    ) -> Result<PendingAction> {
        let action = PendingAction::new(kind, endpoint, method, payload);
        let payload_json = serde_json::to_string(&action.payload)?;

        self.conn
            .execute(
                "INSERT INTO pending_actions
                 (id, kind, endpoint, method, payload, idempotency_key, created_at, status, attempts)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                libsql::params![
                    action.id.as_str(),
                    action.kind.as_str(),
                    action.endpoint.as_str(),
                    action.method.as_str(),
                    payload_json,
                    action.idempotency_key.as_str(),
                    action.created_at,
                    action.status.as_str(),
                    i64::from(action.attempts)
                ],
            )
            .await?;

        tracing::debug!(id = %action.id, kind = %action.kind, "Enqueued pending action");
        Ok(action)
    }

    async fn list_pending(&self) -> Result<Vec<PendingAction>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, kind, endpoint, method, payload, idempotency_key,
                        created_at, status, attempts, last_error
                 FROM pending_actions
                 WHERE status != 'SYNCED'
                 ORDER BY created_at ASC, rowid ASC",
                (),
            )
            .await?;

        let mut actions = Vec::new();
        while let Some(row) = rows.next().await? {
            actions.push(Self::parse_action(&row)?);
        }
        Ok(actions)
    }

    async fn get(&self, id: ActionId) -> Result<Option<PendingAction>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, kind, endpoint, method, payload, idempotency_key,
                        created_at, status, attempts, last_error
                 FROM pending_actions
                 WHERE id = ?",
                libsql::params![id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_action(&row)?)),
            None => Ok(None),
        }
    }

    async fn mark_syncing(&self, id: ActionId) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE pending_actions SET status = 'SYNCING'
                 WHERE id = ? AND status IN ('PENDING', 'FAILED')",
                libsql::params![id.as_str()],
            )
            .await?;

        if rows == 0 {
            return match self.status_of(id).await? {
                Some(_) => Err(Error::ConflictSkipped(id)),
                None => Err(Error::NotFound(id)),
            };
        }
        Ok(())
    }

    async fn mark_synced(&self, id: ActionId) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();

        let rows = self
            .conn
            .execute(
                "UPDATE pending_actions SET status = 'SYNCED', last_error = NULL WHERE id = ?",
                libsql::params![id.as_str()],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(id));
        }

        // Archive metadata before the live row is removed
        self.conn
            .execute(
                "INSERT OR REPLACE INTO synced_actions (id, kind, endpoint, created_at, synced_at)
                 SELECT id, kind, endpoint, created_at, ? FROM pending_actions WHERE id = ?",
                libsql::params![now, id.as_str()],
            )
            .await?;

        Ok(())
    }

    async fn mark_failed(&self, id: ActionId, reason: &str) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE pending_actions
                 SET status = 'FAILED', attempts = attempts + 1, last_error = ?
                 WHERE id = ?",
                libsql::params![reason, id.as_str()],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(id));
        }
        Ok(())
    }

    async fn count_pending(&self) -> Result<PendingCounts> {
        let mut rows = self
            .conn
            .query(
                "SELECT kind, status, COUNT(*)
                 FROM pending_actions
                 WHERE status != 'SYNCED'
                 GROUP BY kind, status",
                (),
            )
            .await?;

        let mut counts = PendingCounts::default();
        let mut by_kind: BTreeMap<&'static str, (ActionKind, u64)> = BTreeMap::new();

        while let Some(row) = rows.next().await? {
            let kind: String = row.get(0)?;
            let status: String = row.get(1)?;
            let count: i64 = row.get(2)?;
            let count = u64::try_from(count).unwrap_or(0);

            let kind: ActionKind = parse_field(&kind, "kind")?;
            let status: ActionStatus = parse_field(&status, "status")?;

            counts.total += count;
            if status == ActionStatus::Failed {
                counts.failed += count;
            }
            by_kind.entry(kind.as_str()).or_insert((kind, 0)).1 += count;
        }

        counts.by_kind = by_kind.into_values().collect();
        Ok(counts)
    }

    async fn remove(&self, id: ActionId) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "DELETE FROM pending_actions WHERE id = ?",
                libsql::params![id.as_str()],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(id));
        }
        Ok(())
    }

    async fn retry(&self, id: ActionId) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE pending_actions
                 SET status = 'PENDING', attempts = 0, last_error = NULL
                 WHERE id = ? AND status = 'FAILED'",
                libsql::params![id.as_str()],
            )
            .await?;

        if rows == 0 {
            return match self.status_of(id).await? {
                Some(status) => Err(Error::InvalidInput(format!(
                    "action {id} is {status}, only FAILED actions can be retried"
                ))),
                None => Err(Error::NotFound(id)),
            };
        }
        Ok(())
    }
}

/// In-memory implementation of `ActionQueue`.
///
/// Session-only: used as the degraded-mode fallback when local storage is
/// unavailable, and by driver tests. Same state machine, no durability.
#[derive(Debug, Default)]
pub struct MemoryActionQueue {
    actions: Mutex<Vec<PendingAction>>,
}

impl MemoryActionQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_actions<T>(&self, f: impl FnOnce(&mut Vec<PendingAction>) -> T) -> T {
        let mut guard = self
            .actions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    fn mutate(
        &self,
        id: ActionId,
        f: impl FnOnce(&mut PendingAction) -> Result<()>,
    ) -> Result<()> {
        self.with_actions(|actions| {
            let action = actions
                .iter_mut()
                .find(|a| a.id == id)
                .ok_or(Error::NotFound(id))?;
            f(action)
        })
    }
}

impl ActionQueue for MemoryActionQueue {
    async fn enqueue(
        &self,
        kind: ActionKind,
        endpoint: &str,
        method: HttpMethod,
        payload: Value,
    ) -> Result<PendingAction> {
        let action = PendingAction::new(kind, endpoint, method, payload);
        self.with_actions(|actions| actions.push(action.clone()));
        Ok(action)
    }

    async fn list_pending(&self) -> Result<Vec<PendingAction>> {
        Ok(self.with_actions(|actions| {
            actions
                .iter()
                .filter(|a| a.status != ActionStatus::Synced)
                .cloned()
                .collect()
        }))
    }

    async fn get(&self, id: ActionId) -> Result<Option<PendingAction>> {
        Ok(self.with_actions(|actions| actions.iter().find(|a| a.id == id).cloned()))
    }

    async fn mark_syncing(&self, id: ActionId) -> Result<()> {
        self.mutate(id, |action| match action.status {
            ActionStatus::Pending | ActionStatus::Failed => {
                action.status = ActionStatus::Syncing;
                Ok(())
            }
            ActionStatus::Syncing | ActionStatus::Synced => Err(Error::ConflictSkipped(id)),
        })
    }

    async fn mark_synced(&self, id: ActionId) -> Result<()> {
        self.mutate(id, |action| {
            action.status = ActionStatus::Synced;
            action.last_error = None;
            Ok(())
        })
    }

    async fn mark_failed(&self, id: ActionId, reason: &str) -> Result<()> {
        self.mutate(id, |action| {
            action.status = ActionStatus::Failed;
            action.attempts += 1;
            action.last_error = Some(reason.to_string());
            Ok(())
        })
    }

    async fn count_pending(&self) -> Result<PendingCounts> {
        Ok(self.with_actions(|actions| {
            let mut counts = PendingCounts::default();
            let mut by_kind: BTreeMap<&'static str, (ActionKind, u64)> = BTreeMap::new();

            for action in actions.iter().filter(|a| a.status != ActionStatus::Synced) {
                counts.total += 1;
                if action.status == ActionStatus::Failed {
                    counts.failed += 1;
                }
                by_kind
                    .entry(action.kind.as_str())
                    .or_insert((action.kind, 0))
                    .1 += 1;
            }

            counts.by_kind = by_kind.into_values().collect();
            counts
        }))
    }

    async fn remove(&self, id: ActionId) -> Result<()> {
        self.with_actions(|actions| {
            let before = actions.len();
            actions.retain(|a| a.id != id);
            if actions.len() == before {
                Err(Error::NotFound(id))
            } else {
                Ok(())
            }
        })
    }

    async fn retry(&self, id: ActionId) -> Result<()> {
        self.mutate(id, |action| {
            if action.status != ActionStatus::Failed {
                return Err(Error::InvalidInput(format!(
                    "action {id} is {}, only FAILED actions can be retried",
                    action.status
                )));
            }
            action.status = ActionStatus::Pending;
            action.attempts = 0;
            action.last_error = None;
            Ok(())
        })
    }
}

/// Queue wrapper implementing the degraded-mode contract: when the primary
/// store reports `STORAGE_UNAVAILABLE`, new work flows into a session-only
/// in-memory queue instead of being lost, and the condition is surfaced via
/// [`DegradableQueue::is_degraded`]. Already-persisted rows stay readable.
pub struct DegradableQueue<Q> {
    primary: Q,
    fallback: MemoryActionQueue,
    degraded: AtomicBool,
}

impl<Q: ActionQueue> DegradableQueue<Q> {
    pub fn new(primary: Q) -> Self {
        Self {
            primary,
            fallback: MemoryActionQueue::new(),
            degraded: AtomicBool::new(false),
        }
    }

    pub const fn primary(&self) -> &Q {
        &self.primary
    }

    fn enter_degraded(&self, error: &Error) {
        if !self.degraded.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                "Local queue storage unavailable ({error}); \
                 degrading to session-only queue for the rest of this session"
            );
        }
    }
}

impl<Q: ActionQueue> ActionQueue for DegradableQueue<Q> {
    fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    async fn enqueue(
        &self,
        kind: ActionKind,
        endpoint: &str,
        method: HttpMethod,
        payload: Value,
    ) -> Result<PendingAction> {
        if self.is_degraded() {
            return self.fallback.enqueue(kind, endpoint, method, payload).await;
        }

        match self
            .primary
            .enqueue(kind, endpoint, method, payload.clone())
            .await
        {
            Ok(action) => Ok(action),
            Err(error) if error.is_storage_unavailable() => {
                self.enter_degraded(&error);
                self.fallback.enqueue(kind, endpoint, method, payload).await
            }
            Err(error) => Err(error),
        }
    }

    async fn list_pending(&self) -> Result<Vec<PendingAction>> {
        let mut actions = if self.is_degraded() {
            // Keep already-persisted rows visible even when writes fail
            self.primary.list_pending().await.unwrap_or_default()
        } else {
            self.primary.list_pending().await?
        };

        actions.extend(self.fallback.list_pending().await?);
        actions.sort_by_key(|a| (a.created_at, a.id.as_str()));
        Ok(actions)
    }

    async fn get(&self, id: ActionId) -> Result<Option<PendingAction>> {
        if let Some(action) = self.fallback.get(id).await? {
            return Ok(Some(action));
        }
        if self.is_degraded() {
            return Ok(self.primary.get(id).await.unwrap_or(None));
        }
        self.primary.get(id).await
    }

    async fn mark_syncing(&self, id: ActionId) -> Result<()> {
        match self.primary.mark_syncing(id).await {
            Err(Error::NotFound(_)) => self.fallback.mark_syncing(id).await,
            Err(error) if error.is_storage_unavailable() => self.fallback.mark_syncing(id).await,
            other => other,
        }
    }

    async fn mark_synced(&self, id: ActionId) -> Result<()> {
        match self.primary.mark_synced(id).await {
            Err(Error::NotFound(_)) => self.fallback.mark_synced(id).await,
            Err(error) if error.is_storage_unavailable() => self.fallback.mark_synced(id).await,
            other => other,
        }
    }

    async fn mark_failed(&self, id: ActionId, reason: &str) -> Result<()> {
        match self.primary.mark_failed(id, reason).await {
            Err(Error::NotFound(_)) => self.fallback.mark_failed(id, reason).await,
            Err(error) if error.is_storage_unavailable() => {
                self.fallback.mark_failed(id, reason).await
            }
            other => other,
        }
    }

    async fn count_pending(&self) -> Result<PendingCounts> {
        let primary = if self.is_degraded() {
            self.primary.count_pending().await.unwrap_or_default()
        } else {
            self.primary.count_pending().await?
        };
        let fallback = self.fallback.count_pending().await?;

        let mut by_kind: BTreeMap<&'static str, (ActionKind, u64)> = BTreeMap::new();
        for (kind, count) in primary.by_kind.into_iter().chain(fallback.by_kind) {
            by_kind.entry(kind.as_str()).or_insert((kind, 0)).1 += count;
        }

        Ok(PendingCounts {
            total: primary.total + fallback.total,
            failed: primary.failed + fallback.failed,
            by_kind: by_kind.into_values().collect(),
        })
    }

    async fn remove(&self, id: ActionId) -> Result<()> {
        match self.primary.remove(id).await {
            Err(Error::NotFound(_)) => self.fallback.remove(id).await,
            Err(error) if error.is_storage_unavailable() => self.fallback.remove(id).await,
            other => other,
        }
    }

    async fn retry(&self, id: ActionId) -> Result<()> {
        match self.primary.retry(id).await {
            Err(Error::NotFound(_)) => self.fallback.retry(id).await,
            Err(error) if error.is_storage_unavailable() => self.fallback.retry(id).await,
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn setup() -> (Database, LibSqlActionQueue) {
        let db = Database::open_in_memory().await.unwrap();
        let queue = LibSqlActionQueue::new(db.connection().clone());
        (db, queue)
    }

    async fn enqueue_clock_in(queue: &impl ActionQueue) -> PendingAction {
        queue
            .enqueue(
                ActionKind::ClockIn,
                "/api/v1/attendance/clock-in",
                HttpMethod::Post,
                json!({"employee_id": 7}),
            )
            .await
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_enqueue_and_get() {
        let (_db, queue) = setup().await;

        let action = enqueue_clock_in(&queue).await;
        let fetched = queue.get(action.id).await.unwrap().unwrap();

        assert_eq!(fetched, action);
        assert_eq!(fetched.status, ActionStatus::Pending);
        assert_eq!(fetched.attempts, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_list_pending_fifo_order() {
        let (_db, queue) = setup().await;

        let first = enqueue_clock_in(&queue).await;
        let second = queue
            .enqueue(
                ActionKind::UpdateRecord,
                "/api/v1/records/3",
                HttpMethod::Put,
                json!({"note": "late"}),
            )
            .await
            .unwrap();
        let third = queue
            .enqueue(
                ActionKind::ClockOut,
                "/api/v1/attendance/clock-out",
                HttpMethod::Post,
                json!({"employee_id": 7}),
            )
            .await
            .unwrap();

        let pending = queue.list_pending().await.unwrap();
        let ids: Vec<ActionId> = pending.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![first.id, second.id, third.id]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_list_pending_restartable() {
        let (_db, queue) = setup().await;
        enqueue_clock_in(&queue).await;

        // Listing does not consume
        assert_eq!(queue.list_pending().await.unwrap().len(), 1);
        assert_eq!(queue.list_pending().await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_mark_syncing_conflict_guard() {
        let (_db, queue) = setup().await;
        let action = enqueue_clock_in(&queue).await;

        queue.mark_syncing(action.id).await.unwrap();

        // A second claim (e.g. from another process) is rejected benignly
        let err = queue.mark_syncing(action.id).await.unwrap_err();
        assert!(matches!(err, Error::ConflictSkipped(id) if id == action.id));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_mark_syncing_allows_failed_reclaim() {
        let (_db, queue) = setup().await;
        let action = enqueue_clock_in(&queue).await;

        queue.mark_syncing(action.id).await.unwrap();
        queue.mark_failed(action.id, "timeout").await.unwrap();

        // A later pass may claim a FAILED action again
        queue.mark_syncing(action.id).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_mark_failed_increments_attempts() {
        let (_db, queue) = setup().await;
        let action = enqueue_clock_in(&queue).await;

        queue.mark_failed(action.id, "connection refused").await.unwrap();
        queue.mark_failed(action.id, "timeout").await.unwrap();

        let fetched = queue.get(action.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, ActionStatus::Failed);
        assert_eq!(fetched.attempts, 2);
        assert_eq!(fetched.last_error.as_deref(), Some("timeout"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_synced_is_terminal_and_archived() {
        let (_db, queue) = setup().await;
        let action = enqueue_clock_in(&queue).await;

        queue.mark_syncing(action.id).await.unwrap();
        queue.mark_synced(action.id).await.unwrap();

        // Excluded from the active queue, cannot be re-claimed
        assert!(queue.list_pending().await.unwrap().is_empty());
        assert!(matches!(
            queue.mark_syncing(action.id).await.unwrap_err(),
            Error::ConflictSkipped(_)
        ));

        queue.remove(action.id).await.unwrap();
        assert!(queue.get(action.id).await.unwrap().is_none());

        let archived = queue.list_recently_synced(10).await.unwrap();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].id, action.id);
        assert_eq!(archived[0].kind, ActionKind::ClockIn);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_retry_resets_attempts() {
        let (_db, queue) = setup().await;
        let action = enqueue_clock_in(&queue).await;

        queue.mark_failed(action.id, "rejected").await.unwrap();
        queue.retry(action.id).await.unwrap();

        let fetched = queue.get(action.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, ActionStatus::Pending);
        assert_eq!(fetched.attempts, 0);
        assert!(fetched.last_error.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_retry_rejects_non_failed() {
        let (_db, queue) = setup().await;
        let action = enqueue_clock_in(&queue).await;

        assert!(matches!(
            queue.retry(action.id).await.unwrap_err(),
            Error::InvalidInput(_)
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_count_pending() {
        let (_db, queue) = setup().await;

        let a = enqueue_clock_in(&queue).await;
        enqueue_clock_in(&queue).await;
        let c = queue
            .enqueue(
                ActionKind::UpdateRecord,
                "/api/v1/records/9",
                HttpMethod::Patch,
                json!({}),
            )
            .await
            .unwrap();

        queue.mark_failed(c.id, "409").await.unwrap();
        queue.mark_syncing(a.id).await.unwrap();
        queue.mark_synced(a.id).await.unwrap();

        let counts = queue.count_pending().await.unwrap();
        assert_eq!(counts.total, 2);
        assert_eq!(counts.failed, 1);
        assert!(counts
            .by_kind
            .contains(&(ActionKind::ClockIn, 1)));
        assert!(counts
            .by_kind
            .contains(&(ActionKind::UpdateRecord, 1)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_not_found() {
        let (_db, queue) = setup().await;
        let missing = ActionId::new();

        assert!(queue.get(missing).await.unwrap().is_none());
        assert!(matches!(
            queue.mark_syncing(missing).await.unwrap_err(),
            Error::NotFound(_)
        ));
        assert!(matches!(
            queue.remove(missing).await.unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_memory_queue_matches_contract() {
        let queue = MemoryActionQueue::new();

        let action = enqueue_clock_in(&queue).await;
        queue.mark_syncing(action.id).await.unwrap();
        assert!(matches!(
            queue.mark_syncing(action.id).await.unwrap_err(),
            Error::ConflictSkipped(_)
        ));

        queue.mark_failed(action.id, "timeout").await.unwrap();
        let fetched = queue.get(action.id).await.unwrap().unwrap();
        assert_eq!(fetched.attempts, 1);

        queue.retry(action.id).await.unwrap();
        let counts = queue.count_pending().await.unwrap();
        assert_eq!(counts.total, 1);
        assert_eq!(counts.failed, 0);
    }

    /// Primary queue that always reports unavailable storage
    struct BrokenQueue;

    impl ActionQueue for BrokenQueue {
        async fn enqueue(
            &self,
            _kind: ActionKind,
            _endpoint: &str,
            _method: HttpMethod,
            _payload: Value,
        ) -> Result<PendingAction> {
            Err(Error::StorageUnavailable("quota exceeded".into()))
        }

        async fn list_pending(&self) -> Result<Vec<PendingAction>> {
            Err(Error::StorageUnavailable("quota exceeded".into()))
        }

        async fn get(&self, _id: ActionId) -> Result<Option<PendingAction>> {
            Err(Error::StorageUnavailable("quota exceeded".into()))
        }

        async fn mark_syncing(&self, _id: ActionId) -> Result<()> {
            Err(Error::StorageUnavailable("quota exceeded".into()))
        }

        async fn mark_synced(&self, _id: ActionId) -> Result<()> {
            Err(Error::StorageUnavailable("quota exceeded".into()))
        }

        async fn mark_failed(&self, _id: ActionId, _reason: &str) -> Result<()> {
            Err(Error::StorageUnavailable("quota exceeded".into()))
        }

        async fn count_pending(&self) -> Result<PendingCounts> {
            Err(Error::StorageUnavailable("quota exceeded".into()))
        }

        async fn remove(&self, _id: ActionId) -> Result<()> {
            Err(Error::StorageUnavailable("quota exceeded".into()))
        }

        async fn retry(&self, _id: ActionId) -> Result<()> {
            Err(Error::StorageUnavailable("quota exceeded".into()))
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_degraded_fallback_keeps_session_working() {
        let queue = DegradableQueue::new(BrokenQueue);
        assert!(!queue.is_degraded());

        // Enqueue never fails outright; it lands in the session queue
        let action = enqueue_clock_in(&queue).await;
        assert!(queue.is_degraded());

        let pending = queue.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, action.id);

        // The full lifecycle works against the fallback
        queue.mark_syncing(action.id).await.unwrap();
        queue.mark_synced(action.id).await.unwrap();
        queue.remove(action.id).await.unwrap();
        assert_eq!(queue.count_pending().await.unwrap().total, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_degradable_passthrough_when_healthy() {
        let (_db, primary) = setup().await;
        let queue = DegradableQueue::new(primary);

        let action = enqueue_clock_in(&queue).await;
        assert!(!queue.is_degraded());

        // The row went to the durable primary
        let direct = queue.primary().get(action.id).await.unwrap();
        assert!(direct.is_some());
    }
}
