//! Pending action model - the unit of queued offline work

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A unique identifier for a queued action, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionId(Uuid);

impl ActionId {
    /// Create a new unique action ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ActionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Operation type of a queued mutation.
///
/// Determines replay semantics on the server side; the engine itself treats
/// all kinds uniformly and only preserves their relative creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    ClockIn,
    ClockOut,
    CreateRecord,
    UpdateRecord,
    DeleteRecord,
}

impl ActionKind {
    /// Stable string form used for database storage
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClockIn => "CLOCK_IN",
            Self::ClockOut => "CLOCK_OUT",
            Self::CreateRecord => "CREATE_RECORD",
            Self::UpdateRecord => "UPDATE_RECORD",
            Self::DeleteRecord => "DELETE_RECORD",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CLOCK_IN" => Ok(Self::ClockIn),
            "CLOCK_OUT" => Ok(Self::ClockOut),
            "CREATE_RECORD" => Ok(Self::CreateRecord),
            "UPDATE_RECORD" => Ok(Self::UpdateRecord),
            "DELETE_RECORD" => Ok(Self::DeleteRecord),
            other => Err(format!("unknown action kind: {other}")),
        }
    }
}

/// HTTP method of the eventual API call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            other => Err(format!("unknown HTTP method: {other}")),
        }
    }
}

/// Lifecycle status of a queued action.
///
/// `Synced` is terminal: the row is archived and removed, never replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    Pending,
    Syncing,
    Failed,
    Synced,
}

impl ActionStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Syncing => "SYNCING",
            Self::Failed => "FAILED",
            Self::Synced => "SYNCED",
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "SYNCING" => Ok(Self::Syncing),
            "FAILED" => Ok(Self::Failed),
            "SYNCED" => Ok(Self::Synced),
            other => Err(format!("unknown action status: {other}")),
        }
    }
}

/// A queued mutation awaiting delivery to the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAction {
    /// Unique identifier
    pub id: ActionId,
    /// Operation type
    pub kind: ActionKind,
    /// Target API endpoint path (e.g. `/api/v1/attendance/clock-in`)
    pub endpoint: String,
    /// HTTP method for delivery
    pub method: HttpMethod,
    /// Opaque request body, replayed as-is
    pub payload: Value,
    /// Client-generated idempotency token. Stable for the lifetime of the
    /// action; the server treats duplicate deliveries of the same token as a
    /// no-op, so a lost acknowledgement cannot double-apply the mutation.
    pub idempotency_key: String,
    /// Enqueue timestamp (Unix ms), used for FIFO ordering
    pub created_at: i64,
    /// Current lifecycle status
    pub status: ActionStatus,
    /// Delivery attempts so far. Only increases, except on explicit manual retry.
    pub attempts: u32,
    /// Last failure reason, if any
    pub last_error: Option<String>,
}

impl PendingAction {
    /// Create a new pending action ready for enqueue
    #[must_use]
    pub fn new(kind: ActionKind, endpoint: impl Into<String>, method: HttpMethod, payload: Value) -> Self {
        Self {
            id: ActionId::new(),
            kind,
            endpoint: endpoint.into(),
            method,
            payload,
            idempotency_key: Uuid::new_v4().to_string(),
            created_at: chrono::Utc::now().timestamp_millis(),
            status: ActionStatus::Pending,
            attempts: 0,
            last_error: None,
        }
    }

    /// Whether the action has exhausted its automatic retry budget and now
    /// requires manual retry or discard.
    #[must_use]
    pub const fn is_terminally_failed(&self, max_attempts: u32) -> bool {
        matches!(self.status, ActionStatus::Failed) && self.attempts >= max_attempts
    }
}

/// Cheap aggregate over the queue for UI polling. Computed without loading
/// payloads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PendingCounts {
    /// Actions not in terminal `SYNCED` state
    pub total: u64,
    /// Subset currently in `FAILED` status
    pub failed: u64,
    /// Per-kind breakdown of the total
    pub by_kind: Vec<(ActionKind, u64)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_action_id_unique() {
        let id1 = ActionId::new();
        let id2 = ActionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_action_id_parse() {
        let id = ActionId::new();
        let parsed: ActionId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_action_ids_sort_by_creation() {
        // UUID v7 is time-ordered, so freshly minted ids compare ascending
        let ids: Vec<ActionId> = (0..16).map(|_| ActionId::new()).collect();
        let mut sorted = ids.clone();
        sorted.sort_by_key(|id| id.as_str());
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            ActionKind::ClockIn,
            ActionKind::ClockOut,
            ActionKind::CreateRecord,
            ActionKind::UpdateRecord,
            ActionKind::DeleteRecord,
        ] {
            let parsed: ActionKind = kind.as_str().parse().unwrap();
            assert_eq!(kind, parsed);
        }
        assert!("CLOCK_SIDEWAYS".parse::<ActionKind>().is_err());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            ActionStatus::Pending,
            ActionStatus::Syncing,
            ActionStatus::Failed,
            ActionStatus::Synced,
        ] {
            let parsed: ActionStatus = status.as_str().parse().unwrap();
            assert_eq!(status, parsed);
        }
    }

    #[test]
    fn test_new_action_defaults() {
        let action = PendingAction::new(
            ActionKind::ClockIn,
            "/api/v1/attendance/clock-in",
            HttpMethod::Post,
            json!({"employee_id": 42}),
        );
        assert_eq!(action.status, ActionStatus::Pending);
        assert_eq!(action.attempts, 0);
        assert!(action.last_error.is_none());
        assert!(action.created_at > 0);
        assert!(!action.idempotency_key.is_empty());
    }

    #[test]
    fn test_terminally_failed() {
        let mut action = PendingAction::new(
            ActionKind::UpdateRecord,
            "/api/v1/records/7",
            HttpMethod::Put,
            json!({}),
        );
        assert!(!action.is_terminally_failed(5));

        action.status = ActionStatus::Failed;
        action.attempts = 4;
        assert!(!action.is_terminally_failed(5));

        action.attempts = 5;
        assert!(action.is_terminally_failed(5));
    }
}
