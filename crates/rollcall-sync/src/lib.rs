//! rollcall-sync - Offline action-sync engine for Rollcall
//!
//! Lets the dashboard keep working while disconnected: mutations are enqueued
//! into a durable local store, replayed against the API in creation order once
//! connectivity returns, and surfaced to the UI as a read-only status snapshot.

pub mod api;
pub mod config;
pub mod context;
pub mod db;
pub mod driver;
pub mod error;
pub mod models;
pub mod monitor;
pub mod status;

pub use api::{ApiClient, DeliveryError, HttpApiClient};
pub use config::SyncConfig;
pub use context::SyncContext;
pub use db::{
    ActionQueue, Database, DegradableQueue, LibSqlActionQueue, MemoryActionQueue, SyncedAction,
};
pub use driver::{AutoSyncDriver, DrainOutcome};
pub use error::{Error, Result};
pub use models::{ActionId, ActionKind, ActionStatus, HttpMethod, PendingAction, PendingCounts};
pub use monitor::ConnectivityMonitor;
pub use status::{StatusAggregator, SyncSnapshot};
