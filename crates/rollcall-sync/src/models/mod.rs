//! Data models for the pending-action queue

mod action;

pub use action::{ActionId, ActionKind, ActionStatus, HttpMethod, PendingAction, PendingCounts};
