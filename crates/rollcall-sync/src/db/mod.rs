//! Database layer: connection management, migrations, and the action queue

mod connection;
mod migrations;
mod queue;

pub use connection::Database;
pub use queue::{ActionQueue, DegradableQueue, LibSqlActionQueue, MemoryActionQueue, SyncedAction};
