//! # Retained message logs
//!
//! A bus keeps, per topic, every message accepted since the topic's last
//! rollup. That log is what ordered subscriptions replay, and so the only
//! history a room has: rebuilding any past state of the room means replaying
//! it from the start.
//!
//! [MemoryLog] keeps everything in memory and is always available. With the
//! `sqlite` feature, [SqliteLog](sqlite::SqliteLog) keeps the log across
//! restarts of a bus server.

#[cfg(feature = "sqlite")]
pub mod sqlite;

mod memory;
mod retention_log;

pub use memory::MemoryLog;
pub use retention_log::RetentionLog;
