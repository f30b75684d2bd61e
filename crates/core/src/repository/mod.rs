//! Durable engine state.
//!
//! Subscriptions, enclosure history, tracked brush torrents and per-task
//! counters, behind the [`Repository`] trait with a SQLite implementation.

mod sqlite;
mod store;

pub use sqlite::SqliteRepository;
pub use store::*;
