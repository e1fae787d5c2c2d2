//! Persistence layer
//!
//! SQLite-based storage for conversation history.

mod database;
mod history;

pub use database::Database;
pub use history::{HistoryMessage, HistoryRole, HistoryStore, SqliteHistoryStore, ThreadSummary};
