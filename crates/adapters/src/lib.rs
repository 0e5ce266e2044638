//! post-relay adapters crate
//!
//! This crate contains infrastructure adapters implementing the domain ports:
//! - `sources`: X, Facebook Page, Mastodon and RSS/Atom source adapters
//! - `state`: SQLite and in-memory cursor/dedup stores
//! - `telegram`: Telegram Bot API delivery sink
//! - `outbox`: JSONL outbox sink
//! - `dry_run`: logging sink for dry runs

pub mod dry_run;
pub mod outbox;
pub mod sources;
pub mod telegram;

mod state_memory;
mod state_sqlite;

/// Re-exports for state adapters
pub mod state {
    pub use crate::state_memory::InMemoryStateStore;
    pub use crate::state_sqlite::SqliteStateStore;
}
