//! Port definitions (traits) for external dependencies
//!
//! These traits define the boundaries between the domain and external systems.
//! Adapters implement these traits to connect to real infrastructure.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;

use crate::model::{Cursor, DedupKey, FetchBatch, Post, SeenRecord};
use crate::retry::Transient;

/// Error type for source adapter operations
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Rate limited, retry after: {0:?}")]
    RateLimited(Option<std::time::Duration>),
    #[error("Fetch failed: {0}")]
    Fetch(String),
}

impl SourceError {
    /// Whether the source should stay disabled for the rest of the process
    pub fn disables_source(&self) -> bool {
        matches!(self, SourceError::Config(_) | SourceError::Auth(_))
    }
}

/// Port for fetching posts from one configured source
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Stable identifier of this source instance
    fn source_id(&self) -> &str;

    /// Fetch posts newer than the stored cursor, ordered oldest to newest
    async fn fetch_since(&self, cursor: Option<&str>) -> Result<FetchBatch, SourceError>;
}

/// Error type for delivery operations
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Rate limited, retry after: {0:?}")]
    RateLimited(Option<std::time::Duration>),
    #[error("Channel unavailable: {0}")]
    Unavailable(String),
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Rejected by channel: {0}")]
    Rejected(String),
    #[error("Gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

impl Transient for DeliveryError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            DeliveryError::Network(_) | DeliveryError::RateLimited(_) | DeliveryError::Unavailable(_)
        )
    }

    fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            DeliveryError::RateLimited(wait) => *wait,
            _ => None,
        }
    }
}

/// Port for sending one post to the messaging channel
#[async_trait]
pub trait DeliverySink: Send + Sync {
    /// Send a single post; retries are the sink's responsibility
    async fn send(&self, post: &Post) -> Result<(), DeliveryError>;

    /// Short sink name for logs (e.g., "telegram", "outbox")
    fn name(&self) -> &'static str;
}

/// Error type for state store operations
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Port for the durable cursor and dedup stores
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Get the stored cursor for a source
    async fn get_cursor(&self, source_id: &str) -> Result<Option<Cursor>, StateError>;

    /// Upsert a cursor (last write wins)
    async fn set_cursor(&self, cursor: &Cursor) -> Result<(), StateError>;

    /// Remove a cursor; returns whether one existed
    async fn delete_cursor(&self, source_id: &str) -> Result<bool, StateError>;

    /// All stored cursors, ordered by source id
    async fn list_cursors(&self) -> Result<Vec<Cursor>, StateError>;

    /// Check whether a post has already been delivered
    async fn is_seen(&self, key: &DedupKey) -> Result<bool, StateError>;

    /// Record a delivered post; inserting an existing key is a no-op
    async fn mark_seen(&self, record: &SeenRecord) -> Result<(), StateError>;

    /// Number of seen records
    async fn seen_count(&self) -> Result<u64, StateError>;
}

/// Port for time/clock operations (enables deterministic testing)
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> OffsetDateTime;
}

/// Real clock implementation
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}
