//! SQLite state store implementation

use async_trait::async_trait;
use post_relay_domain::{Cursor, DedupKey, SeenRecord, StateError, StateStore};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use std::path::Path;
use std::time::Duration;

/// SQLite-backed cursor and dedup store
pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    /// Open (or create) the database file and its tables
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self, StateError> {
        let db_path = db_path.as_ref();

        // Create parent directories if needed
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StateError::Database(format!("Failed to create directory: {}", e))
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StateError::Database(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing)
    pub async fn in_memory() -> Result<Self, StateError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| StateError::Database(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StateError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cursors (
                source_id TEXT PRIMARY KEY,
                cursor_value TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StateError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS seen (
                dedup_key TEXT PRIMARY KEY,
                delivered_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StateError::Database(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn get_cursor(&self, source_id: &str) -> Result<Option<Cursor>, StateError> {
        let row: Option<(String, Option<String>)> =
            sqlx::query_as("SELECT source_id, cursor_value FROM cursors WHERE source_id = ?")
                .bind(source_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StateError::Database(e.to_string()))?;

        Ok(row.and_then(|(source_id, value)| value.map(|value| Cursor { source_id, value })))
    }

    async fn set_cursor(&self, cursor: &Cursor) -> Result<(), StateError> {
        sqlx::query(
            r#"
            INSERT INTO cursors (source_id, cursor_value)
            VALUES (?, ?)
            ON CONFLICT(source_id) DO UPDATE SET
                cursor_value = excluded.cursor_value
            "#,
        )
        .bind(&cursor.source_id)
        .bind(&cursor.value)
        .execute(&self.pool)
        .await
        .map_err(|e| StateError::Database(e.to_string()))?;

        Ok(())
    }

    async fn delete_cursor(&self, source_id: &str) -> Result<bool, StateError> {
        let result = sqlx::query("DELETE FROM cursors WHERE source_id = ?")
            .bind(source_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StateError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_cursors(&self) -> Result<Vec<Cursor>, StateError> {
        let rows: Vec<(String, Option<String>)> = sqlx::query_as(
            "SELECT source_id, cursor_value FROM cursors ORDER BY source_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StateError::Database(e.to_string()))?;

        Ok(rows
            .into_iter()
            .filter_map(|(source_id, value)| value.map(|value| Cursor { source_id, value }))
            .collect())
    }

    async fn is_seen(&self, key: &DedupKey) -> Result<bool, StateError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM seen WHERE dedup_key = ?")
            .bind(key.storage_key())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StateError::Database(e.to_string()))?;

        Ok(count.0 > 0)
    }

    async fn mark_seen(&self, record: &SeenRecord) -> Result<(), StateError> {
        let delivered_at = record
            .delivered_at
            .format(&time::format_description::well_known::Rfc3339)
            .map_err(|e| StateError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO seen (dedup_key, delivered_at)
            VALUES (?, ?)
            ON CONFLICT(dedup_key) DO NOTHING
            "#,
        )
        .bind(record.key.storage_key())
        .bind(&delivered_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StateError::Database(e.to_string()))?;

        Ok(())
    }

    async fn seen_count(&self) -> Result<u64, StateError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM seen")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StateError::Database(e.to_string()))?;

        Ok(count.0.max(0) as u64)
    }
}
