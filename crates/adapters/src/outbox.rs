//! Outbox sink: appends rendered posts to a JSONL file instead of sending them

use async_trait::async_trait;
use post_relay_domain::usecases::Renderer;
use post_relay_domain::{DeliveryError, DeliverySink, Post};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct OutboxWriter {
    path: PathBuf,
    file: Arc<Mutex<tokio::fs::File>>,
}

impl OutboxWriter {
    pub async fn new(path: PathBuf) -> Result<Self, OutboxError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        Ok(Self {
            path,
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, entry: &OutboxEntry<'_>) -> Result<(), OutboxError> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Delivery sink that records each post as one JSON line
#[derive(Debug, Clone)]
pub struct OutboxSink {
    writer: OutboxWriter,
    renderer: Renderer,
}

impl OutboxSink {
    pub fn new(writer: OutboxWriter, renderer: Renderer) -> Self {
        Self { writer, renderer }
    }
}

#[derive(Serialize)]
struct OutboxEntry<'a> {
    id: String,
    queued_at: String,
    source_id: &'a str,
    external_id: &'a str,
    url: &'a str,
    text: String,
}

#[async_trait]
impl DeliverySink for OutboxSink {
    async fn send(&self, post: &Post) -> Result<(), DeliveryError> {
        let queued_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(|e| DeliveryError::Rejected(e.to_string()))?;

        let entry = OutboxEntry {
            id: Uuid::new_v4().to_string(),
            queued_at,
            source_id: &post.source_id,
            external_id: &post.external_id,
            url: &post.url,
            text: self.renderer.render_plain(post),
        };

        self.writer
            .append(&entry)
            .await
            .map_err(|error| DeliveryError::Unavailable(format!("Outbox write failed: {}", error)))
    }

    fn name(&self) -> &'static str {
        "outbox"
    }
}
