//! Dry-run sink: logs what would be delivered

use async_trait::async_trait;
use post_relay_domain::usecases::Renderer;
use post_relay_domain::{DeliveryError, DeliverySink, Post};
use std::sync::atomic::{AtomicU64, Ordering};

pub struct LogSink {
    renderer: Renderer,
    delivered: AtomicU64,
}

impl LogSink {
    pub fn new(renderer: Renderer) -> Self {
        Self {
            renderer,
            delivered: AtomicU64::new(0),
        }
    }

    /// Posts "delivered" so far
    pub fn count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DeliverySink for LogSink {
    async fn send(&self, post: &Post) -> Result<(), DeliveryError> {
        let text = self.renderer.render_plain(post);
        tracing::info!(
            source_id = %post.source_id,
            external_id = %post.external_id,
            "[DRY RUN] Would deliver:\n{}",
            text
        );
        self.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "dry-run"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use post_relay_domain::SourceKind;
    use post_relay_domain::usecases::RenderConfig;
    use time::OffsetDateTime;

    #[tokio::test]
    async fn test_log_sink_counts_without_sending() {
        let sink = LogSink::new(Renderer::new(RenderConfig::default()));
        let post = Post {
            source_id: "feed:https://a.example/rss".to_string(),
            kind: SourceKind::Feed,
            external_id: "1".to_string(),
            published_at: OffsetDateTime::UNIX_EPOCH,
            author: "A".to_string(),
            title: Some("Hello".to_string()),
            text: String::new(),
            url: "https://a.example/1".to_string(),
        };

        sink.send(&post).await.unwrap();
        sink.send(&post).await.unwrap();

        assert_eq!(sink.count(), 2);
        assert_eq!(sink.name(), "dry-run");
    }
}
