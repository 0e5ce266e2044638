//! Dispatch use case - fetch, filter, dedup, deliver, commit for every source

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use futures::stream::{self, StreamExt};
use tokio::time::{Duration, timeout};

use crate::{
    filter::{self, FilterConfig},
    model::{CycleReport, Cursor, FetchBatch, Post, SeenRecord, SkipReason, SourceOutcome},
    ports::{Clock, DeliverySink, SourceAdapter, SourceError, StateStore},
};

/// A source adapter paired with its filter
#[derive(Clone)]
pub struct ConfiguredSource {
    pub adapter: Arc<dyn SourceAdapter>,
    pub filter: FilterConfig,
}

impl ConfiguredSource {
    pub fn new(adapter: Arc<dyn SourceAdapter>, filter: FilterConfig) -> Self {
        Self { adapter, filter }
    }

    pub fn source_id(&self) -> &str {
        self.adapter.source_id()
    }
}

/// Configuration for the dispatcher
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Upper bound for one adapter fetch
    pub fetch_timeout: Duration,
    /// Sources processed at the same time (1 = sequential)
    pub max_concurrent_sources: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(30),
            max_concurrent_sources: 1,
        }
    }
}

/// Dispatcher orchestrator
pub struct Dispatcher<St, Sk, Cl>
where
    St: StateStore + ?Sized,
    Sk: DeliverySink + ?Sized,
    Cl: Clock + ?Sized,
{
    sources: Vec<ConfiguredSource>,
    store: Arc<St>,
    sink: Arc<Sk>,
    clock: Arc<Cl>,
    config: DispatcherConfig,
    disabled: Mutex<HashSet<String>>,
}

impl<St, Sk, Cl> Dispatcher<St, Sk, Cl>
where
    St: StateStore + ?Sized,
    Sk: DeliverySink + ?Sized,
    Cl: Clock + ?Sized,
{
    pub fn new(
        sources: Vec<ConfiguredSource>,
        store: Arc<St>,
        sink: Arc<Sk>,
        clock: Arc<Cl>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            sources,
            store,
            sink,
            clock,
            config,
            disabled: Mutex::new(HashSet::new()),
        }
    }

    /// Run one cycle over all sources. Per-source failures are reported, not returned.
    pub async fn run_cycle(&self) -> CycleReport {
        let max_concurrent = self.config.max_concurrent_sources.max(1);

        let outcomes = stream::iter(self.sources.iter())
            .map(|source| async move {
                let source_id = source.source_id().to_string();
                let outcome = self.poll_source(source).await;
                (source_id, outcome)
            })
            .buffered(max_concurrent)
            .collect::<Vec<_>>()
            .await;

        let report = CycleReport { outcomes };

        tracing::info!(
            sources = report.outcomes.len(),
            delivered = report.delivered(),
            "Cycle complete"
        );

        report
    }

    /// Whether a source was disabled by an auth or config error
    pub fn is_disabled(&self, source_id: &str) -> bool {
        self.disabled
            .lock()
            .map(|set| set.contains(source_id))
            .unwrap_or(false)
    }

    fn disable(&self, source_id: &str) {
        if let Ok(mut set) = self.disabled.lock() {
            set.insert(source_id.to_string());
        }
    }

    /// Run the pipeline for a single source
    async fn poll_source(&self, source: &ConfiguredSource) -> SourceOutcome {
        let source_id = source.source_id();

        if self.is_disabled(source_id) {
            tracing::debug!(source = %source_id, "Source disabled, skipping");
            return SourceOutcome::Disabled;
        }

        // Fetching
        let stored = match self.store.get_cursor(source_id).await {
            Ok(cursor) => cursor.map(|c| c.value),
            Err(e) => {
                tracing::error!(source = %source_id, error = %e, "Failed to read cursor");
                return SourceOutcome::Skipped {
                    reason: SkipReason::State(e.to_string()),
                };
            }
        };

        tracing::debug!(source = %source_id, cursor = ?stored, "Fetching");

        let batch = match self.fetch(source, stored.as_deref()).await {
            Ok(batch) => batch,
            Err(e) => return self.skip(source_id, e),
        };

        let FetchBatch { posts, cursor } = batch;
        let fetched = posts.len();

        // Filtering
        let mut posts: Vec<Post> = posts
            .into_iter()
            .filter(|post| filter::matches(post, &source.filter))
            .collect();
        posts.sort_by_key(|post| post.published_at);
        let matched = posts.len();

        // Deduping
        let mut batch_keys = HashSet::new();
        let mut fresh = Vec::with_capacity(posts.len());
        for post in posts {
            let key = post.dedup_key();
            if !batch_keys.insert(key.clone()) {
                continue;
            }
            match self.store.is_seen(&key).await {
                Ok(true) => {}
                Ok(false) => fresh.push(post),
                Err(e) => {
                    tracing::error!(source = %source_id, error = %e, "Failed to check seen state");
                    return SourceOutcome::Aborted {
                        delivered: 0,
                        error: e.to_string(),
                    };
                }
            }
        }

        tracing::info!(
            source = %source_id,
            fetched,
            matched,
            new = fresh.len(),
            "Fetched posts"
        );

        // Delivering, one commit per post
        let mut delivered = 0;
        for post in &fresh {
            if let Err(error) = self.deliver(post).await {
                tracing::error!(
                    source = %source_id,
                    external_id = %post.external_id,
                    delivered,
                    error = %error,
                    "Delivery aborted for this cycle"
                );
                return SourceOutcome::Aborted { delivered, error };
            }
            delivered += 1;
        }

        // Committing the cursor
        let mut cursor_advanced = false;
        if let Some(value) = cursor.filter(|value| stored.as_deref() != Some(value.as_str())) {
            let cursor = Cursor {
                source_id: source_id.to_string(),
                value,
            };
            if let Err(e) = self.store.set_cursor(&cursor).await {
                tracing::error!(source = %source_id, error = %e, "Failed to store cursor");
                return SourceOutcome::Aborted {
                    delivered,
                    error: e.to_string(),
                };
            }
            cursor_advanced = true;
        }

        SourceOutcome::Completed {
            fetched,
            matched,
            delivered,
            cursor_advanced,
        }
    }

    async fn fetch(
        &self,
        source: &ConfiguredSource,
        cursor: Option<&str>,
    ) -> Result<FetchBatch, SourceError> {
        match timeout(self.config.fetch_timeout, source.adapter.fetch_since(cursor)).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Fetch(format!(
                "timed out after {}s",
                self.config.fetch_timeout.as_secs()
            ))),
        }
    }

    /// Send one post and mark it seen before the next send
    async fn deliver(&self, post: &Post) -> Result<(), String> {
        self.sink.send(post).await.map_err(|e| e.to_string())?;

        let record = SeenRecord {
            key: post.dedup_key(),
            delivered_at: self.clock.now(),
        };
        self.store
            .mark_seen(&record)
            .await
            .map_err(|e| format!("delivered but not recorded: {}", e))?;

        tracing::info!(
            source = %post.source_id,
            external_id = %post.external_id,
            sink = self.sink.name(),
            "Delivered"
        );

        Ok(())
    }

    fn skip(&self, source_id: &str, error: SourceError) -> SourceOutcome {
        if error.disables_source() {
            tracing::warn!(source = %source_id, error = %error, "Disabling source until restart");
            self.disable(source_id);
        } else {
            tracing::warn!(source = %source_id, error = %error, "Skipping source this cycle");
        }

        let reason = match error {
            SourceError::Config(msg) => SkipReason::Config(msg),
            SourceError::Auth(msg) => SkipReason::Auth(msg),
            SourceError::RateLimited(wait) => SkipReason::RateLimited(wait),
            SourceError::Fetch(msg) => SkipReason::Fetch(msg),
        };

        SourceOutcome::Skipped { reason }
    }
}
