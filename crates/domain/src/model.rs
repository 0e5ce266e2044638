//! Domain models and value objects

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use time::OffsetDateTime;

/// Kind of external source a post came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// Microblogging API (X/Twitter v2)
    Microblog,
    /// Social network Page API (Facebook Graph)
    SocialPage,
    /// Mastodon-compatible account timeline
    FederatedTimeline,
    /// RSS or Atom feed
    Feed,
}

impl SourceKind {
    /// Stable config/identity name
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Microblog => "microblog",
            SourceKind::SocialPage => "social-page",
            SourceKind::FederatedTimeline => "federated-timeline",
            SourceKind::Feed => "feed",
        }
    }

    /// Parse the `type` field of a source entry
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "microblog" => Some(SourceKind::Microblog),
            "social-page" => Some(SourceKind::SocialPage),
            "federated-timeline" => Some(SourceKind::FederatedTimeline),
            "feed" => Some(SourceKind::Feed),
            _ => None,
        }
    }

    /// Human-readable label used in delivered messages
    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::Microblog => "X",
            SourceKind::SocialPage => "Facebook",
            SourceKind::FederatedTimeline => "Mastodon",
            SourceKind::Feed => "RSS",
        }
    }

    /// Build the stable source identifier for a source-specific key
    pub fn source_id(&self, key: &str) -> String {
        format!("{}:{}", self.as_str(), key.trim())
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Globally unique identity of a post: `(source_id, external_id)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupKey {
    pub source_id: String,
    pub external_id: String,
}

impl DedupKey {
    pub fn new(source_id: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            external_id: external_id.into(),
        }
    }

    /// Encoding used as the primary key of the `seen` table.
    ///
    /// A JSON array keeps the two halves unambiguous even when either
    /// contains separators (feed URLs, Graph post ids).
    pub fn storage_key(&self) -> String {
        serde_json::json!([self.source_id, self.external_id]).to_string()
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.source_id, self.external_id)
    }
}

/// A normalized post from any source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    /// Configured source instance this post came from
    pub source_id: String,
    /// Source type
    pub kind: SourceKind,
    /// Source-native identifier (tweet id, status id, entry guid)
    pub external_id: String,
    /// Origin timestamp, only used for ordering within a batch
    #[serde(with = "time::serde::rfc3339")]
    pub published_at: OffsetDateTime,
    /// Author handle or display name
    pub author: String,
    /// Optional headline (feed entries)
    pub title: Option<String>,
    /// Plain-text body
    pub text: String,
    /// Link to the original item
    pub url: String,
}

impl Post {
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey::new(self.source_id.clone(), self.external_id.clone())
    }

    /// Text the keyword filter looks at: title and body
    pub fn searchable_text(&self) -> String {
        match &self.title {
            Some(title) if !title.is_empty() => format!("{}\n{}", title, self.text),
            _ => self.text.clone(),
        }
    }
}

/// Result of one adapter fetch
#[derive(Debug, Clone, Default)]
pub struct FetchBatch {
    /// Posts ordered oldest to newest
    pub posts: Vec<Post>,
    /// Cursor to store once the batch is committed, if the adapter has one
    pub cursor: Option<String>,
}

impl FetchBatch {
    pub fn new(posts: Vec<Post>, cursor: Option<String>) -> Self {
        Self { posts, cursor }
    }
}

/// Per-source progress marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub source_id: String,
    /// Opaque value understood only by the source's adapter
    pub value: String,
}

/// Record of a delivered post
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeenRecord {
    pub key: DedupKey,
    #[serde(with = "time::serde::rfc3339")]
    pub delivered_at: OffsetDateTime,
}

/// Why a source was skipped for a cycle
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    Config(String),
    Auth(String),
    RateLimited(Option<Duration>),
    Fetch(String),
    State(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Config(msg) => write!(f, "configuration error: {}", msg),
            SkipReason::Auth(msg) => write!(f, "authentication failed: {}", msg),
            SkipReason::RateLimited(Some(wait)) => {
                write!(f, "rate limited, resets in {}s", wait.as_secs())
            }
            SkipReason::RateLimited(None) => f.write_str("rate limited"),
            SkipReason::Fetch(msg) => write!(f, "fetch failed: {}", msg),
            SkipReason::State(msg) => write!(f, "state store error: {}", msg),
        }
    }
}

/// Outcome of one source's pass through the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum SourceOutcome {
    /// All new posts were delivered and committed
    Completed {
        fetched: usize,
        matched: usize,
        delivered: usize,
        cursor_advanced: bool,
    },
    /// The fetch failed; nothing was mutated
    Skipped { reason: SkipReason },
    /// Delivery or commit failed part way; earlier deliveries stay committed
    Aborted { delivered: usize, error: String },
    /// The source was disabled earlier in this process
    Disabled,
}

impl SourceOutcome {
    pub fn delivered(&self) -> usize {
        match self {
            SourceOutcome::Completed { delivered, .. } | SourceOutcome::Aborted { delivered, .. } => {
                *delivered
            }
            SourceOutcome::Skipped { .. } | SourceOutcome::Disabled => 0,
        }
    }
}

/// Report for one full dispatcher cycle
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub outcomes: Vec<(String, SourceOutcome)>,
}

impl CycleReport {
    pub fn delivered(&self) -> usize {
        self.outcomes.iter().map(|(_, o)| o.delivered()).sum()
    }

    pub fn outcome(&self, source_id: &str) -> Option<&SourceOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| id == source_id)
            .map(|(_, outcome)| outcome)
    }
}
