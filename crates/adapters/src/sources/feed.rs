//! RSS and Atom feed adapter
//!
//! Feeds have no server-side "since" filter. The cursor records the last
//! successful fetch time and the dedup store does the real filtering.

use async_trait::async_trait;
use post_relay_domain::{FetchBatch, Post, SourceAdapter, SourceError, SourceKind, stable_id};
use reqwest::Client;
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::{check_status, request_error, strip_html};

/// Settings for one feed
#[derive(Debug, Clone)]
pub struct FeedSourceConfig {
    pub url: String,
    /// Display name; falls back to the feed's own title
    pub name: Option<String>,
    /// Entries considered per poll, taken from the top of the document
    pub max_items: usize,
    /// On the first poll, entries older than this are not relayed
    pub initial_max_age: Duration,
    /// Per-request timeout
    pub timeout: Duration,
}

pub struct FeedSource {
    client: Client,
    source_id: String,
    config: FeedSourceConfig,
}

impl FeedSource {
    pub fn new(client: Client, mut config: FeedSourceConfig) -> Self {
        config.url = config.url.trim().to_string();
        Self {
            client,
            source_id: SourceKind::Feed.source_id(&config.url),
            config,
        }
    }

    async fn download(&self) -> Result<feed_rs::model::Feed, SourceError> {
        let response = self
            .client
            .get(&self.config.url)
            .header("User-Agent", concat!("post-relay/", env!("CARGO_PKG_VERSION")))
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(request_error)?;

        let response = check_status(response, "Feed").await?;
        let bytes = response.bytes().await.map_err(request_error)?;

        parse_feed(&bytes)
    }

    fn to_post(&self, entry: feed_rs::model::Entry, author: &str, now: OffsetDateTime) -> Post {
        let link = entry.links.first().map(|l| l.href.clone());
        let title = entry
            .title
            .map(|t| strip_html(&t.content))
            .filter(|t| !t.is_empty());

        let published_at = entry
            .published
            .or(entry.updated)
            .and_then(|dt| OffsetDateTime::from_unix_timestamp(dt.timestamp()).ok())
            .unwrap_or(now);

        let body = entry
            .summary
            .map(|s| s.content)
            .or_else(|| entry.content.and_then(|c| c.body))
            .unwrap_or_default();

        let external_id = if !entry.id.trim().is_empty() {
            entry.id.trim().to_string()
        } else if let Some(link) = &link {
            link.clone()
        } else {
            stable_id(&[
                &self.config.url,
                title.as_deref().unwrap_or_default(),
                body.trim(),
            ])
        };

        Post {
            source_id: self.source_id.clone(),
            kind: SourceKind::Feed,
            external_id,
            published_at,
            author: author.to_string(),
            title,
            text: strip_html(&body),
            url: link.unwrap_or_else(|| self.config.url.clone()),
        }
    }
}

/// Parse a feed document, leaving ids empty where the document has none.
/// The parser's own fallback hashes the title or invents a random id, and
/// neither survives a refetch.
fn parse_feed(bytes: &[u8]) -> Result<feed_rs::model::Feed, SourceError> {
    feed_rs::parser::Builder::new()
        .id_generator(|_, _, _| String::new())
        .build()
        .parse(bytes)
        .map_err(|e| SourceError::Fetch(format!("Failed to parse feed: {}", e)))
}

#[async_trait]
impl SourceAdapter for FeedSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn fetch_since(&self, cursor: Option<&str>) -> Result<FetchBatch, SourceError> {
        tracing::debug!(url = %self.config.url, last_fetch = ?cursor, "Fetching feed");

        let now = OffsetDateTime::now_utc();
        let feed = self.download().await?;

        let author = self
            .config
            .name
            .clone()
            .or_else(|| feed.title.as_ref().map(|t| t.content.trim().to_string()))
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.config.url.clone());

        let mut posts: Vec<Post> = feed
            .entries
            .into_iter()
            .take(self.config.max_items)
            .map(|entry| self.to_post(entry, &author, now))
            .collect();
        // Documents list newest first; the stable sort keeps that tiebreak sane
        posts.reverse();
        posts.sort_by_key(|post| post.published_at);

        // An age too large to represent means nothing is old enough to skip
        let cutoff = time::Duration::try_from(self.config.initial_max_age)
            .ok()
            .and_then(|age| now.checked_sub(age));

        if let (None, Some(cutoff)) = (cursor, cutoff) {
            let before = posts.len();
            posts.retain(|post| post.published_at >= cutoff);
            if posts.len() < before {
                tracing::info!(
                    url = %self.config.url,
                    skipped = before - posts.len(),
                    "First poll: skipping old entries"
                );
            }
        }

        let fetched_at = now
            .format(&Rfc3339)
            .map_err(|e| SourceError::Fetch(e.to_string()))?;

        Ok(FetchBatch::new(posts, Some(fetched_at)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Example Wire</title>
    <link>https://wire.example.com</link>
    <description>Headlines</description>
    <item>
      <title>Markets rally</title>
      <link>https://wire.example.com/markets</link>
      <guid>wire-2</guid>
      <pubDate>Mon, 15 Jan 2024 13:00:00 GMT</pubDate>
      <description>&lt;p&gt;Stocks &amp;amp; bonds up&lt;/p&gt;</description>
    </item>
    <item>
      <title>Morning briefing</title>
      <link>https://wire.example.com/briefing</link>
      <guid>wire-1</guid>
      <pubDate>Mon, 15 Jan 2024 12:00:00 GMT</pubDate>
      <description>Coffee first</description>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Desk</title>
  <id>urn:desk</id>
  <updated>2099-01-01T00:00:00Z</updated>
  <entry>
    <title>From the future</title>
    <id>urn:desk:2</id>
    <link href="https://desk.example.com/2"/>
    <updated>2099-01-01T00:00:00Z</updated>
    <summary>Fresh</summary>
  </entry>
  <entry>
    <title>From the archive</title>
    <id>urn:desk:1</id>
    <link href="https://desk.example.com/1"/>
    <updated>2020-01-01T00:00:00Z</updated>
    <summary>Stale</summary>
  </entry>
</feed>"#;

    const RSS_WITHOUT_GUIDS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Bare Wire</title>
    <link>https://wire.example.com</link>
    <description>Headlines</description>
    <item>
      <title>Linked headline</title>
      <link>https://wire.example.com/a</link>
      <pubDate>Mon, 15 Jan 2024 13:00:00 GMT</pubDate>
      <description>Has a link</description>
    </item>
    <item>
      <pubDate>Mon, 15 Jan 2024 12:00:00 GMT</pubDate>
      <description>Only a description</description>
    </item>
  </channel>
</rss>"#;

    fn source(server: &MockServer, file: &str, name: Option<&str>) -> FeedSource {
        FeedSource::new(
            Client::new(),
            FeedSourceConfig {
                url: format!("{}/{}", server.uri(), file),
                name: name.map(String::from),
                max_items: 20,
                initial_max_age: Duration::from_secs(24 * 60 * 60),
                timeout: Duration::from_secs(5),
            },
        )
    }

    async fn serve(server: &MockServer, file: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/{}", file)))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_rss_entries_oldest_first_with_guids() {
        let mock_server = MockServer::start().await;
        serve(&mock_server, "rss.xml", RSS).await;

        let source = source(&mock_server, "rss.xml", None);
        let batch = source.fetch_since(Some("2024-01-01T00:00:00Z")).await.unwrap();

        assert!(source.source_id().starts_with("feed:http://"));
        let ids: Vec<_> = batch.posts.iter().map(|p| p.external_id.as_str()).collect();
        assert_eq!(ids, vec!["wire-1", "wire-2"]);

        let latest = &batch.posts[1];
        assert_eq!(latest.title.as_deref(), Some("Markets rally"));
        assert_eq!(latest.text, "Stocks & bonds up");
        assert_eq!(latest.author, "Example Wire");
        assert_eq!(latest.url, "https://wire.example.com/markets");

        let cursor = batch.cursor.unwrap();
        assert!(OffsetDateTime::parse(&cursor, &Rfc3339).is_ok());
    }

    #[tokio::test]
    async fn test_first_poll_skips_old_entries() {
        let mock_server = MockServer::start().await;
        serve(&mock_server, "atom.xml", ATOM).await;

        let source = source(&mock_server, "atom.xml", Some("Desk"));

        let first = source.fetch_since(None).await.unwrap();
        let ids: Vec<_> = first.posts.iter().map(|p| p.external_id.as_str()).collect();
        assert_eq!(ids, vec!["urn:desk:2"]);
        assert_eq!(first.posts[0].author, "Desk");
        assert!(first.cursor.is_some());

        let later = source.fetch_since(first.cursor.as_deref()).await.unwrap();
        assert_eq!(later.posts.len(), 2);
    }

    #[tokio::test]
    async fn test_max_items_takes_top_of_document() {
        let mock_server = MockServer::start().await;
        serve(&mock_server, "atom.xml", ATOM).await;

        let mut source = source(&mock_server, "atom.xml", None);
        source.config.max_items = 1;

        let batch = source.fetch_since(Some("x")).await.unwrap();

        assert_eq!(batch.posts.len(), 1);
        assert_eq!(batch.posts[0].external_id, "urn:desk:2");
    }

    #[tokio::test]
    async fn test_entries_without_guid_keep_their_id_across_fetches() {
        let mock_server = MockServer::start().await;
        serve(&mock_server, "bare.xml", RSS_WITHOUT_GUIDS).await;

        let source = source(&mock_server, "bare.xml", None);
        let first = source.fetch_since(Some("x")).await.unwrap();
        let second = source.fetch_since(Some("x")).await.unwrap();

        let ids = |batch: &FetchBatch| -> Vec<String> {
            batch.posts.iter().map(|p| p.external_id.clone()).collect()
        };
        assert_eq!(ids(&first), ids(&second));

        // Oldest first: the description-only item, then the linked one
        assert_eq!(first.posts[1].external_id, "https://wire.example.com/a");
        let feed_url = format!("{}/bare.xml", mock_server.uri());
        assert_eq!(
            first.posts[0].external_id,
            stable_id(&[&feed_url, "", "Only a description"])
        );
        assert_eq!(first.posts[0].url, feed_url);
    }

    #[tokio::test]
    async fn test_huge_initial_age_keeps_everything() {
        let mock_server = MockServer::start().await;
        serve(&mock_server, "atom.xml", ATOM).await;

        let mut source = source(&mock_server, "atom.xml", None);
        source.config.initial_max_age = Duration::from_secs(u64::MAX);

        let batch = source.fetch_since(None).await.unwrap();

        assert_eq!(batch.posts.len(), 2);
    }

    #[tokio::test]
    async fn test_unparseable_body_is_fetch_error() {
        let mock_server = MockServer::start().await;
        serve(&mock_server, "broken.xml", "this is not a feed").await;

        let result = source(&mock_server, "broken.xml", None)
            .fetch_since(None)
            .await;

        assert!(matches!(result, Err(SourceError::Fetch(msg)) if msg.contains("parse")));
    }

    #[tokio::test]
    async fn test_missing_feed_is_fetch_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let result = source(&mock_server, "gone.xml", None).fetch_since(None).await;

        assert!(matches!(result, Err(SourceError::Fetch(msg)) if msg.contains("404")));
    }
}
