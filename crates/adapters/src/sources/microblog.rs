//! X API read adapter for fetching a user's timeline

use async_trait::async_trait;
use post_relay_domain::{FetchBatch, Post, SourceAdapter, SourceError, SourceKind};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use time::OffsetDateTime;

use super::{check_status, compare_numeric_ids, max_numeric_id, parse_rfc3339, request_error};

const DEFAULT_BASE_URL: &str = "https://api.twitter.com";
/// Upper bound on pages followed when catching up after a cursor
const MAX_CATCH_UP_PAGES: usize = 20;

/// Settings for one watched account
#[derive(Debug, Clone)]
pub struct MicroblogSourceConfig {
    /// Account handle without the leading `@`
    pub handle: String,
    /// Tweets requested per poll (the API accepts 5..=100)
    pub max_results: u32,
    /// Per-request timeout
    pub timeout: Duration,
}

/// X API source for one account's timeline; the cursor is the newest tweet id
pub struct MicroblogSource {
    client: Client,
    bearer_token: SecretString,
    base_url: String,
    source_id: String,
    config: MicroblogSourceConfig,
}

impl MicroblogSource {
    pub fn new(client: Client, bearer_token: SecretString, config: MicroblogSourceConfig) -> Self {
        Self::with_base_url(client, bearer_token, DEFAULT_BASE_URL.to_string(), config)
    }

    pub fn with_base_url(
        client: Client,
        bearer_token: SecretString,
        base_url: String,
        mut config: MicroblogSourceConfig,
    ) -> Self {
        config.handle = config.handle.trim().trim_start_matches('@').to_string();
        Self {
            client,
            bearer_token,
            base_url: base_url.trim_end_matches('/').to_string(),
            source_id: SourceKind::Microblog.source_id(&config.handle),
            config,
        }
    }

    /// Look up user ID by username
    async fn get_user_id(&self) -> Result<String, SourceError> {
        let url = format!(
            "{}/2/users/by/username/{}",
            self.base_url, self.config.handle
        );

        let response = self
            .client
            .get(&url)
            .bearer_auth(self.bearer_token.expose_secret())
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(request_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(SourceError::Config(format!(
                "Unknown account: {}",
                self.config.handle
            )));
        }

        let response = check_status(response, "X").await?;

        let user_response: UserResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Fetch(e.without_url().to_string()))?;

        // The API answers 200 with only `errors` for unknown handles
        user_response.data.map(|u| u.id).ok_or_else(|| {
            SourceError::Config(format!("Unknown account: {}", self.config.handle))
        })
    }

    /// Fetch one page of tweets, newest first as the API returns them
    async fn fetch_user_tweets(
        &self,
        user_id: &str,
        since_id: Option<&str>,
        pagination_token: Option<&str>,
    ) -> Result<TweetsResponse, SourceError> {
        let url = format!("{}/2/users/{}/tweets", self.base_url, user_id);
        let max_results = self.config.max_results.clamp(5, 100).to_string();

        let mut query: Vec<(&str, &str)> = vec![
            ("tweet.fields", "created_at"),
            ("exclude", "replies"),
            ("max_results", max_results.as_str()),
        ];
        if let Some(since_id) = since_id {
            query.push(("since_id", since_id));
        }
        if let Some(token) = pagination_token {
            query.push(("pagination_token", token));
        }

        let response = self
            .client
            .get(&url)
            .query(&query)
            .bearer_auth(self.bearer_token.expose_secret())
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(request_error)?;

        let response = check_status(response, "X").await?;

        response
            .json()
            .await
            .map_err(|e| SourceError::Fetch(e.without_url().to_string()))
    }

    /// Every tweet after `since_id`, following `next_token` so a burst between
    /// polls is not cut to the newest page. Without a cursor only the newest
    /// page is taken.
    async fn fetch_all_since(
        &self,
        user_id: &str,
        since_id: Option<&str>,
    ) -> Result<Vec<Tweet>, SourceError> {
        let mut tweets = Vec::new();
        let mut next_token: Option<String> = None;

        for page in 0.. {
            let response = self
                .fetch_user_tweets(user_id, since_id, next_token.as_deref())
                .await?;
            tweets.extend(response.data.unwrap_or_default());

            next_token = response.meta.and_then(|m| m.next_token);
            if since_id.is_none() || next_token.is_none() {
                break;
            }
            if page + 1 >= MAX_CATCH_UP_PAGES {
                tracing::warn!(
                    handle = %self.config.handle,
                    pages = MAX_CATCH_UP_PAGES,
                    "Catch-up page limit reached; older posts in this burst are skipped"
                );
                break;
            }
        }

        Ok(tweets)
    }

    fn to_post(&self, tweet: Tweet) -> Post {
        let published_at =
            parse_rfc3339(tweet.created_at.as_deref()).unwrap_or_else(OffsetDateTime::now_utc);

        Post {
            source_id: self.source_id.clone(),
            kind: SourceKind::Microblog,
            url: format!("https://x.com/{}/status/{}", self.config.handle, tweet.id),
            external_id: tweet.id,
            published_at,
            author: self.config.handle.clone(),
            title: None,
            text: tweet.text,
        }
    }
}

#[derive(Deserialize)]
struct UserResponse {
    data: Option<UserData>,
}

#[derive(Deserialize)]
struct UserData {
    id: String,
}

#[derive(Deserialize)]
struct TweetsResponse {
    data: Option<Vec<Tweet>>,
    meta: Option<TweetsMeta>,
}

#[derive(Deserialize)]
struct TweetsMeta {
    next_token: Option<String>,
}

#[derive(Deserialize)]
struct Tweet {
    id: String,
    text: String,
    created_at: Option<String>,
}

#[async_trait]
impl SourceAdapter for MicroblogSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn fetch_since(&self, cursor: Option<&str>) -> Result<FetchBatch, SourceError> {
        tracing::debug!(handle = %self.config.handle, since_id = ?cursor, "Fetching posts from X");

        let user_id = self.get_user_id().await?;
        let mut tweets = self.fetch_all_since(&user_id, cursor).await?;

        // Tweet ids are chronological
        tweets.sort_by(|a, b| compare_numeric_ids(&a.id, &b.id));

        let newest = max_numeric_id(tweets.iter().map(|t| t.id.as_str()));
        let posts: Vec<Post> = tweets.into_iter().map(|t| self.to_post(t)).collect();

        tracing::debug!(handle = %self.config.handle, count = posts.len(), "Fetched posts");

        Ok(FetchBatch::new(posts, newest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source(server: &MockServer, token: &str) -> MicroblogSource {
        MicroblogSource::with_base_url(
            Client::new(),
            SecretString::new(token.into()),
            server.uri(),
            MicroblogSourceConfig {
                handle: "@testuser".to_string(),
                max_results: 5,
                timeout: Duration::from_secs(5),
            },
        )
    }

    async fn mount_user_lookup(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/2/users/by/username/testuser"))
            .and(header("Authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {
                    "id": "123456789"
                }
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_fetch_orders_oldest_first_and_reports_newest_cursor() {
        let mock_server = MockServer::start().await;
        mount_user_lookup(&mock_server).await;

        Mock::given(method("GET"))
            .and(path("/2/users/123456789/tweets"))
            .and(query_param("exclude", "replies"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {
                        "id": "1000",
                        "text": "Newer post",
                        "created_at": "2024-01-15T13:00:00Z"
                    },
                    {
                        "id": "999",
                        "text": "Hello world",
                        "created_at": "2024-01-15T12:00:00Z"
                    }
                ]
            })))
            .mount(&mock_server)
            .await;

        let source = source(&mock_server, "test-token");

        let batch = source.fetch_since(None).await.unwrap();

        assert_eq!(source.source_id(), "microblog:testuser");
        assert_eq!(batch.posts.len(), 2);
        assert_eq!(batch.posts[0].external_id, "999");
        assert_eq!(batch.posts[1].external_id, "1000");
        assert_eq!(batch.posts[0].url, "https://x.com/testuser/status/999");
        assert_eq!(batch.cursor, Some("1000".to_string()));
    }

    #[tokio::test]
    async fn test_fetch_passes_since_id() {
        let mock_server = MockServer::start().await;
        mount_user_lookup(&mock_server).await;

        Mock::given(method("GET"))
            .and(path("/2/users/123456789/tweets"))
            .and(query_param("since_id", "1000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "meta": { "result_count": 0 }
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let batch = source(&mock_server, "test-token")
            .fetch_since(Some("1000"))
            .await
            .unwrap();

        assert!(batch.posts.is_empty());
        assert_eq!(batch.cursor, None);
    }

    #[tokio::test]
    async fn test_fetch_follows_next_token_after_cursor() {
        let mock_server = MockServer::start().await;
        mount_user_lookup(&mock_server).await;

        let tweets = |ids: std::ops::RangeInclusive<u64>| {
            ids.rev()
                .map(|id| serde_json::json!({ "id": id.to_string(), "text": format!("post {}", id) }))
                .collect::<Vec<_>>()
        };

        Mock::given(method("GET"))
            .and(path("/2/users/123456789/tweets"))
            .and(query_param("pagination_token", "PAGE2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": tweets(1001..=1005),
                "meta": { "result_count": 5 }
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/2/users/123456789/tweets"))
            .and(query_param("since_id", "1000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": tweets(1006..=1010),
                "meta": { "result_count": 5, "next_token": "PAGE2" }
            })))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;

        let batch = source(&mock_server, "test-token")
            .fetch_since(Some("1000"))
            .await
            .unwrap();

        let ids: Vec<_> = batch.posts.iter().map(|p| p.external_id.clone()).collect();
        let expected: Vec<_> = (1001..=1010).map(|id: u64| id.to_string()).collect();
        assert_eq!(ids, expected);
        assert_eq!(batch.cursor, Some("1010".to_string()));
    }

    #[tokio::test]
    async fn test_first_poll_takes_only_newest_page() {
        let mock_server = MockServer::start().await;
        mount_user_lookup(&mock_server).await;

        Mock::given(method("GET"))
            .and(path("/2/users/123456789/tweets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{ "id": "50", "text": "latest" }],
                "meta": { "result_count": 1, "next_token": "OLDER" }
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let batch = source(&mock_server, "test-token").fetch_since(None).await.unwrap();

        assert_eq!(batch.posts.len(), 1);
        assert_eq!(batch.cursor, Some("50".to_string()));
    }

    #[tokio::test]
    async fn test_fetch_posts_rate_limited() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/2/users/by/username/testuser"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "60"))
            .mount(&mock_server)
            .await;

        let result = source(&mock_server, "test-token").fetch_since(None).await;

        assert!(matches!(
            result,
            Err(SourceError::RateLimited(Some(wait))) if wait == Duration::from_secs(60)
        ));
    }

    #[tokio::test]
    async fn test_fetch_posts_auth_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/2/users/by/username/testuser"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&mock_server)
            .await;

        let result = source(&mock_server, "bad-token").fetch_since(None).await;

        assert!(matches!(result, Err(SourceError::Auth(_))));
    }

    #[tokio::test]
    async fn test_unknown_handle_is_config_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/2/users/by/username/testuser"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "errors": [{ "detail": "Could not find user with username: [testuser]." }]
            })))
            .mount(&mock_server)
            .await;

        let result = source(&mock_server, "test-token").fetch_since(None).await;

        assert!(matches!(result, Err(SourceError::Config(_))));
    }

    #[tokio::test]
    async fn test_server_error_is_fetch_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/2/users/by/username/testuser"))
            .respond_with(ResponseTemplate::new(503).set_body_string("over capacity"))
            .mount(&mock_server)
            .await;

        let result = source(&mock_server, "test-token").fetch_since(None).await;

        assert!(matches!(result, Err(SourceError::Fetch(msg)) if msg.contains("503")));
    }
}
