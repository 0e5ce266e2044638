//! Facebook Graph API adapter for public Page posts

use async_trait::async_trait;
use post_relay_domain::{FetchBatch, Post, SourceAdapter, SourceError, SourceKind};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use time::OffsetDateTime;

use super::{parse_rfc3339, request_error};

const DEFAULT_BASE_URL: &str = "https://graph.facebook.com";
const DEFAULT_API_VERSION: &str = "v19.0";
/// Upper bound on `paging.next` links followed when catching up after a cursor
const MAX_CATCH_UP_PAGES: usize = 20;

/// Graph error codes that mean the token is unusable
const AUTH_ERROR_CODES: &[i64] = &[102, 190];
/// Graph error codes for application/user/page throttling
const RATE_LIMIT_ERROR_CODES: &[i64] = &[4, 17, 32, 613];

/// Settings for one watched page
#[derive(Debug, Clone)]
pub struct SocialPageSourceConfig {
    /// Page username or numeric id
    pub page: String,
    /// Posts requested per poll
    pub limit: u32,
    /// Per-request timeout
    pub timeout: Duration,
}

/// Page posts source; the cursor is the unix time of the newest post
pub struct SocialPageSource {
    client: Client,
    access_token: SecretString,
    base_url: String,
    source_id: String,
    config: SocialPageSourceConfig,
}

impl SocialPageSource {
    pub fn new(client: Client, access_token: SecretString, config: SocialPageSourceConfig) -> Self {
        Self::with_base_url(
            client,
            access_token,
            format!("{}/{}", DEFAULT_BASE_URL, DEFAULT_API_VERSION),
            config,
        )
    }

    /// `base_url` includes the API version segment
    pub fn with_base_url(
        client: Client,
        access_token: SecretString,
        base_url: String,
        mut config: SocialPageSourceConfig,
    ) -> Self {
        config.page = config.page.trim().to_string();
        Self {
            client,
            access_token,
            base_url: base_url.trim_end_matches('/').to_string(),
            source_id: SourceKind::SocialPage.source_id(&config.page),
            config,
        }
    }

    /// Posts newer than `since`, following `paging.next` so a burst between
    /// polls is not cut to the newest page. Without a cursor only the newest
    /// page is taken.
    async fn fetch_posts(&self, since: Option<&str>) -> Result<Vec<PagePost>, SourceError> {
        let url = format!("{}/{}/posts", self.base_url, self.config.page);
        let limit = self.config.limit.clamp(1, 100).to_string();

        let mut query: Vec<(&str, &str)> = vec![
            ("access_token", self.access_token.expose_secret()),
            ("fields", "id,message,permalink_url,created_time"),
            ("limit", limit.as_str()),
        ];
        if let Some(since) = since {
            query.push(("since", since));
        }

        let mut page = self.get_page(self.client.get(&url).query(&query)).await?;
        let mut items = std::mem::take(&mut page.data);

        let mut pages = 1;
        while let Some(next) = page.paging.and_then(|p| p.next) {
            if since.is_none() {
                break;
            }
            if pages >= MAX_CATCH_UP_PAGES {
                tracing::warn!(
                    page = %self.config.page,
                    pages = MAX_CATCH_UP_PAGES,
                    "Catch-up page limit reached; older posts in this burst are skipped"
                );
                break;
            }

            // The next link already carries the token and query
            page = self.get_page(self.client.get(&next)).await?;
            items.append(&mut page.data);
            pages += 1;
        }

        Ok(items)
    }

    async fn get_page(&self, request: reqwest::RequestBuilder) -> Result<PostsResponse, SourceError> {
        let response = request
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(request_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_graph_error(status, &body));
        }

        response
            .json()
            .await
            .map_err(|e| SourceError::Fetch(e.without_url().to_string()))
    }

    fn to_post(&self, item: PagePost) -> Option<Post> {
        let url = item.permalink_url?;
        let published_at =
            parse_graph_time(item.created_time.as_deref()).unwrap_or_else(OffsetDateTime::now_utc);

        Some(Post {
            source_id: self.source_id.clone(),
            kind: SourceKind::SocialPage,
            external_id: item.id,
            published_at,
            author: self.config.page.clone(),
            title: None,
            text: item.message.unwrap_or_default(),
            url,
        })
    }
}

/// Graph reports most failures as 400 with a typed error body
fn classify_graph_error(status: reqwest::StatusCode, body: &str) -> SourceError {
    let code = serde_json::from_str::<GraphErrorResponse>(body)
        .ok()
        .map(|e| (e.error.code, e.error.message));

    match code {
        Some((code, message)) if AUTH_ERROR_CODES.contains(&code) => {
            SourceError::Auth(format!("Facebook error {}: {}", code, message))
        }
        Some((code, _)) if RATE_LIMIT_ERROR_CODES.contains(&code) => {
            SourceError::RateLimited(None)
        }
        Some((code, message)) if code == 100 => {
            SourceError::Config(format!("Facebook rejected the page request: {}", message))
        }
        _ if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN =>
        {
            SourceError::Auth(format!("Facebook returned {}", status))
        }
        _ if status == reqwest::StatusCode::TOO_MANY_REQUESTS => SourceError::RateLimited(None),
        Some((code, message)) => {
            SourceError::Fetch(format!("Facebook error {} ({}): {}", code, status, message))
        }
        None => SourceError::Fetch(format!("Facebook returned {}", status)),
    }
}

/// Graph timestamps look like `2024-01-15T12:00:00+0000`
fn parse_graph_time(value: Option<&str>) -> Option<OffsetDateTime> {
    let value = value?;
    let format = time::format_description::parse(
        "[year]-[month]-[day]T[hour]:[minute]:[second][offset_hour sign:mandatory][offset_minute]",
    )
    .ok()?;

    OffsetDateTime::parse(value, &format)
        .ok()
        .or_else(|| parse_rfc3339(Some(value)))
}

#[derive(Deserialize)]
struct PostsResponse {
    #[serde(default)]
    data: Vec<PagePost>,
    paging: Option<Paging>,
}

#[derive(Deserialize)]
struct Paging {
    next: Option<String>,
}

#[derive(Deserialize)]
struct PagePost {
    id: String,
    message: Option<String>,
    permalink_url: Option<String>,
    created_time: Option<String>,
}

#[derive(Deserialize)]
struct GraphErrorResponse {
    error: GraphError,
}

#[derive(Deserialize)]
struct GraphError {
    #[serde(default)]
    message: String,
    code: i64,
}

#[async_trait]
impl SourceAdapter for SocialPageSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn fetch_since(&self, cursor: Option<&str>) -> Result<FetchBatch, SourceError> {
        tracing::debug!(page = %self.config.page, since = ?cursor, "Fetching page posts");

        let items = self.fetch_posts(cursor).await?;

        let mut posts: Vec<Post> = items
            .into_iter()
            .filter_map(|item| self.to_post(item))
            .collect();
        // The API lists newest first
        posts.reverse();
        posts.sort_by_key(|post| post.published_at);

        let newest = posts
            .iter()
            .map(|post| post.published_at.unix_timestamp())
            .max()
            .map(|ts| ts.to_string())
            .or_else(|| cursor.map(String::from));

        Ok(FetchBatch::new(posts, newest))
    }
}
