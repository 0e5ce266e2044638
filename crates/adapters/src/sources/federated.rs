//! Mastodon-compatible account timeline adapter
//!
//! The cursor is passed as `min_id`, which returns the page directly after it.
//! A burst larger than one page drains over the following polls instead of
//! losing its older half. Pagination on these servers is not guaranteed to be
//! stable, so the dedup store stays the real guard.

use async_trait::async_trait;
use post_relay_domain::{FetchBatch, Post, SourceAdapter, SourceError, SourceKind};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use time::OffsetDateTime;

use super::{
    check_status, compare_numeric_ids, max_numeric_id, parse_rfc3339, request_error, strip_html,
};

/// Settings for one watched account
#[derive(Debug, Clone)]
pub struct FederatedSourceConfig {
    /// Instance base URL, e.g. `https://mastodon.social`
    pub base_url: String,
    /// Account name as accepted by `accounts/lookup` (`user` or `user@host`)
    pub account: String,
    /// Statuses requested per poll (servers cap this at 40)
    pub limit: u32,
    /// Per-request timeout
    pub timeout: Duration,
}

/// Account statuses source
pub struct FederatedTimelineSource {
    client: Client,
    access_token: SecretString,
    source_id: String,
    config: FederatedSourceConfig,
}

impl FederatedTimelineSource {
    pub fn new(
        client: Client,
        access_token: SecretString,
        mut config: FederatedSourceConfig,
    ) -> Self {
        config.base_url = config.base_url.trim().trim_end_matches('/').to_string();
        config.account = config.account.trim().trim_start_matches('@').to_string();

        let host = config
            .base_url
            .split("://")
            .nth(1)
            .unwrap_or(config.base_url.as_str())
            .to_string();

        Self {
            client,
            access_token,
            source_id: SourceKind::FederatedTimeline
                .source_id(&format!("{}/{}", host, config.account)),
            config,
        }
    }

    async fn lookup_account(&self) -> Result<String, SourceError> {
        let url = format!("{}/api/v1/accounts/lookup", self.config.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[("acct", self.config.account.as_str())])
            .bearer_auth(self.access_token.expose_secret())
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(request_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(SourceError::Config(format!(
                "Unknown account: {}",
                self.config.account
            )));
        }

        let response = check_status(response, "Mastodon").await?;

        let account: Account = response
            .json()
            .await
            .map_err(|e| SourceError::Fetch(e.without_url().to_string()))?;

        Ok(account.id)
    }

    async fn fetch_statuses(
        &self,
        account_id: &str,
        min_id: Option<&str>,
    ) -> Result<Vec<Status>, SourceError> {
        let url = format!(
            "{}/api/v1/accounts/{}/statuses",
            self.config.base_url, account_id
        );
        let limit = self.config.limit.clamp(1, 40).to_string();

        let mut query: Vec<(&str, &str)> = vec![("limit", limit.as_str())];
        if let Some(min_id) = min_id {
            query.push(("min_id", min_id));
        }

        let response = self
            .client
            .get(&url)
            .query(&query)
            .bearer_auth(self.access_token.expose_secret())
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(request_error)?;

        let response = check_status(response, "Mastodon").await?;

        response
            .json()
            .await
            .map_err(|e| SourceError::Fetch(e.without_url().to_string()))
    }

    fn to_post(&self, status: Status) -> Option<Post> {
        let url = status.url.or(status.uri)?;
        let published_at =
            parse_rfc3339(status.created_at.as_deref()).unwrap_or_else(OffsetDateTime::now_utc);

        Some(Post {
            source_id: self.source_id.clone(),
            kind: SourceKind::FederatedTimeline,
            external_id: status.id,
            published_at,
            author: status
                .account
                .map(|a| a.acct)
                .unwrap_or_else(|| self.config.account.clone()),
            title: None,
            text: strip_html(&status.content),
            url,
        })
    }
}

#[derive(Deserialize)]
struct Account {
    id: String,
}

#[derive(Deserialize)]
struct StatusAccount {
    acct: String,
}

#[derive(Deserialize)]
struct Status {
    id: String,
    created_at: Option<String>,
    #[serde(default)]
    content: String,
    url: Option<String>,
    uri: Option<String>,
    account: Option<StatusAccount>,
}

#[async_trait]
impl SourceAdapter for FederatedTimelineSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn fetch_since(&self, cursor: Option<&str>) -> Result<FetchBatch, SourceError> {
        tracing::debug!(account = %self.config.account, min_id = ?cursor, "Fetching statuses");

        let account_id = self.lookup_account().await?;
        let mut statuses = self.fetch_statuses(&account_id, cursor).await?;
        statuses.sort_by(|a, b| compare_numeric_ids(&a.id, &b.id));

        let newest = max_numeric_id(statuses.iter().map(|s| s.id.as_str()))
            .or_else(|| cursor.map(String::from));
        let posts = statuses
            .into_iter()
            .filter_map(|status| self.to_post(status))
            .collect();

        Ok(FetchBatch::new(posts, newest))
    }
}
