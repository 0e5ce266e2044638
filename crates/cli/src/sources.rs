//! Turn `[[sources]]` entries into configured source adapters

use anyhow::{Context, Result, anyhow, bail};
use post_relay_adapters::sources::{
    FeedSource, FeedSourceConfig, FederatedSourceConfig, FederatedTimelineSource,
    MicroblogSource, MicroblogSourceConfig, SocialPageSource, SocialPageSourceConfig,
};
use post_relay_domain::usecases::ConfiguredSource;
use post_relay_domain::{FilterConfig, MatchMode, SourceAdapter, SourceKind};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{AppConfig, SourceEntry, load_secret, secret_present};

const DEFAULT_MICROBLOG_TOKEN_ENV: &str = "TWITTER_BEARER_TOKEN";
const DEFAULT_PAGE_TOKEN_ENV: &str = "FB_ACCESS_TOKEN";
const PAGE_APP_ID_ENV: &str = "FB_APP_ID";
const PAGE_APP_SECRET_ENV: &str = "FB_APP_SECRET";
const DEFAULT_FEDERATED_TOKEN_ENV: &str = "MASTODON_ACCESS_TOKEN";
const FEDERATED_BASE_URL_ENV: &str = "MASTODON_BASE_URL";

const DEFAULT_MICROBLOG_ITEMS: u32 = 5;
const DEFAULT_PAGE_ITEMS: u32 = 5;
const DEFAULT_FEDERATED_ITEMS: u32 = 5;
const DEFAULT_FEED_ITEMS: u32 = 10;
const DEFAULT_INITIAL_MAX_AGE_MINUTES: u64 = 1440;

/// Build every enabled, valid source. Invalid entries are logged and left out.
pub fn build_sources(config: &AppConfig, client: &reqwest::Client) -> Vec<ConfiguredSource> {
    let timeout = Duration::from_secs(config.general.fetch_timeout_secs.max(1));
    let mut sources: Vec<ConfiguredSource> = Vec::new();

    for entry in config.source_entries() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "Source disabled: invalid configuration");
                continue;
            }
        };

        if !entry.enabled {
            tracing::debug!(kind = %entry.kind, "Source entry disabled in config");
            continue;
        }

        match build_source(&entry, client, timeout) {
            Ok(source) => {
                if sources.iter().any(|s| s.source_id() == source.source_id()) {
                    tracing::warn!(source = %source.source_id(), "Duplicate source entry ignored");
                    continue;
                }
                tracing::info!(
                    source = %source.source_id(),
                    filtered = !source.filter.is_pass_through(),
                    "Source configured"
                );
                sources.push(source);
            }
            Err(e) => {
                tracing::warn!(
                    kind = %entry.kind,
                    error = %format!("{:#}", e),
                    "Source disabled: invalid configuration"
                );
            }
        }
    }

    sources
}

/// Build a single source; secrets are resolved here
pub fn build_source(
    entry: &SourceEntry,
    client: &reqwest::Client,
    timeout: Duration,
) -> Result<ConfiguredSource> {
    let kind = SourceKind::parse(&entry.kind)
        .ok_or_else(|| anyhow!("Unknown source type: {}", entry.kind))?;
    let filter = filter_config(entry)?;

    let adapter: Arc<dyn SourceAdapter> = match kind {
        SourceKind::Microblog => {
            let handle = required(&entry.handle, "handle")?;
            let token = load_secret(
                &token_env(entry, DEFAULT_MICROBLOG_TOKEN_ENV),
                "microblog bearer token",
            )?;
            Arc::new(MicroblogSource::new(
                client.clone(),
                token,
                MicroblogSourceConfig {
                    handle,
                    max_results: entry.max_items.unwrap_or(DEFAULT_MICROBLOG_ITEMS),
                    timeout,
                },
            ))
        }
        SourceKind::SocialPage => {
            let page = required(&entry.page, "page")?;
            let token = page_token(entry)?;
            Arc::new(SocialPageSource::new(
                client.clone(),
                token,
                SocialPageSourceConfig {
                    page,
                    limit: entry.max_items.unwrap_or(DEFAULT_PAGE_ITEMS),
                    timeout,
                },
            ))
        }
        SourceKind::FederatedTimeline => {
            let account = required(&entry.account, "account")?;
            let base_url = match entry.base_url.as_deref().map(str::trim) {
                Some(url) if !url.is_empty() => url.to_string(),
                _ => std::env::var(FEDERATED_BASE_URL_ENV)
                    .ok()
                    .filter(|v| !v.trim().is_empty())
                    .with_context(|| {
                        format!("Missing base_url (or {} env var)", FEDERATED_BASE_URL_ENV)
                    })?,
            };
            if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
                bail!("base_url must be an http(s) URL: {}", base_url);
            }
            let token = load_secret(
                &token_env(entry, DEFAULT_FEDERATED_TOKEN_ENV),
                "federated timeline access token",
            )?;
            Arc::new(FederatedTimelineSource::new(
                client.clone(),
                token,
                FederatedSourceConfig {
                    base_url,
                    account,
                    limit: entry.max_items.unwrap_or(DEFAULT_FEDERATED_ITEMS),
                    timeout,
                },
            ))
        }
        SourceKind::Feed => {
            let url = required(&entry.url, "url")?;
            if !url.starts_with("http://") && !url.starts_with("https://") {
                bail!("Feed url must be an http(s) URL: {}", url);
            }
            Arc::new(FeedSource::new(
                client.clone(),
                FeedSourceConfig {
                    url,
                    name: entry.name.clone().filter(|n| !n.trim().is_empty()),
                    max_items: entry.max_items.unwrap_or(DEFAULT_FEED_ITEMS) as usize,
                    initial_max_age: Duration::from_secs(
                        entry
                            .initial_max_age_minutes
                            .unwrap_or(DEFAULT_INITIAL_MAX_AGE_MINUTES)
                            .saturating_mul(60),
                    ),
                    timeout,
                },
            ))
        }
    };

    Ok(ConfiguredSource::new(adapter, filter))
}

/// Names of the env vars a source entry needs, and whether each is set
pub fn secret_status(entry: &SourceEntry) -> Vec<(String, bool)> {
    match SourceKind::parse(&entry.kind) {
        Some(SourceKind::Microblog) => {
            let env = token_env(entry, DEFAULT_MICROBLOG_TOKEN_ENV);
            vec![(env.clone(), secret_present(&env))]
        }
        Some(SourceKind::SocialPage) => {
            let env = token_env(entry, DEFAULT_PAGE_TOKEN_ENV);
            if secret_present(&env) {
                vec![(env, true)]
            } else {
                vec![
                    (env, false),
                    (
                        format!("{}+{}", PAGE_APP_ID_ENV, PAGE_APP_SECRET_ENV),
                        secret_present(PAGE_APP_ID_ENV) && secret_present(PAGE_APP_SECRET_ENV),
                    ),
                ]
            }
        }
        Some(SourceKind::FederatedTimeline) => {
            let env = token_env(entry, DEFAULT_FEDERATED_TOKEN_ENV);
            vec![(env.clone(), secret_present(&env))]
        }
        Some(SourceKind::Feed) | None => Vec::new(),
    }
}

fn filter_config(entry: &SourceEntry) -> Result<FilterConfig> {
    let mode = match entry.mode.as_deref() {
        None => MatchMode::default(),
        Some(value) => MatchMode::parse(value)
            .ok_or_else(|| anyhow!("Invalid mode {:?} (expected \"any\" or \"all\")", value))?,
    };

    Ok(FilterConfig {
        keywords: entry.keywords.clone(),
        users: entry.users.clone(),
        mode,
    })
}

fn required(value: &Option<String>, field: &str) -> Result<String> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => bail!("Missing required field: {}", field),
    }
}

fn token_env(entry: &SourceEntry, default: &str) -> String {
    entry
        .token_env
        .clone()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Page token, or an app access token built from app id and secret
fn page_token(entry: &SourceEntry) -> Result<SecretString> {
    let env = token_env(entry, DEFAULT_PAGE_TOKEN_ENV);
    if secret_present(&env) {
        return load_secret(&env, "page access token");
    }

    let app_id = load_secret(PAGE_APP_ID_ENV, "page app id")
        .with_context(|| format!("Neither {} nor app credentials are set", env))?;
    let app_secret = load_secret(PAGE_APP_SECRET_ENV, "page app secret")?;

    Ok(SecretString::new(
        format!("{}|{}", app_id.expose_secret(), app_secret.expose_secret()).into(),
    ))
}
