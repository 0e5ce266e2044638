//! Source adapters: one per supported platform
//!
//! Shared HTTP status mapping and text helpers live here.

mod feed;
mod federated;
mod microblog;
mod social_page;

pub use feed::{FeedSource, FeedSourceConfig};
pub use federated::{FederatedSourceConfig, FederatedTimelineSource};
pub use microblog::{MicroblogSource, MicroblogSourceConfig};
pub use social_page::{SocialPageSource, SocialPageSourceConfig};

use post_relay_domain::SourceError;
use regex::Regex;
use reqwest::{Response, StatusCode};
use std::cmp::Ordering;
use std::sync::LazyLock;
use std::time::Duration;
use time::OffsetDateTime;

static BLOCK_BREAK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<br\s*/?>|</p>|</div>|</li>").expect("valid block break regex")
});
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid tag regex"));
static SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").expect("valid space regex"));

/// Map a transport error, dropping the URL (some carry tokens)
pub(crate) fn request_error(error: reqwest::Error) -> SourceError {
    if error.is_timeout() {
        SourceError::Fetch("request timed out".to_string())
    } else {
        SourceError::Fetch(error.without_url().to_string())
    }
}

/// Map non-success statuses onto the source error taxonomy
pub(crate) async fn check_status(
    response: Response,
    platform: &str,
) -> Result<Response, SourceError> {
    let status = response.status();

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(SourceError::Auth(format!("{} returned {}", platform, status)));
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(SourceError::RateLimited(rate_limit_hint(&response)));
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(SourceError::Fetch(format!(
            "{} returned {}: {}",
            platform,
            status,
            truncate(&body, 200)
        )));
    }

    Ok(response)
}

/// Wait hint from `retry-after` (seconds) or `x-rate-limit-reset` (unix time)
fn rate_limit_hint(response: &Response) -> Option<Duration> {
    let header = |name: &str| {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
    };

    if let Some(secs) = header("retry-after") {
        return Some(Duration::from_secs(secs));
    }

    header("x-rate-limit-reset").map(|reset| {
        let now = OffsetDateTime::now_utc().unix_timestamp().max(0) as u64;
        Duration::from_secs(reset.saturating_sub(now))
    })
}

/// Compare decimal ids of arbitrary length (snowflakes do not fit string order)
pub(crate) fn compare_numeric_ids(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Largest id of a set of decimal ids
pub(crate) fn max_numeric_id<'a>(ids: impl Iterator<Item = &'a str>) -> Option<String> {
    ids.max_by(|a, b| compare_numeric_ids(a, b)).map(String::from)
}

/// Flatten HTML into plain text: tags dropped, entities decoded
pub(crate) fn strip_html(html: &str) -> String {
    let with_breaks = BLOCK_BREAK.replace_all(html, "\n");
    let without_tags = TAG.replace_all(&with_breaks, "");
    let decoded = html_escape::decode_html_entities(&without_tags);

    decoded
        .lines()
        .map(|line| SPACES.replace_all(line.trim(), " ").into_owned())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) fn parse_rfc3339(value: Option<&str>) -> Option<OffsetDateTime> {
    value.and_then(|s| {
        OffsetDateTime::parse(s, &time::format_description::well_known::Rfc3339).ok()
    })
}

fn truncate(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}
