//! Keyword and author filtering

use serde::{Deserialize, Serialize};

use crate::model::Post;

/// How keyword and user criteria combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Any configured criterion is enough
    #[default]
    Any,
    /// Every configured criterion must match
    All,
}

impl MatchMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "any" => Some(MatchMode::Any),
            "all" => Some(MatchMode::All),
            _ => None,
        }
    }
}

/// Allow-lists for a single source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Case-insensitive substrings; a post matches if any appears
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Exact author handles
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub mode: MatchMode,
}

impl FilterConfig {
    /// True when no criterion is configured, so every post passes
    pub fn is_pass_through(&self) -> bool {
        active(&self.keywords).next().is_none() && active(&self.users).next().is_none()
    }
}

fn active(values: &[String]) -> impl Iterator<Item = &str> {
    values.iter().map(|v| v.trim()).filter(|v| !v.is_empty())
}

/// Decide whether a post passes the filter. Blank entries are ignored.
pub fn matches(post: &Post, config: &FilterConfig) -> bool {
    let keywords: Vec<String> = active(&config.keywords).map(str::to_lowercase).collect();
    let users: Vec<&str> = active(&config.users).collect();

    let mut results = Vec::with_capacity(2);

    if !keywords.is_empty() {
        let haystack = post.searchable_text().to_lowercase();
        results.push(keywords.iter().any(|kw| haystack.contains(kw.as_str())));
    }

    if !users.is_empty() {
        results.push(users.contains(&post.author.as_str()));
    }

    if results.is_empty() {
        return true;
    }

    match config.mode {
        MatchMode::Any => results.into_iter().any(|r| r),
        MatchMode::All => results.into_iter().all(|r| r),
    }
}
