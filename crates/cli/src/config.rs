//! Configuration loading and management

use anyhow::{Context, Result, bail};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use post_relay_domain::RetryPolicy;

/// Poll intervals below this are raised to it
pub const MIN_POLL_INTERVAL_SECS: u64 = 30;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub telegram: TelegramConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Raw `[[sources]]` tables; each is validated on its own so one bad entry
    /// only disables that source
    #[serde(default)]
    pub sources: Vec<toml::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_state_db_path")]
    pub state_db_path: PathBuf,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    #[serde(default = "default_max_concurrent_sources")]
    pub max_concurrent_sources: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default = "default_bot_token_env")]
    pub bot_token_env: String,

    #[serde(default = "default_chat_id_env")]
    pub chat_id_env: String,

    #[serde(default = "default_telegram_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,

    #[serde(default = "default_true")]
    pub include_source_label: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
}

/// One `[[sources]]` entry after per-entry deserialization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceEntry {
    /// microblog, social-page, federated-timeline or feed
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub keywords: Vec<String>,

    #[serde(default)]
    pub users: Vec<String>,

    #[serde(default)]
    pub mode: Option<String>,

    /// microblog: account handle
    #[serde(default)]
    pub handle: Option<String>,

    /// social-page: page username or id
    #[serde(default)]
    pub page: Option<String>,

    /// federated-timeline: account (`user` or `user@host`)
    #[serde(default)]
    pub account: Option<String>,

    /// federated-timeline: instance URL
    #[serde(default)]
    pub base_url: Option<String>,

    /// feed: document URL
    #[serde(default)]
    pub url: Option<String>,

    /// feed: display name
    #[serde(default)]
    pub name: Option<String>,

    /// Items requested or considered per poll
    #[serde(default)]
    pub max_items: Option<u32>,

    /// feed: first-poll age cutoff
    #[serde(default)]
    pub initial_max_age_minutes: Option<u64>,

    /// Overrides the default token env var for this source type
    #[serde(default)]
    pub token_env: Option<String>,
}

// Default value functions
fn default_state_db_path() -> PathBuf {
    PathBuf::from("./state.sqlite")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    120
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_max_concurrent_sources() -> usize {
    1
}

fn default_bot_token_env() -> String {
    "TELEGRAM_BOT_TOKEN".to_string()
}

fn default_chat_id_env() -> String {
    "TELEGRAM_CHAT_ID".to_string()
}

fn default_telegram_timeout() -> u64 {
    15
}

fn default_preview_chars() -> usize {
    500
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_secs() -> u64 {
    30
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            state_db_path: default_state_db_path(),
            log_level: default_log_level(),
            poll_interval_secs: default_poll_interval(),
            fetch_timeout_secs: default_fetch_timeout(),
            max_concurrent_sources: default_max_concurrent_sources(),
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token_env: default_bot_token_env(),
            chat_id_env: default_chat_id_env(),
            timeout_secs: default_telegram_timeout(),
            preview_chars: default_preview_chars(),
            include_source_label: true,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_secs: default_max_delay_secs(),
        }
    }
}

impl GeneralConfig {
    /// Poll interval with the floor applied
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(MIN_POLL_INTERVAL_SECS))
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            multiplier: self.multiplier,
            max_delay: Duration::from_secs(self.max_delay_secs),
        }
    }
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // Try default config path if none specified
        let default_path = PathBuf::from("./config.toml");
        let path = config_path.unwrap_or(&default_path);

        if path.exists() {
            builder = builder.add_source(config::File::from(path));
        } else if config_path.is_some() {
            // User specified a path that doesn't exist
            bail!("Config file not found: {}", path.display());
        }

        // Add environment variable overrides
        builder = builder.add_source(
            config::Environment::with_prefix("POST_RELAY")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate each `[[sources]]` table independently
    pub fn source_entries(&self) -> Vec<Result<SourceEntry>> {
        self.sources
            .iter()
            .enumerate()
            .map(|(index, value)| {
                value
                    .clone()
                    .try_into::<SourceEntry>()
                    .with_context(|| format!("Invalid [[sources]] entry #{}", index + 1))
            })
            .collect()
    }

    /// Generate example configuration as TOML string
    pub fn example_toml() -> String {
        r#"# post-relay configuration

[general]
state_db_path = "./state.sqlite"
log_level = "info"
# Seconds between cycles (minimum 30)
poll_interval_secs = 120
fetch_timeout_secs = 30
max_concurrent_sources = 1

[telegram]
bot_token_env = "TELEGRAM_BOT_TOKEN"
chat_id_env = "TELEGRAM_CHAT_ID"
timeout_secs = 15
preview_chars = 500
include_source_label = true

[retry]
max_attempts = 4
base_delay_ms = 1000
multiplier = 2.0
max_delay_secs = 30

# Each source has a type plus optional filters.
# mode = "any" passes posts matching any criterion, "all" requires every one.

[[sources]]
type = "feed"
url = "https://example.com/rss.xml"
name = "Example News"
max_items = 10
initial_max_age_minutes = 1440
keywords = []

[[sources]]
type = "microblog"
enabled = false
handle = "example_account"
max_items = 5
token_env = "TWITTER_BEARER_TOKEN"
keywords = ["breaking"]

[[sources]]
type = "social-page"
enabled = false
page = "examplepage"
max_items = 5
# Falls back to FB_APP_ID / FB_APP_SECRET when FB_ACCESS_TOKEN is unset
token_env = "FB_ACCESS_TOKEN"

[[sources]]
type = "federated-timeline"
enabled = false
base_url = "https://mastodon.social"
account = "example"
max_items = 5
token_env = "MASTODON_ACCESS_TOKEN"
users = ["example"]
mode = "any"
"#
        .to_string()
    }
}

/// Read a secret from the named env var, rejecting empty values
pub fn load_secret(env_var: &str, purpose: &str) -> Result<SecretString> {
    if env_var.trim().is_empty() {
        bail!("No env var configured for {}", purpose);
    }

    let value = std::env::var(env_var)
        .with_context(|| format!("Missing env var {} for {}", env_var, purpose))?;

    if value.trim().is_empty() {
        bail!("Env var {} is empty for {}", env_var, purpose);
    }

    Ok(SecretString::new(value.trim().into()))
}

/// Whether a secret env var is set, without reading it into a value we keep
pub fn secret_present(env_var: &str) -> bool {
    std::env::var(env_var)
        .map(|v| !v.trim().is_empty())
        .unwrap_or(false)
}
