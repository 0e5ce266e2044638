//! Telegram Bot API delivery sink

use async_trait::async_trait;
use post_relay_domain::usecases::Renderer;
use post_relay_domain::{DeliveryError, DeliverySink, Post, RetryPolicy, Transient};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.telegram.org";

/// Sends each post as one HTML `sendMessage` call, retrying transient failures
pub struct TelegramSink {
    client: Client,
    bot_token: SecretString,
    chat_id: String,
    base_url: String,
    retry: RetryPolicy,
    renderer: Renderer,
    timeout: Duration,
}

impl TelegramSink {
    pub fn new(
        client: Client,
        bot_token: SecretString,
        chat_id: String,
        retry: RetryPolicy,
        renderer: Renderer,
        timeout: Duration,
    ) -> Self {
        Self::with_base_url(
            client,
            bot_token,
            chat_id,
            DEFAULT_BASE_URL.to_string(),
            retry,
            renderer,
            timeout,
        )
    }

    pub fn with_base_url(
        client: Client,
        bot_token: SecretString,
        chat_id: String,
        base_url: String,
        retry: RetryPolicy,
        renderer: Renderer,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            bot_token,
            chat_id,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry,
            renderer,
            timeout,
        }
    }

    /// One `sendMessage` attempt
    async fn send_message(&self, text: &str) -> Result<(), DeliveryError> {
        let url = format!(
            "{}/bot{}/sendMessage",
            self.base_url,
            self.bot_token.expose_secret()
        );

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&json!({
                "chat_id": self.chat_id,
                "text": text,
                "parse_mode": "HTML",
                "disable_web_page_preview": false
            }))
            .send()
            .await
            // The URL embeds the bot token
            .map_err(|e| DeliveryError::Network(e.without_url().to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body: ApiResponse = response.json().await.unwrap_or_default();
        let description = body
            .description
            .unwrap_or_else(|| status.to_string());

        Err(match status {
            StatusCode::TOO_MANY_REQUESTS => DeliveryError::RateLimited(
                body.parameters
                    .and_then(|p| p.retry_after)
                    .map(Duration::from_secs),
            ),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => DeliveryError::Auth(description),
            s if s.is_server_error() => DeliveryError::Unavailable(description),
            _ => DeliveryError::Rejected(description),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct ApiResponse {
    description: Option<String>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[async_trait]
impl DeliverySink for TelegramSink {
    async fn send(&self, post: &Post) -> Result<(), DeliveryError> {
        let text = self.renderer.render(post);

        let result = self
            .retry
            .run("telegram", |_attempt| self.send_message(&text))
            .await;

        match result {
            Ok(()) => {
                tracing::debug!(source_id = %post.source_id, external_id = %post.external_id, "Delivered to Telegram");
                Ok(())
            }
            Err(failure) if failure.error.is_transient() => Err(DeliveryError::Exhausted {
                attempts: failure.attempts,
                last: failure.error.to_string(),
            }),
            Err(failure) => Err(failure.error),
        }
    }

    fn name(&self) -> &'static str {
        "telegram"
    }
}
