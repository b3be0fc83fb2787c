//! HTTP client for the upstream `OpenAI`-compatible chat completions API.
//!
//! Transport failures that happen before a response has been fully received
//! are retried with exponential backoff. HTTP error statuses are never
//! retried; they map onto [`ErrorKind`](crate::error::ErrorKind) instead.

use std::time::Duration;

use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};

use crate::config::UpstreamConfig;
use crate::error::{truncate, ErrorKind, GatewayError, Result};
use crate::translate::openai_types::{ChatCompletionRequest, ChatCompletionResponse};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &UpstreamConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            initial_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    /// Delay before retrying after failed attempt number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Connection-level failures where no response was delivered. Timeouts are
/// excluded: the request may well have reached the model.
fn is_retryable(err: &reqwest::Error) -> bool {
    !err.is_timeout() && (err.is_connect() || err.is_request() || err.is_body())
}

#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    url: String,
    api_key: String,
    referrer: Option<String>,
    app_name: String,
    request_timeout: Duration,
    retry: RetryPolicy,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;

        Ok(Self {
            client,
            url: config.chat_completions_url(),
            api_key: api_key.into(),
            referrer: config.referrer_url.clone(),
            app_name: config.app_name.clone(),
            request_timeout: config.request_timeout(),
            retry: RetryPolicy::from_config(config),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn request(&self, body: &ChatCompletionRequest) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(&self.url)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(CONTENT_TYPE, "application/json")
            .header("X-Title", &self.app_name)
            .json(body);

        if let Some(ref referrer) = self.referrer {
            builder = builder.header("HTTP-Referer", referrer);
        }
        builder
    }

    /// Non-streaming completion.
    pub async fn chat_completion(
        &self,
        body: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse> {
        let mut attempt = 0;
        loop {
            match self.try_chat_completion(body).await {
                Err(GatewayError::Http(e))
                    if is_retryable(&e) && attempt + 1 < self.retry.max_attempts =>
                {
                    let delay = self.retry.backoff(attempt);
                    tracing::warn!(attempt = attempt + 1, ?delay, error = %e, "Upstream request failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn try_chat_completion(
        &self,
        body: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse> {
        let response = self
            .request(body)
            .timeout(self.request_timeout)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(GatewayError::from_upstream_reply(status.as_u16(), &text));
        }

        serde_json::from_str(&text).map_err(|e| {
            GatewayError::upstream(
                ErrorKind::Api,
                format!(
                    "Failed to parse upstream response: {}. Body: {}",
                    e,
                    truncate(&text, 300)
                ),
            )
        })
    }

    /// Streaming completion. Only the send is retried; once a 2xx response
    /// is returned the caller owns the body stream.
    pub async fn chat_completion_stream(
        &self,
        body: &ChatCompletionRequest,
    ) -> Result<reqwest::Response> {
        let mut attempt = 0;
        let response = loop {
            match self
                .request(body)
                .header(ACCEPT, "text/event-stream")
                .send()
                .await
            {
                Ok(response) => break response,
                Err(e) if is_retryable(&e) && attempt + 1 < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    tracing::warn!(attempt = attempt + 1, ?delay, error = %e, "Upstream stream request failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GatewayError::from_upstream_reply(status.as_u16(), &text));
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
    }

    #[test]
    fn test_policy_from_config_never_zero_attempts() {
        let config = UpstreamConfig {
            max_retries: 0,
            ..UpstreamConfig::default()
        };
        assert_eq!(RetryPolicy::from_config(&config).max_attempts, 1);
    }

    #[test]
    fn test_client_targets_chat_completions() {
        let config = UpstreamConfig {
            base_url: "http://127.0.0.1:9/v1/".to_string(),
            ..UpstreamConfig::default()
        };
        let client = tokio_test::assert_ok!(UpstreamClient::new(&config, "sk-test"));
        assert_eq!(client.url(), "http://127.0.0.1:9/v1/chat/completions");
    }
}
