use std::time::Duration;

use reqwest::{Client, StatusCode};

use super::error::OracleError;
use super::types::{ChatRequest, ChatResponse, OracleRequest};

pub const API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// A single answer-generating service. One call, no pacing, no retries.
#[allow(async_fn_in_trait)]
pub trait Oracle {
    async fn complete(&self, model: &str, request: &OracleRequest) -> Result<String, OracleError>;
}

/// HTTP client for an OpenAI-compatible chat completions endpoint.
pub struct ChatClient {
    api_key: String,
    client: Client,
    base_url: String,
}

impl ChatClient {
    pub fn new(api_key: String) -> Result<Self, OracleError> {
        Self::with_base_url(api_key, API_URL.to_string())
    }

    /// Create a client pointing at a custom base URL (useful for testing).
    pub fn with_base_url(api_key: String, base_url: String) -> Result<Self, OracleError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            api_key,
            client,
            base_url,
        })
    }
}

impl Oracle for ChatClient {
    async fn complete(&self, model: &str, request: &OracleRequest) -> Result<String, OracleError> {
        let body = ChatRequest::from_request(model, request);
        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(1000);
            let message = response.text().await.unwrap_or_default();
            if message.contains("insufficient_quota") {
                return Err(OracleError::QuotaExhausted(message));
            }
            return Err(OracleError::RateLimited {
                retry_after_ms: retry_after,
            });
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Err(OracleError::Unauthorized {
                    status: status.as_u16(),
                    message,
                });
            }
            return Err(OracleError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.json::<ChatResponse>().await?;
        body.first_content()
            .map(str::to_string)
            .ok_or_else(|| OracleError::MalformedResponse("response has no choices".into()))
    }
}
