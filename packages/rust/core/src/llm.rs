//! Text generation behind the [`TextGenerator`] seam.
//!
//! [`OpenRouterClient`] speaks the OpenAI-compatible chat-completions API.
//! Failures are split into per-item errors (the stage leaves the field empty
//! and moves on) and systemic ones (the stage invocation fails).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use euchub_shared::{EucHubError, OpenRouterConfig, Result};

const TEMPERATURE: f32 = 0.3;

/// Why a generation call produced no text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerateError {
    #[error("generation timed out")]
    Timeout,

    /// Non-success status that is specific to this request.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// Unparseable or empty response body.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Rate limited or out of credits (429 / 402).
    #[error("quota exhausted: {0}")]
    QuotaExhausted(String),

    /// Credentials rejected (401 / 403).
    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

impl GenerateError {
    /// Systemic failures affect every remaining item, so the stage stops.
    pub fn is_systemic(&self) -> bool {
        matches!(self, Self::QuotaExhausted(_) | Self::Unauthorized(_))
    }
}

impl From<GenerateError> for EucHubError {
    fn from(e: GenerateError) -> Self {
        EucHubError::Enrichment(e.to_string())
    }
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a completion for `prompt`, capped at `max_tokens`.
    async fn generate(&self, prompt: &str, max_tokens: u32) -> std::result::Result<String, GenerateError>;

    fn model(&self) -> &str;
}

// ---------------------------------------------------------------------------
// OpenRouter
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completions client for OpenRouter (or any compatible endpoint).
pub struct OpenRouterClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenRouterClient {
    pub fn new(config: &OpenRouterConfig, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EucHubError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.default_model.clone(),
        })
    }
}

#[async_trait]
impl TextGenerator for OpenRouterClient {
    #[instrument(skip_all, fields(model = %self.model, max_tokens))]
    async fn generate(&self, prompt: &str, max_tokens: u32) -> std::result::Result<String, GenerateError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens,
            temperature: TEMPERATURE,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerateError::Timeout
                } else {
                    GenerateError::Rejected(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let message = format!("HTTP {status}: {}", detail.trim());
            return Err(match status {
                StatusCode::TOO_MANY_REQUESTS | StatusCode::PAYMENT_REQUIRED => {
                    GenerateError::QuotaExhausted(message)
                }
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    GenerateError::Unauthorized(message)
                }
                _ => GenerateError::Rejected(message),
            });
        }

        let body: ChatResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                GenerateError::Timeout
            } else {
                GenerateError::Malformed(e.to_string())
            }
        })?;

        let text = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(GenerateError::Malformed("empty completion".into()));
        }
        debug!(chars = text.len(), "generation complete");
        Ok(text)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> OpenRouterClient {
        let config = OpenRouterConfig {
            base_url: format!("{}/api/v1/", server.uri()),
            timeout_secs: 1,
            ..OpenRouterConfig::default()
        };
        OpenRouterClient::new(&config, "sk-test".into()).unwrap()
    }

    #[tokio::test]
    async fn returns_trimmed_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "anthropic/claude-3-haiku",
                "max_tokens": 200,
                "temperature": 0.3
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "  A summary.  "}}]
            })))
            .mount(&server)
            .await;

        let text = client(&server).generate("Summarize", 200).await.unwrap();
        assert_eq!(text, "A summary.");
    }

    #[tokio::test]
    async fn maps_status_codes() {
        let cases = [
            (429, true),
            (402, true),
            (401, true),
            (403, true),
            (400, false),
            (500, false),
        ];
        for (status, systemic) in cases {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
                .mount(&server)
                .await;

            let err = client(&server).generate("p", 10).await.unwrap_err();
            assert_eq!(err.is_systemic(), systemic, "status {status}: {err}");
        }
    }

    #[tokio::test]
    async fn empty_or_garbled_body_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})))
            .mount(&server)
            .await;
        assert!(matches!(
            client(&server).generate("p", 10).await,
            Err(GenerateError::Malformed(_))
        ));

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;
        assert!(matches!(
            client(&server).generate("p", 10).await,
            Err(GenerateError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"choices": []}))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;
        assert_eq!(
            client(&server).generate("p", 10).await,
            Err(GenerateError::Timeout)
        );
    }
}
