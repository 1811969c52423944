//! OpenAI-compatible model executor.
//!
//! Works with OpenAI, OpenRouter, Ollama, vLLM and any endpoint exposing
//! `/v1/chat/completions`. One turn is one non-streaming request: the
//! assembled system prompt plus the user's text.

use async_trait::async_trait;
use orgclaw_core::agent::AgentExecutor;
use orgclaw_core::error::ExecutionError;
use orgclaw_core::tenant::UserInstance;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Tunables for one executor.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// HTTP timeout for one completion request
    pub timeout: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".into(),
            temperature: 0.7,
            max_tokens: 2048,
            timeout: Duration::from_secs(120),
        }
    }
}

/// An [`AgentExecutor`] backed by an OpenAI-compatible HTTP API.
pub struct OpenAiCompatExecutor {
    name: String,
    base_url: String,
    api_key: String,
    settings: ExecutorSettings,
    client: reqwest::Client,
}

impl OpenAiCompatExecutor {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        settings: ExecutorSettings,
    ) -> Result<Self, ExecutionError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| ExecutionError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            settings,
            client,
        })
    }

    /// Create an OpenAI executor (convenience constructor).
    pub fn openai(
        api_key: impl Into<String>,
        settings: ExecutorSettings,
    ) -> Result<Self, ExecutionError> {
        Self::new("openai", "https://api.openai.com/v1", api_key, settings)
    }

    /// Create an Ollama executor (convenience constructor).
    pub fn ollama(
        base_url: Option<&str>,
        settings: ExecutorSettings,
    ) -> Result<Self, ExecutionError> {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama", // Ollama doesn't need a real key
            settings,
        )
    }

    fn build_request<'a>(&'a self, system_prompt: &'a str, user_text: &'a str) -> ApiRequest<'a> {
        ApiRequest {
            model: &self.settings.model,
            messages: vec![
                ApiMessage {
                    role: "system",
                    content: system_prompt,
                },
                ApiMessage {
                    role: "user",
                    content: user_text,
                },
            ],
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
            stream: false,
        }
    }
}

/// Pull the reply text out of a completion body.
fn extract_reply(response: ApiResponse) -> Result<String, ExecutionError> {
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default();

    if content.trim().is_empty() {
        return Err(ExecutionError::EmptyResponse);
    }
    Ok(content)
}

#[async_trait]
impl AgentExecutor for OpenAiCompatExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        system_prompt: &str,
        user_text: &str,
        instance: &UserInstance,
    ) -> Result<String, ExecutionError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_request(system_prompt, user_text);

        debug!(
            executor = %self.name,
            model = %self.settings.model,
            instance_id = %instance.instance_id,
            "Sending completion request"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ExecutionError::Network(e.to_string()))?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            return Err(ExecutionError::RateLimited { retry_after_secs });
        }

        if status == 401 || status == 403 {
            return Err(ExecutionError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Model endpoint returned error");
            return Err(ExecutionError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ExecutionError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        extract_reply(api_response)
    }
}

// --- Wire types ---

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: Option<String>,
}
