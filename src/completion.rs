//! Hosted completion collaborator.
//!
//! Works with any OpenAI-compatible `/chat/completions` endpoint. The
//! composed prompt is sent as a single user message; the reply is
//! `choices[0].message.content`.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use ragchat_core::completion::{CompletionProvider, CompletionRequest};
use ragchat_core::error::CompletionError;

use crate::config::{CompletionConfig, Config};
use crate::retry::with_backoff;

pub struct OpenAiCompatCompletion {
    base_url: String,
    api_key: String,
    temperature: Option<f32>,
    max_retries: u32,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl OpenAiCompatCompletion {
    pub fn new(config: &CompletionConfig) -> anyhow::Result<Self> {
        let api_key = Config::api_key(&config.api_key_env)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            temperature: config.temperature,
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
            client,
        })
    }

    async fn request(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": [{"role": "user", "content": request.prompt}],
            "stream": false,
        });
        if let Some(t) = self.temperature {
            body["temperature"] = serde_json::json!(t);
        }

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CompletionError::Timeout(self.timeout_secs)
                } else {
                    CompletionError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if status == 429 {
            return Err(CompletionError::RateLimited);
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "completion provider returned error");
            return Err(CompletionError::Api {
                status,
                message: error_body,
            });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::Malformed(format!("failed to parse response: {e}")))?;

        extract_reply(api_response)
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompatCompletion {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError> {
        debug!(model = %request.model, "sending completion request");
        let request = &request;
        with_backoff(
            "completion",
            self.max_retries,
            CompletionError::is_transient,
            move || self.request(request),
        )
        .await
    }
}

/// Used when `completion.provider = "disabled"`.
pub struct DisabledCompletion;

#[async_trait]
impl CompletionProvider for DisabledCompletion {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _request: CompletionRequest) -> Result<String, CompletionError> {
        Err(CompletionError::Disabled)
    }
}

pub fn create_completion(config: &CompletionConfig) -> anyhow::Result<Arc<dyn CompletionProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledCompletion)),
        "openai" => Ok(Arc::new(OpenAiCompatCompletion::new(config)?)),
        other => anyhow::bail!("Unknown completion provider: {}", other),
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    content: Option<String>,
}

fn extract_reply(response: ApiResponse) -> Result<String, CompletionError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| CompletionError::Malformed("no choices in response".into()))?;
    choice
        .message
        .content
        .ok_or_else(|| CompletionError::Malformed("choice has no content".into()))
}
