//! Hosted embedding collaborator.
//!
//! [`OpenAIEmbedder`] implements the core [`Embedder`] trait against the
//! OpenAI `POST /v1/embeddings` endpoint. [`DisabledEmbedder`] stands in
//! when `embedding.provider = "disabled"`; every call fails with an
//! embedding error.
//!
//! Retry strategy (see [`crate::retry`]):
//! - HTTP 429 and 5xx → retry with exponential backoff
//! - other HTTP 4xx → fail immediately
//! - network errors and timeouts → retry

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use ragchat_core::embedding::Embedder;
use ragchat_core::Error;

use crate::config::{Config, EmbeddingConfig};
use crate::retry::with_backoff;

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

/// One failed request, tagged with whether retrying makes sense.
#[derive(Debug)]
struct Attempt {
    transient: bool,
    message: String,
}

impl std::fmt::Display for Attempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    async fn embed(&self, _texts: &[String]) -> ragchat_core::Result<Vec<Vec<f32>>> {
        Err(Error::Embedding(
            "embedding provider is disabled".to_string(),
        ))
    }
}

/// OpenAI embeddings client with batching-friendly retry.
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dims: usize,
    max_retries: u32,
    timeout_secs: u64,
}

impl OpenAIEmbedder {
    /// Build from configuration. Fails when model/dims are unset or the
    /// API key variable is missing.
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = Config::api_key(&config.api_key_env)?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model,
            dims,
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
        })
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, Attempt> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(OPENAI_EMBEDDINGS_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| Attempt {
                transient: true,
                message: if e.is_timeout() {
                    format!("request timed out after {}s", self.timeout_secs)
                } else {
                    format!("network error: {}", e)
                },
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(Attempt {
                transient: status.as_u16() == 429 || status.is_server_error(),
                message: format!("OpenAI API error {}: {}", status, body_text),
            });
        }

        let json: serde_json::Value = response.json().await.map_err(|e| Attempt {
            transient: false,
            message: format!("invalid response body: {}", e),
        })?;

        parse_openai_response(&json, texts.len()).map_err(|message| Attempt {
            transient: false,
            message,
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> ragchat_core::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        tracing::debug!(model = %self.model, batch = texts.len(), "embedding batch");

        with_backoff(
            "embedding",
            self.max_retries,
            |e: &Attempt| e.transient,
            move || self.request(texts),
        )
        .await
        .map_err(|e| Error::Embedding(e.message))
    }
}

/// Extract `data[].embedding` in input order.
///
/// The API tags each item with `index`; items are placed by that index
/// rather than by arrival order.
fn parse_openai_response(
    json: &serde_json::Value,
    expected: usize,
) -> Result<Vec<Vec<f32>>, String> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or("missing data array")?;

    if data.len() != expected {
        return Err(format!(
            "expected {} embeddings, got {}",
            expected,
            data.len()
        ));
    }

    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or("missing embedding")?;
        let vector: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        let slot = slots
            .get_mut(index)
            .ok_or_else(|| format!("embedding index {} out of range", index))?;
        *slot = Some(vector);
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(i, v)| v.ok_or_else(|| format!("missing embedding for input {}", i)))
        .collect()
}

/// Instantiate the configured embedder.
pub fn create_embedder(config: &EmbeddingConfig) -> anyhow::Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        other => anyhow::bail!("Unknown embedding provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]},
            ]
        });
        let vectors = parse_openai_response(&json, 2).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_parse_rejects_count_mismatch() {
        let json = serde_json::json!({"data": [{"index": 0, "embedding": [1.0]}]});
        let err = parse_openai_response(&json, 2).unwrap_err();
        assert!(err.contains("expected 2"));
    }

    #[test]
    fn test_parse_rejects_missing_data() {
        assert!(parse_openai_response(&serde_json::json!({}), 1).is_err());
    }

    #[tokio::test]
    async fn test_disabled_embedder_fails() {
        let embedder = create_embedder(&EmbeddingConfig {
            provider: "disabled".to_string(),
            ..Default::default()
        })
        .unwrap();
        let err = embedder.embed(&["x".to_string()]).await.unwrap_err();
        assert_eq!(err.code(), "embedding_failure");
    }

    #[test]
    fn test_openai_requires_key() {
        let config = EmbeddingConfig {
            api_key_env: "RAGCHAT_TEST_EMBED_KEY_NEVER_SET".to_string(),
            ..Default::default()
        };
        match OpenAIEmbedder::new(&config) {
            Ok(_) => panic!("expected missing key error"),
            Err(e) => assert!(e.to_string().contains("RAGCHAT_TEST_EMBED_KEY_NEVER_SET")),
        }
    }
}
