//! TOML configuration parsing and validation.
//!
//! Every section is optional and falls back to defaults, so an empty file
//! (or [`Config::minimal`]) describes a working local setup. API keys are
//! never read from the file: each hosted collaborator names the environment
//! variable that holds its key (`api_key_env`), and [`Config::api_key`]
//! fails fast when it is unset.
//!
//! ```toml
//! [ingest]
//! directory = "data"
//! chunk_size = 1000
//! chunk_overlap = 200
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [completion]
//! model = "gpt-4"
//!
//! [server]
//! bind = "127.0.0.1:8501"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use ragchat_core::chunk::ChunkParams;
use ragchat_core::pipeline::WriteMode;
use ragchat_core::prompt::{
    PromptComposer, DEFAULT_HISTORY_EXCHANGES, DEFAULT_MAX_CONTEXT_CHARS, DEFAULT_PERSONA,
};
use ragchat_core::retrieve::DEFAULT_TOP_K;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub db: DbConfig,
    pub index: IndexConfig,
    pub ingest: IngestConfig,
    pub embedding: EmbeddingConfig,
    pub completion: CompletionConfig,
    pub prompt: PromptConfig,
    pub conversation: ConversationConfig,
    pub server: ServerConfig,
}

/// Accounts and conversation records.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DbConfig {
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/ragchat.sqlite"),
        }
    }
}

/// Location of the persisted vector index and query fan-out.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IndexConfig {
    pub path: PathBuf,
    pub top_k: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("vectorstore/index.sqlite"),
            top_k: DEFAULT_TOP_K,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IngestConfig {
    pub directory: PathBuf,
    /// Matched against file names directly under `directory`.
    pub include_globs: Vec<String>,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("data"),
            include_globs: vec!["*.txt".to_string()],
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

impl IngestConfig {
    pub fn chunk_params(&self) -> Result<ChunkParams> {
        Ok(ChunkParams::new(self.chunk_size, self.chunk_overlap)?)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: Option<String>,
    pub dims: Option<usize>,
    pub batch_size: usize,
    pub max_retries: u32,
    pub timeout_secs: u64,
    pub api_key_env: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: Some("text-embedding-3-small".to_string()),
            dims: Some(1536),
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CompletionConfig {
    pub provider: String,
    pub model: String,
    pub base_url: String,
    pub temperature: Option<f32>,
    pub max_retries: u32,
    pub timeout_secs: u64,
    pub api_key_env: String,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            temperature: None,
            max_retries: 3,
            timeout_secs: 60,
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PromptConfig {
    /// Inline persona instruction. Takes precedence over `persona_file`.
    pub persona: Option<String>,
    pub persona_file: Option<PathBuf>,
    pub history_exchanges: usize,
    pub max_context_chars: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            persona: None,
            persona_file: None,
            history_exchanges: DEFAULT_HISTORY_EXCHANGES,
            max_context_chars: DEFAULT_MAX_CONTEXT_CHARS,
        }
    }
}

impl PromptConfig {
    pub fn resolve_persona(&self) -> Result<String> {
        if let Some(ref persona) = self.persona {
            return Ok(persona.trim().to_string());
        }
        if let Some(ref path) = self.persona_file {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read persona file: {}", path.display()))?;
            return Ok(text.trim().to_string());
        }
        Ok(DEFAULT_PERSONA.to_string())
    }

    pub fn composer(&self) -> Result<PromptComposer> {
        Ok(PromptComposer::new(
            self.resolve_persona()?,
            self.history_exchanges,
            self.max_context_chars,
        ))
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ConversationConfig {
    /// Compare-and-swap conversation writes instead of last-writer-wins.
    pub optimistic_locking: bool,
    /// Retries for a busy/locked store.
    pub max_retries: u32,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            optimistic_locking: false,
            max_retries: 3,
        }
    }
}

impl ConversationConfig {
    pub fn write_mode(&self) -> WriteMode {
        if self.optimistic_locking {
            WriteMode::Optimistic
        } else {
            WriteMode::LastWriterWins
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Seconds a browser session may sit unused before it is dropped.
    pub session_idle_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8501".to_string(),
            session_idle_secs: 3600,
        }
    }
}

impl Config {
    /// All-defaults configuration, used when no file is present.
    pub fn minimal() -> Self {
        Self::default()
    }

    /// Read an API key from the environment variable `var`.
    pub fn api_key(var: &str) -> Result<String> {
        match std::env::var(var) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => bail!(
                "configuration error: environment variable {} is not set (required API key)",
                var
            ),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Load `path` if it exists, otherwise fall back to [`Config::minimal`].
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::info!("No config file at {}, using defaults", path.display());
        Ok(Config::minimal())
    }
}

pub fn validate(config: &Config) -> Result<()> {
    config.ingest.chunk_params()?;

    if config.ingest.include_globs.is_empty() {
        bail!("ingest.include_globs must not be empty");
    }

    if config.server.session_idle_secs == 0 {
        bail!("server.session_idle_secs must be > 0");
    }

    if config.index.top_k == 0 {
        bail!("index.top_k must be >= 1");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
    }

    match config.completion.provider.as_str() {
        "disabled" | "openai" => {}
        other => bail!(
            "Unknown completion provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if config.completion.model.trim().is_empty() {
        bail!("completion.model must not be empty");
    }

    if let Some(t) = config.completion.temperature {
        if !(0.0..=2.0).contains(&t) {
            bail!("completion.temperature must be in [0.0, 2.0]");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_all_defaults() {
        let config: Config = toml::from_str("").unwrap();
        validate(&config).unwrap();
        assert_eq!(config.ingest.chunk_size, 1000);
        assert_eq!(config.ingest.chunk_overlap, 200);
        assert_eq!(config.index.top_k, 4);
        assert_eq!(config.completion.model, "gpt-4");
        assert_eq!(config.conversation.write_mode(), WriteMode::LastWriterWins);
        assert_eq!(config.server.session_idle_secs, 3600);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [ingest]
            chunk_size = 500

            [conversation]
            optimistic_locking = true
            "#,
        )
        .unwrap();
        assert_eq!(config.ingest.chunk_size, 500);
        assert_eq!(config.ingest.chunk_overlap, 200);
        assert_eq!(config.ingest.directory, PathBuf::from("data"));
        assert_eq!(config.conversation.write_mode(), WriteMode::Optimistic);
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let config: Config = toml::from_str(
            r#"
            [ingest]
            chunk_size = 100
            chunk_overlap = 100
            "#,
        )
        .unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let config: Config = toml::from_str("[embedding]\nprovider = \"magic\"\n").unwrap();
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("magic"));
    }

    #[test]
    fn test_missing_api_key_is_config_error() {
        let err = Config::api_key("RAGCHAT_TEST_KEY_THAT_IS_NEVER_SET").unwrap_err();
        assert!(err.to_string().contains("configuration error"));
        assert!(err.to_string().contains("RAGCHAT_TEST_KEY_THAT_IS_NEVER_SET"));
    }

    #[test]
    fn test_inline_persona_wins() {
        let prompt = PromptConfig {
            persona: Some("  You are a coach.  ".to_string()),
            persona_file: Some(PathBuf::from("/does/not/exist")),
            ..Default::default()
        };
        assert_eq!(prompt.resolve_persona().unwrap(), "You are a coach.");
        assert_eq!(
            PromptConfig::default().resolve_persona().unwrap(),
            DEFAULT_PERSONA
        );
    }
}
