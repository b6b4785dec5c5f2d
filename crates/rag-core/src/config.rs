//! Configuration types for the chat service.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::{RagError, Result};

/// Main configuration for the chat service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RagConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Embedding configuration.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Generation provider configuration.
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Chunking configuration.
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Retrieval configuration.
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Conversation memory configuration.
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Retry and circuit breaker configuration.
    #[serde(default)]
    pub resilience: ResilienceConfig,

    /// Admission control configuration.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Input validation configuration.
    #[serde(default)]
    pub validation: ValidationConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Permit cross-origin requests.
    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            enable_cors: true,
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            busy_timeout_ms: 30000,
        }
    }
}

/// Embedding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// `hashing` (local, no network) or `workers-ai`.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// Remote model name.
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Vector dimension. Fixed for the lifetime of the index.
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Texts per provider call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Concurrent batches during ingestion.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Transport retries for the remote provider.
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dimension: default_dimension(),
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_embedding_retries(),
        }
    }
}

/// Generation provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_anthropic_model")]
    pub anthropic_model: String,

    #[serde(default = "default_anthropic_base_url")]
    pub anthropic_base_url: String,

    #[serde(default = "default_workers_model")]
    pub workers_model: String,

    #[serde(default = "default_workers_base_url")]
    pub workers_base_url: String,

    /// Maximum tokens to generate.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Bounded wait for a single provider call, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            anthropic_model: default_anthropic_model(),
            anthropic_base_url: default_anthropic_base_url(),
            workers_model: default_workers_model(),
            workers_base_url: default_workers_base_url(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Chunking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Maximum characters per chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Overlap between consecutive chunks, in characters.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

/// Retrieval configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Initial number of neighbours.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Similarity of the best match below which the turn enters guard mode.
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,

    /// Spread of the top three scores below which the curve counts as flat.
    #[serde(default = "default_flat_spread")]
    pub flat_spread: f32,

    /// Successive top-k sizes tried while the similarity curve stays flat.
    #[serde(default = "default_expansion_steps")]
    pub expansion_steps: Vec<usize>,

    /// Delay before the single retry of a failed index query.
    #[serde(default = "default_retrieval_retry_delay")]
    pub retry_delay_ms: u64,

    /// Length of the persisted source preview, in characters.
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,

    /// Guard threshold per embedding provider, replacing `min_similarity`.
    ///
    /// Lexical vectors score lower than neural ones for the same match, so
    /// the local `hashing` provider carries its own floor.
    #[serde(default = "default_provider_min_similarity")]
    pub provider_min_similarity: BTreeMap<String, f32>,
}

impl RetrievalConfig {
    /// Guard threshold that applies to vectors from `provider`.
    pub fn min_similarity_for(&self, provider: &str) -> f32 {
        self.provider_min_similarity
            .get(provider)
            .copied()
            .unwrap_or(self.min_similarity)
    }

    /// Copy of this config with the guard threshold resolved for `provider`.
    pub fn for_provider(&self, provider: &str) -> RetrievalConfig {
        RetrievalConfig {
            min_similarity: self.min_similarity_for(provider),
            ..self.clone()
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_similarity: default_min_similarity(),
            flat_spread: default_flat_spread(),
            expansion_steps: default_expansion_steps(),
            retry_delay_ms: default_retrieval_retry_delay(),
            preview_chars: default_preview_chars(),
            provider_min_similarity: default_provider_min_similarity(),
        }
    }
}

/// Conversation memory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Non-summary messages kept in the prompt window.
    #[serde(default = "default_max_chat_history")]
    pub max_chat_history: usize,

    /// Estimated window tokens above which summarization starts early.
    #[serde(default = "default_token_threshold")]
    pub token_threshold: usize,

    /// Tokens charged per message on top of its words.
    #[serde(default = "default_message_overhead")]
    pub message_overhead_tokens: usize,

    /// Bounded wait for the per-conversation turn lock.
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_ms: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_chat_history: default_max_chat_history(),
            token_threshold: default_token_threshold(),
            message_overhead_tokens: default_message_overhead(),
            lock_timeout_ms: default_lock_timeout(),
        }
    }
}

/// Retry and circuit breaker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Attempts beyond the first.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff delay; doubled on each retry.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Consecutive failures that open the breaker.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Window in which the failures must occur.
    #[serde(default = "default_failure_window")]
    pub failure_window_secs: u64,

    /// Time the breaker stays open before a trial call.
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay(),
            failure_threshold: default_failure_threshold(),
            failure_window_secs: default_failure_window(),
            cooldown_secs: default_cooldown(),
        }
    }
}

/// Admission control configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests admitted per key in the trailing window.
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,

    #[serde(default = "default_rate_window")]
    pub window_secs: u64,

    /// Timestamps considered by the flood guard.
    #[serde(default = "default_burst_samples")]
    pub burst_samples: usize,

    /// Average interval below which a burst is rejected.
    #[serde(default = "default_min_interval")]
    pub min_interval_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_secs: default_rate_window(),
            burst_samples: default_burst_samples(),
            min_interval_ms: default_min_interval(),
        }
    }
}

/// Input validation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Maximum chat message length, in characters.
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,

    /// Maximum document size, in bytes.
    #[serde(default = "default_max_document_bytes")]
    pub max_document_bytes: usize,

    /// Case-insensitive patterns that flag a prompt-injection attempt.
    #[serde(default = "default_injection_patterns")]
    pub injection_patterns: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_message_chars: default_max_message_chars(),
            max_document_bytes: default_max_document_bytes(),
            injection_patterns: default_injection_patterns(),
        }
    }
}

/// Largest value the blob store accepts.
pub const MAX_BLOB_BYTES: usize = 25 * 1024 * 1024;

/// Which generation provider the credentials select.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderSelection {
    Anthropic { api_key: String },
    WorkersAi { account_id: String, api_token: String },
}

/// Provider secrets, read from the environment only.
#[derive(Debug, Clone, Default)]
pub struct ProviderCredentials {
    pub anthropic_api_key: Option<String>,
    pub cloudflare_account_id: Option<String>,
    pub cloudflare_api_token: Option<String>,
}

impl ProviderCredentials {
    /// Read credentials from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read credentials through an arbitrary lookup. Empty values count as absent.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            anthropic_api_key: get("ANTHROPIC_API_KEY"),
            cloudflare_account_id: get("CLOUDFLARE_ACCOUNT_ID"),
            cloudflare_api_token: get("CLOUDFLARE_API_TOKEN"),
        }
    }

    /// An Anthropic key selects Anthropic; otherwise the Workers AI backend is used.
    pub fn selection(&self) -> ProviderSelection {
        match &self.anthropic_api_key {
            Some(key) => ProviderSelection::Anthropic {
                api_key: key.clone(),
            },
            None => ProviderSelection::WorkersAi {
                account_id: self.cloudflare_account_id.clone().unwrap_or_default(),
                api_token: self.cloudflare_api_token.clone().unwrap_or_default(),
            },
        }
    }
}

// Default value functions

fn default_true() -> bool {
    true
}

fn default_bind_address() -> String {
    "0.0.0.0:8787".to_string()
}

fn default_busy_timeout() -> u32 {
    30000
}

fn default_embedding_provider() -> String {
    "hashing".to_string()
}

fn default_embedding_model() -> String {
    "@cf/baai/bge-base-en-v1.5".to_string()
}

fn default_dimension() -> usize {
    768
}

fn default_batch_size() -> usize {
    32
}

fn default_concurrency() -> usize {
    4
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_embedding_retries() -> u32 {
    2
}

fn default_anthropic_model() -> String {
    "claude-3-5-haiku-latest".to_string()
}

fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_workers_model() -> String {
    "@cf/meta/llama-3.1-8b-instruct".to_string()
}

fn default_workers_base_url() -> String {
    "https://api.cloudflare.com/client/v4".to_string()
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_temperature() -> f32 {
    0.2
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    100
}

fn default_top_k() -> usize {
    3
}

fn default_min_similarity() -> f32 {
    0.65
}

fn default_provider_min_similarity() -> BTreeMap<String, f32> {
    BTreeMap::from([("hashing".to_string(), 0.3)])
}

fn default_flat_spread() -> f32 {
    0.05
}

fn default_expansion_steps() -> Vec<usize> {
    vec![5]
}

fn default_retrieval_retry_delay() -> u64 {
    100
}

fn default_preview_chars() -> usize {
    160
}

fn default_max_chat_history() -> usize {
    12
}

fn default_token_threshold() -> usize {
    6000
}

fn default_message_overhead() -> usize {
    4
}

fn default_lock_timeout() -> u64 {
    10_000
}

fn default_max_retries() -> u32 {
    2
}

fn default_base_delay() -> u64 {
    200
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_failure_window() -> u64 {
    120
}

fn default_cooldown() -> u64 {
    30
}

fn default_max_requests() -> usize {
    60
}

fn default_rate_window() -> u64 {
    300
}

fn default_burst_samples() -> usize {
    5
}

fn default_min_interval() -> u64 {
    2000
}

fn default_max_message_chars() -> usize {
    10_000
}

fn default_max_document_bytes() -> usize {
    // leave room for JSON escaping and the metadata envelope
    MAX_BLOB_BYTES / 10 * 9
}

fn default_injection_patterns() -> Vec<String> {
    [
        r"ignore\s+(all\s+)?(the\s+)?(previous|prior|above)\s+(instructions|prompts?|rules)",
        r"disregard\s+(all\s+)?(the\s+)?(previous|prior|above)?\s*(instructions|rules)",
        r"(reveal|show|print|repeat)\s+(me\s+)?(the\s+|your\s+)?system\s+prompt",
        r"you\s+are\s+now\s+",
        r"act\s+as\s+(an?\s+)?(unrestricted|jailbroken|unfiltered)",
        r"forget\s+(everything|all)\s+(you|your)",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rag-chat")
        .join("rag.db")
}

impl RagConfig {
    /// Load configuration from file.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| RagError::config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default paths.
    pub fn load_default() -> Result<Self> {
        // Try user config first
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("rag-chat").join("config.toml");
            if user_config.exists() {
                return Self::load(&user_config);
            }
        }

        // Try local config
        let local_config = PathBuf::from("rag-chat.toml");
        if local_config.exists() {
            return Self::load(&local_config);
        }

        Ok(Self::default())
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.embedding.dimension == 0 {
            return Err(RagError::config("embedding.dimension must be > 0"));
        }
        if self.embedding.batch_size == 0 || self.embedding.concurrency == 0 {
            return Err(RagError::config(
                "embedding.batch_size and embedding.concurrency must be > 0",
            ));
        }
        match self.embedding.provider.as_str() {
            "hashing" | "workers-ai" => {}
            other => {
                return Err(RagError::config(format!(
                    "Unknown embedding provider: '{}'. Must be hashing or workers-ai.",
                    other
                )))
            }
        }
        if self.chunking.chunk_size == 0 {
            return Err(RagError::config("chunking.chunk_size must be > 0"));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(RagError::config(
                "chunking.chunk_overlap must be smaller than chunking.chunk_size",
            ));
        }
        if self.retrieval.top_k == 0 {
            return Err(RagError::config("retrieval.top_k must be >= 1"));
        }
        if !(-1.0..=1.0).contains(&self.retrieval.min_similarity) {
            return Err(RagError::config("retrieval.min_similarity must be in [-1, 1]"));
        }
        if let Some((provider, _)) = self
            .retrieval
            .provider_min_similarity
            .iter()
            .find(|(_, v)| !(-1.0..=1.0).contains(*v))
        {
            return Err(RagError::config(format!(
                "retrieval.provider_min_similarity.{} must be in [-1, 1]",
                provider
            )));
        }
        if self
            .retrieval
            .expansion_steps
            .windows(2)
            .any(|w| w[1] <= w[0])
        {
            return Err(RagError::config(
                "retrieval.expansion_steps must be strictly increasing",
            ));
        }
        if self.memory.max_chat_history < 2 {
            return Err(RagError::config("memory.max_chat_history must be >= 2"));
        }
        if self.rate_limit.burst_samples < 2 {
            return Err(RagError::config("rate_limit.burst_samples must be >= 2"));
        }
        if self.validation.max_document_bytes > MAX_BLOB_BYTES {
            return Err(RagError::config(format!(
                "validation.max_document_bytes must not exceed {}",
                MAX_BLOB_BYTES
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RagConfig::default();
        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.retrieval.expansion_steps, vec![5]);
        assert_eq!(config.memory.max_chat_history, 12);
        assert_eq!(config.rate_limit.max_requests, 60);
        assert_eq!(config.resilience.failure_threshold, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: RagConfig = toml::from_str(
            r#"
            [retrieval]
            min_similarity = 0.5

            [memory]
            max_chat_history = 6
            "#,
        )
        .unwrap();
        assert_eq!(config.retrieval.min_similarity, 0.5);
        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.memory.max_chat_history, 6);
        assert_eq!(config.memory.token_threshold, 6000);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = RagConfig::default();
        config.chunking.chunk_overlap = config.chunking.chunk_size;
        assert!(config.validate().is_err());

        let mut config = RagConfig::default();
        config.retrieval.expansion_steps = vec![5, 5];
        assert!(config.validate().is_err());

        let mut config = RagConfig::default();
        config.embedding.provider = "onnx".into();
        assert!(config.validate().is_err());

        let mut config = RagConfig::default();
        config
            .retrieval
            .provider_min_similarity
            .insert("workers-ai".into(), 1.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_guard_threshold_per_provider() {
        let config = RetrievalConfig::default();
        assert_eq!(config.min_similarity_for("workers-ai"), 0.65);
        assert_eq!(config.min_similarity_for("hashing"), 0.3);

        let resolved = config.for_provider("hashing");
        assert_eq!(resolved.min_similarity, 0.3);
        assert_eq!(resolved.top_k, config.top_k);

        let config: RagConfig = toml::from_str(
            r#"
            [retrieval.provider_min_similarity]
            hashing = 0.2
            "#,
        )
        .unwrap();
        assert_eq!(config.retrieval.min_similarity_for("hashing"), 0.2);
        assert_eq!(config.retrieval.min_similarity_for("workers-ai"), 0.65);
    }

    #[test]
    fn test_document_limit_leaves_margin() {
        let config = ValidationConfig::default();
        assert!(config.max_document_bytes < MAX_BLOB_BYTES);
    }

    #[test]
    fn test_provider_selection() {
        let creds = ProviderCredentials::from_lookup(|k| match k {
            "ANTHROPIC_API_KEY" => Some("sk-test".into()),
            _ => None,
        });
        assert_eq!(
            creds.selection(),
            ProviderSelection::Anthropic {
                api_key: "sk-test".into()
            }
        );

        let creds = ProviderCredentials::from_lookup(|k| match k {
            "ANTHROPIC_API_KEY" => Some("  ".into()),
            "CLOUDFLARE_ACCOUNT_ID" => Some("acct".into()),
            _ => None,
        });
        assert!(matches!(
            creds.selection(),
            ProviderSelection::WorkersAi { ref account_id, .. } if account_id == "acct"
        ));
    }
}
