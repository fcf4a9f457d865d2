use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;
use thiserror::Error;

const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_INDEX_PREFIX: &str = "indexes";
pub(crate) const DEFAULT_COMPLETION_MODEL: &str = "gpt-4o-mini";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_EMBEDDING_BATCH_SIZE: usize = 64;
pub(crate) const DEFAULT_RETRIEVAL_TOP_K: usize = 4;
pub(crate) const DEFAULT_RETRIEVAL_SCORE_THRESHOLD: f32 = 0.3;
const DEFAULT_OCR_LANGUAGE: &str = "eng";
const DEFAULT_MAX_ARCHIVE_MEMBER_BYTES: u64 = 64 * 1024 * 1024;
const DEFAULT_INGEST_CONCURRENCY: usize = 4;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the Rusty Docs server and CLI.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Root directory for blobs, document records, and conversation logs.
    pub data_dir: PathBuf,
    /// Blob key prefix under which index artifacts are stored.
    pub index_prefix: String,
    /// Embedding provider used to generate vector representations.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Number of texts sent to the embedding provider per request.
    pub embedding_batch_size: usize,
    /// Provider used for answer generation.
    pub completion_provider: CompletionProvider,
    /// Chat model identifier passed to the completion provider.
    pub completion_model: String,
    /// Sampling temperature for answer generation.
    pub completion_temperature: f32,
    /// API key for OpenAI-compatible endpoints.
    pub openai_api_key: Option<String>,
    /// Base URL for OpenAI-compatible endpoints.
    pub openai_base_url: String,
    /// Base URL of the Ollama runtime.
    pub ollama_url: Option<String>,
    /// Optional override for the automatic chunk size selection.
    pub text_splitter_chunk_size: Option<usize>,
    /// Optional token overlap between adjacent segments of one page.
    pub text_splitter_chunk_overlap: Option<usize>,
    /// Prefer smaller automatic chunk sizes.
    pub text_splitter_use_safe_defaults: bool,
    /// Number of passages retrieved per question.
    pub retrieval_top_k: usize,
    /// Minimum similarity a passage needs to be used as grounding context.
    pub retrieval_score_threshold: Option<f32>,
    /// Run OCR over embedded page images during parsing.
    pub ocr_enabled: bool,
    /// Language passed to the OCR engine.
    pub ocr_language: String,
    /// Upper bound on the decompressed size of a single archive member.
    pub max_archive_member_bytes: u64,
    /// Maximum number of ingestion jobs processed concurrently by the worker.
    pub ingest_concurrency: usize,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

/// Supported embedding backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Local Ollama runtime.
    Ollama,
    /// Hosted OpenAI embeddings API.
    OpenAI,
    /// Deterministic feature-hashing embedder that needs no network access.
    Hash,
}

/// Supported text-completion backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionProvider {
    /// Local Ollama runtime.
    Ollama,
    /// Hosted OpenAI chat completions API.
    OpenAI,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let embedding_dimension: usize = parse_required("EMBEDDING_DIMENSION")?;
        if embedding_dimension == 0 {
            return Err(ConfigError::InvalidValue("EMBEDDING_DIMENSION".into()));
        }

        Ok(Self {
            data_dir: load_env_optional("DATA_DIR")
                .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string())
                .into(),
            index_prefix: load_env_optional("INDEX_PREFIX")
                .unwrap_or_else(|| DEFAULT_INDEX_PREFIX.to_string()),
            embedding_provider: load_env("EMBEDDING_PROVIDER")?
                .parse()
                .map_err(|()| ConfigError::InvalidValue("EMBEDDING_PROVIDER".to_string()))?,
            embedding_model: load_env("EMBEDDING_MODEL")?,
            embedding_dimension,
            embedding_batch_size: parse_optional("EMBEDDING_BATCH_SIZE")?
                .unwrap_or(DEFAULT_EMBEDDING_BATCH_SIZE)
                .max(1),
            completion_provider: match load_env_optional("COMPLETION_PROVIDER") {
                Some(value) => value
                    .parse()
                    .map_err(|()| ConfigError::InvalidValue("COMPLETION_PROVIDER".to_string()))?,
                None => CompletionProvider::OpenAI,
            },
            completion_model: load_env_optional("COMPLETION_MODEL")
                .unwrap_or_else(|| DEFAULT_COMPLETION_MODEL.to_string()),
            completion_temperature: parse_optional("COMPLETION_TEMPERATURE")?.unwrap_or(0.0),
            openai_api_key: load_env_optional("OPENAI_API_KEY"),
            openai_base_url: load_env_optional("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            ollama_url: load_env_optional("OLLAMA_URL"),
            text_splitter_chunk_size: parse_optional("TEXT_SPLITTER_CHUNK_SIZE")?,
            text_splitter_chunk_overlap: parse_optional("TEXT_SPLITTER_CHUNK_OVERLAP")?,
            text_splitter_use_safe_defaults: parse_flag("TEXT_SPLITTER_USE_SAFE_DEFAULTS")?,
            retrieval_top_k: parse_optional("RETRIEVAL_TOP_K")?
                .unwrap_or(DEFAULT_RETRIEVAL_TOP_K)
                .max(1),
            retrieval_score_threshold: parse_threshold("RETRIEVAL_SCORE_THRESHOLD")?,
            ocr_enabled: parse_flag("OCR_ENABLED")?,
            ocr_language: load_env_optional("OCR_LANGUAGE")
                .unwrap_or_else(|| DEFAULT_OCR_LANGUAGE.to_string()),
            max_archive_member_bytes: parse_optional("MAX_ARCHIVE_MEMBER_BYTES")?
                .unwrap_or(DEFAULT_MAX_ARCHIVE_MEMBER_BYTES),
            ingest_concurrency: parse_optional("INGEST_CONCURRENCY")?
                .unwrap_or(DEFAULT_INGEST_CONCURRENCY)
                .max(1),
            server_port: parse_optional("SERVER_PORT")?,
        })
    }

    /// Directory holding raw uploads and index artifacts.
    pub fn blob_root(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }

    /// Directory holding document records.
    pub fn documents_root(&self) -> PathBuf {
        self.data_dir.join("documents")
    }

    /// Directory holding conversation histories.
    pub fn conversations_root(&self) -> PathBuf {
        self.data_dir.join("conversations")
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingVariable(key.to_string()))
}

/// Similarity floor for retrieved units. `off` disables filtering; unset uses the default.
fn parse_threshold(key: &str) -> Result<Option<f32>, ConfigError> {
    match load_env_optional(key) {
        None => Ok(Some(DEFAULT_RETRIEVAL_SCORE_THRESHOLD)),
        Some(value) if value.trim().eq_ignore_ascii_case("off") => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
    }
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_required<T: std::str::FromStr>(key: &str) -> Result<T, ConfigError> {
    load_env(key)?
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(key.to_string()))
}

fn parse_optional<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}

fn parse_flag(key: &str) -> Result<bool, ConfigError> {
    match load_env_optional(key) {
        None => Ok(false),
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue(key.to_string())),
        },
    }
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            "hash" => Ok(Self::Hash),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for CompletionProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            _ => Err(()),
        }
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() {
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("Failed to load config from environment");
    tracing::debug!(
        data_dir = %config.data_dir.display(),
        server_port = ?config.server_port,
        embedding_provider = ?config.embedding_provider,
        embedding_model = %config.embedding_model,
        completion_provider = ?config.completion_provider,
        completion_model = %config.completion_model,
        ocr_enabled = config.ocr_enabled,
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        data_dir: "data".into(),
        index_prefix: DEFAULT_INDEX_PREFIX.into(),
        embedding_provider: EmbeddingProvider::Hash,
        embedding_model: "hash-test".into(),
        embedding_dimension: 64,
        embedding_batch_size: 8,
        completion_provider: CompletionProvider::OpenAI,
        completion_model: "test-model".into(),
        completion_temperature: 0.0,
        openai_api_key: None,
        openai_base_url: DEFAULT_OPENAI_BASE_URL.into(),
        ollama_url: None,
        text_splitter_chunk_size: None,
        text_splitter_chunk_overlap: None,
        text_splitter_use_safe_defaults: false,
        retrieval_top_k: DEFAULT_RETRIEVAL_TOP_K,
        retrieval_score_threshold: Some(DEFAULT_RETRIEVAL_SCORE_THRESHOLD),
        ocr_enabled: false,
        ocr_language: DEFAULT_OCR_LANGUAGE.into(),
        max_archive_member_bytes: DEFAULT_MAX_ARCHIVE_MEMBER_BYTES,
        ingest_concurrency: DEFAULT_INGEST_CONCURRENCY,
        server_port: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_provider_parses_case_insensitively() {
        assert_eq!("OpenAI".parse(), Ok(EmbeddingProvider::OpenAI));
        assert_eq!("hash".parse(), Ok(EmbeddingProvider::Hash));
        assert_eq!("cohere".parse::<EmbeddingProvider>(), Err(()));
    }

    #[test]
    fn completion_provider_rejects_unknown_backends() {
        assert_eq!("ollama".parse(), Ok(CompletionProvider::Ollama));
        assert!("hash".parse::<CompletionProvider>().is_err());
    }

    #[test]
    fn score_threshold_defaults_on_and_can_be_switched_off() {
        const KEY: &str = "RUSTY_DOCS_TEST_SCORE_THRESHOLD";
        assert_eq!(
            parse_threshold(KEY).expect("default"),
            Some(DEFAULT_RETRIEVAL_SCORE_THRESHOLD)
        );

        // SAFETY: the variable is unique to this test.
        unsafe { env::set_var(KEY, "0.55") };
        assert_eq!(parse_threshold(KEY).expect("explicit"), Some(0.55));
        unsafe { env::set_var(KEY, "OFF") };
        assert_eq!(parse_threshold(KEY).expect("off"), None);
        unsafe { env::set_var(KEY, "high") };
        assert!(matches!(
            parse_threshold(KEY),
            Err(ConfigError::InvalidValue(_))
        ));
        unsafe { env::remove_var(KEY) };
    }

    #[test]
    fn storage_roots_hang_off_data_dir() {
        let mut config = test_config();
        config.data_dir = "/srv/docs".into();
        assert_eq!(config.blob_root(), PathBuf::from("/srv/docs/blobs"));
        assert_eq!(config.documents_root(), PathBuf::from("/srv/docs/documents"));
        assert_eq!(
            config.conversations_root(),
            PathBuf::from("/srv/docs/conversations")
        );
    }
}
