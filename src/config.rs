//! Configuration parsing and validation.
//!
//! Settings come from a TOML file (every section and field optional) and
//! are then overridden from the environment. See `config/rag.example.toml`
//! for every key.
//!
//! | Variable | Field |
//! |----------|-------|
//! | `OPENAI_BASE_URL` | `embedding.base_url`, `llm.base_url` |
//! | `RAG_SOURCE_DIR` | `paths.source_dir` |
//! | `RAG_NORMALIZED_DIR` | `paths.normalized_dir` |
//! | `RAG_INDEX_URL` | `index.url` |
//! | `RAG_NAMESPACE` | `index.namespace` |
//! | `RAG_KEY_PREFIX` | `index.key_prefix` |
//! | `RAG_CHUNK_SIZE` | `chunking.chunk_size` |
//! | `RAG_CHUNK_OVERLAP` | `chunking.chunk_overlap` |
//! | `RAG_RETRIEVAL_K` | `retrieval.k` |
//! | `RAG_EMBEDDING_PROVIDER` | `embedding.provider` |
//! | `RAG_EMBEDDING_MODEL` | `embedding.model` |
//! | `RAG_EMBEDDING_DIMS` | `embedding.dims` |
//! | `RAG_LLM_MODEL` | `llm.model` |
//! | `RAG_PROMPT_PATH` | `llm.prompt_path` |
//! | `PORT` | `server.bind` as `0.0.0.0:{PORT}` |
//! | `RAG_BIND` | `server.bind` |
//!
//! `OPENAI_API_KEY` is read by the OpenAI clients themselves.

use anyhow::{bail, Context, Result};
use notes_rag_core::chunk::{
    ChunkerConfig, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, DEFAULT_ENCODING, MIN_CHUNK_SIZE,
};
use notes_rag_core::models::IndexScope;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub normalize: NormalizeConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    /// Raw vault: markdown, PDF and text files.
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,
    /// Mirror of `source_dir` holding one `.txt` per converted file.
    #[serde(default = "default_normalized_dir")]
    pub normalized_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            source_dir: default_source_dir(),
            normalized_dir: default_normalized_dir(),
        }
    }
}

fn default_source_dir() -> PathBuf {
    PathBuf::from("all")
}
fn default_normalized_dir() -> PathBuf {
    PathBuf::from("all-txt")
}

#[derive(Debug, Deserialize, Clone)]
pub struct NormalizeConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    /// Added to the built-in excludes (`.git`, `.obsidian`, `.trash`).
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.md".to_string(),
        "**/*.markdown".to_string(),
        "**/*.pdf".to_string(),
        "**/*.txt".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_encoding")]
    pub encoding: String,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            encoding: default_encoding(),
        }
    }
}

impl ChunkingConfig {
    pub fn to_chunker_config(&self) -> ChunkerConfig {
        ChunkerConfig {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            encoding: self.encoding.clone(),
        }
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}
fn default_encoding() -> String {
    DEFAULT_ENCODING.to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `openai`, `hashing`, or `disabled`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            dims: default_dims(),
            base_url: default_openai_base_url(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-ada-002".to_string()
}
fn default_dims() -> usize {
    1536
}
fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    /// Replaces the bundled prompt template.
    #[serde(default)]
    pub prompt_path: Option<PathBuf>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_llm_model(),
            temperature: default_temperature(),
            max_tokens: None,
            base_url: default_openai_base_url(),
            timeout_secs: default_llm_timeout_secs(),
            prompt_path: None,
        }
    }
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.3
}
fn default_llm_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// `sqlite://<path>` or `memory://`.
    #[serde(default = "default_index_url")]
    pub url: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            url: default_index_url(),
            namespace: default_namespace(),
            key_prefix: default_key_prefix(),
        }
    }
}

/// Where the vector index lives, parsed from `index.url`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexLocation {
    Sqlite(PathBuf),
    Memory,
}

impl IndexConfig {
    pub fn scope(&self) -> IndexScope {
        IndexScope::new(self.namespace.clone(), self.key_prefix.clone())
    }

    pub fn location(&self) -> Result<IndexLocation> {
        if let Some(path) = self.url.strip_prefix("sqlite://") {
            if path.is_empty() {
                bail!("index.url '{}' has no database path", self.url);
            }
            return Ok(IndexLocation::Sqlite(PathBuf::from(path)));
        }
        if self.url == "memory://" {
            return Ok(IndexLocation::Memory);
        }
        bail!(
            "Unsupported index.url: '{}'. Must start with sqlite:// or be memory://",
            self.url
        )
    }
}

fn default_index_url() -> String {
    "sqlite://./data/notes-rag.sqlite".to_string()
}
fn default_namespace() -> String {
    "obsidian-embeddings".to_string()
}
fn default_key_prefix() -> String {
    "obsidian:".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: i64,
    /// Chunks scoring below this cosine similarity are dropped.
    #[serde(default)]
    pub min_score: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            min_score: 0.0,
        }
    }
}

fn default_k() -> i64 {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Clear the namespace before upserting, so each run replaces the index.
    #[serde(default = "default_rebuild")]
    pub rebuild: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            rebuild: default_rebuild(),
        }
    }
}

fn default_rebuild() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:4000".to_string()
}

impl Config {
    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("OPENAI_BASE_URL") {
            self.embedding.base_url = url.clone();
            self.llm.base_url = url;
        }
        if let Some(v) = lookup("RAG_SOURCE_DIR") {
            self.paths.source_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("RAG_NORMALIZED_DIR") {
            self.paths.normalized_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("RAG_INDEX_URL") {
            self.index.url = v;
        }
        if let Some(v) = lookup("RAG_NAMESPACE") {
            self.index.namespace = v;
        }
        if let Some(v) = lookup("RAG_KEY_PREFIX") {
            self.index.key_prefix = v;
        }
        if let Some(v) = lookup("RAG_CHUNK_SIZE") {
            self.chunking.chunk_size = parse_var("RAG_CHUNK_SIZE", &v)?;
        }
        if let Some(v) = lookup("RAG_CHUNK_OVERLAP") {
            self.chunking.chunk_overlap = parse_var("RAG_CHUNK_OVERLAP", &v)?;
        }
        if let Some(v) = lookup("RAG_RETRIEVAL_K") {
            self.retrieval.k = parse_var("RAG_RETRIEVAL_K", &v)?;
        }
        if let Some(v) = lookup("RAG_EMBEDDING_PROVIDER") {
            self.embedding.provider = v;
        }
        if let Some(v) = lookup("RAG_EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Some(v) = lookup("RAG_EMBEDDING_DIMS") {
            self.embedding.dims = parse_var("RAG_EMBEDDING_DIMS", &v)?;
        }
        if let Some(v) = lookup("RAG_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = lookup("RAG_PROMPT_PATH") {
            self.llm.prompt_path = Some(PathBuf::from(v));
        }
        if let Some(port) = lookup("PORT") {
            let port: u16 = parse_var("PORT", &port)?;
            self.server.bind = format!("0.0.0.0:{}", port);
        }
        if let Some(v) = lookup("RAG_BIND") {
            self.server.bind = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        // Validate chunking
        if self.chunking.chunk_size < MIN_CHUNK_SIZE {
            bail!(
                "chunking.chunk_size ({}) must be at least {}",
                self.chunking.chunk_size,
                MIN_CHUNK_SIZE
            );
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            bail!(
                "chunking.chunk_overlap ({}) must be < chunking.chunk_size ({})",
                self.chunking.chunk_overlap,
                self.chunking.chunk_size
            );
        }

        // Validate retrieval
        if self.retrieval.k < 1 {
            bail!("retrieval.k must be >= 1");
        }
        if !(-1.0..=1.0).contains(&self.retrieval.min_score) {
            bail!("retrieval.min_score must be in [-1.0, 1.0]");
        }

        // Validate embedding
        match self.embedding.provider.as_str() {
            "disabled" | "openai" | "hashing" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled, openai, or hashing.",
                other
            ),
        }
        if self.embedding.is_enabled() {
            if self.embedding.dims == 0 {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    self.embedding.provider
                );
            }
            if self.embedding.batch_size == 0 {
                bail!("embedding.batch_size must be > 0");
            }
        }

        // Validate index
        if self.index.namespace.trim().is_empty() {
            bail!("index.namespace must not be empty");
        }
        self.index.location()?;

        Ok(())
    }
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| anyhow::anyhow!("Invalid value for {}: '{}' ({})", name, value, e))
}

/// Load configuration from `path` (if it exists), apply environment
/// overrides, and validate.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    } else {
        Config::default()
    };

    config.apply_overrides(|name| std::env::var(name).ok())?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_match_the_notes_vault_layout() {
        let config = Config::default();
        assert_eq!(config.paths.source_dir, PathBuf::from("all"));
        assert_eq!(config.paths.normalized_dir, PathBuf::from("all-txt"));
        assert_eq!(config.chunking.chunk_size, 500);
        assert_eq!(config.chunking.chunk_overlap, 0);
        assert_eq!(config.index.namespace, "obsidian-embeddings");
        assert_eq!(config.index.key_prefix, "obsidian:");
        assert_eq!(config.retrieval.k, 4);
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert!((config.llm.temperature - 0.3).abs() < f32::EPSILON);
        assert!(config.ingest.rebuild);
        config.validate().unwrap();
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
[chunking]
chunk_size = 200

[index]
url = "memory://"
"#,
        )
        .unwrap();
        assert_eq!(config.chunking.chunk_size, 200);
        assert_eq!(config.chunking.encoding, "cl100k_base");
        assert_eq!(config.index.location().unwrap(), IndexLocation::Memory);
        assert_eq!(config.index.namespace, "obsidian-embeddings");
    }

    #[test]
    fn env_overrides_win() {
        let mut config = Config::default();
        config
            .apply_overrides(env(&[
                ("RAG_CHUNK_SIZE", "128"),
                ("RAG_RETRIEVAL_K", "7"),
                ("RAG_NAMESPACE", "vault"),
                ("OPENAI_BASE_URL", "http://localhost:9999/v1"),
                ("PORT", "8080"),
            ]))
            .unwrap();
        assert_eq!(config.chunking.chunk_size, 128);
        assert_eq!(config.retrieval.k, 7);
        assert_eq!(config.index.namespace, "vault");
        assert_eq!(config.embedding.base_url, "http://localhost:9999/v1");
        assert_eq!(config.llm.base_url, "http://localhost:9999/v1");
        assert_eq!(config.server.bind, "0.0.0.0:8080");
    }

    #[test]
    fn bind_override_beats_port() {
        let mut config = Config::default();
        config
            .apply_overrides(env(&[("PORT", "8080"), ("RAG_BIND", "127.0.0.1:1")]))
            .unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:1");
    }

    #[test]
    fn bad_numeric_override_is_an_error() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(env(&[("RAG_CHUNK_SIZE", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("RAG_CHUNK_SIZE"));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = Config::default();
        config.chunking.chunk_overlap = 500;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.chunking.chunk_size = 3;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("at least 4"));
        config.chunking.chunk_size = 4;
        config.validate().unwrap();

        let mut config = Config::default();
        config.retrieval.k = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.embedding.provider = "ollama".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.index.url = "redis://localhost:6379".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.index.namespace = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn sqlite_location_parses_path() {
        let config = IndexConfig {
            url: "sqlite://data/x.sqlite".to_string(),
            ..IndexConfig::default()
        };
        assert_eq!(
            config.location().unwrap(),
            IndexLocation::Sqlite(PathBuf::from("data/x.sqlite"))
        );
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = load_config(Path::new("/definitely/not/here/rag.toml")).unwrap();
        assert!(!config.index.namespace.is_empty());
    }

    #[test]
    fn example_config_matches_defaults() {
        let example: Config =
            toml::from_str(include_str!("../config/rag.example.toml")).unwrap();
        example.validate().unwrap();
        let defaults = Config::default();
        assert_eq!(example.paths.source_dir, defaults.paths.source_dir);
        assert_eq!(example.normalize.include_globs, defaults.normalize.include_globs);
        assert_eq!(example.chunking.chunk_size, defaults.chunking.chunk_size);
        assert_eq!(example.embedding.dims, defaults.embedding.dims);
        assert_eq!(example.llm.model, defaults.llm.model);
        assert_eq!(example.index.url, defaults.index.url);
        assert_eq!(example.retrieval.k, defaults.retrieval.k);
        assert_eq!(example.server.bind, defaults.server.bind);
    }
}
