//! Configuration surface (§6, produced by this crate): a single
//! `serde`/`toml`-deserializable `Config` struct tree. Data only — no
//! file discovery, env-var merge, or credential resolution, which are
//! out of scope per §1. Shaped after the teacher's `ScanConfig`
//! (`server/src/types.rs`) and its `.codescope.toml` convention
//! (`server/src/init.rs`), generalized from one flat struct into the
//! five sections §6 names.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024
}

fn default_max_results() -> usize {
    20
}

/// `project.{path, name, token_limit, max_file_size, max_results}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub path: PathBuf,
    pub name: String,
    #[serde(default = "default_token_limit")]
    pub token_limit: usize,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_token_limit() -> usize {
    512
}

impl ProjectConfig {
    /// Converts the serializable project section into the
    /// [`crate::discovery::ScanConfig`] discovery actually walks with.
    pub fn to_scan_config(&self) -> crate::discovery::ScanConfig {
        crate::discovery::ScanConfig {
            max_file_size: self.max_file_size,
            ..crate::discovery::ScanConfig::new(&self.path)
        }
    }
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("."),
            name: "project".to_string(),
            token_limit: default_token_limit(),
            max_file_size: default_max_file_size(),
            max_results: default_max_results(),
        }
    }
}

/// One provider entry: an enable flag plus provider-specific settings,
/// left as an open JSON object since the concrete provider client
/// factories live outside this crate (§1 out-of-scope).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderEntry {
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub settings: HashMap<String, toml::Value>,
}

/// `provider.{embedding, sparse_embedding, reranking, vector_store}`,
/// each a list so a caller can configure more than one candidate and
/// pick the first enabled entry (matching the teacher's preset-list
/// pattern in `semantic.rs::resolve_model`, generalized to the spec's
/// "list of provider entries with enable flag" shape).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderConfig {
    #[serde(default)]
    pub embedding: Vec<ProviderEntry>,
    #[serde(default)]
    pub sparse_embedding: Vec<ProviderEntry>,
    #[serde(default)]
    pub reranking: Vec<ProviderEntry>,
    #[serde(default)]
    pub vector_store: Vec<ProviderEntry>,
}

impl ProviderConfig {
    pub fn enabled(entries: &[ProviderEntry]) -> Option<&ProviderEntry> {
        entries.iter().find(|e| e.enabled)
    }
}

fn default_importance_threshold() -> f32 {
    0.3
}

fn default_max_chunks_per_file() -> usize {
    5000
}

fn default_chunk_timeout_seconds() -> u64 {
    30
}

/// `chunker.{importance_threshold, prefer_semantic, force_delimiter_for_languages,
/// enable_hybrid_chunking, max_chunks_per_file, chunk_timeout_seconds}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_importance_threshold")]
    pub importance_threshold: f32,
    #[serde(default = "default_true")]
    pub prefer_semantic: bool,
    #[serde(default)]
    pub force_delimiter_for_languages: Vec<String>,
    #[serde(default = "default_true")]
    pub enable_hybrid_chunking: bool,
    #[serde(default = "default_max_chunks_per_file")]
    pub max_chunks_per_file: usize,
    #[serde(default = "default_chunk_timeout_seconds")]
    pub chunk_timeout_seconds: u64,
    #[serde(default = "default_max_chunk_tokens")]
    pub max_chunk_tokens: usize,
}

fn default_true() -> bool {
    true
}

fn default_max_chunk_tokens() -> usize {
    512
}

impl ChunkingConfig {
    /// Converts the serializable chunking section into the
    /// [`crate::semantic_chunker::ChunkerConfig`] the Semantic/Delimiter
    /// chunkers actually consume, carrying over `max_chunk_tokens` and
    /// leaving the chunker-internal tunables (`min_chunk_tokens`,
    /// `max_chunk_chars`, `simple_overlap`) at their defaults.
    pub fn to_chunker_config(&self) -> crate::semantic_chunker::ChunkerConfig {
        crate::semantic_chunker::ChunkerConfig {
            max_chunk_tokens: self.max_chunk_tokens,
            ..crate::semantic_chunker::ChunkerConfig::default()
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            importance_threshold: default_importance_threshold(),
            prefer_semantic: true,
            force_delimiter_for_languages: Vec::new(),
            enable_hybrid_chunking: true,
            max_chunks_per_file: default_max_chunks_per_file(),
            chunk_timeout_seconds: default_chunk_timeout_seconds(),
            max_chunk_tokens: default_max_chunk_tokens(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout_s() -> u64 {
    30
}

fn default_success_threshold() -> u32 {
    2
}

/// `failover.{enabled, failure_threshold, recovery_timeout_s, success_threshold,
/// backup_file_path}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_recovery_timeout_s")]
    pub recovery_timeout_s: u64,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    pub backup_file_path: PathBuf,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: default_failure_threshold(),
            recovery_timeout_s: default_recovery_timeout_s(),
            success_threshold: default_success_threshold(),
            backup_file_path: PathBuf::from(".codeweaver/backup.json"),
        }
    }
}

impl FailoverConfig {
    /// Converts the serializable config into the runtime tunables
    /// [`crate::vectorstore::failover::FailoverStore`] consumes.
    pub fn to_runtime(&self) -> crate::vectorstore::failover::FailoverConfig {
        crate::vectorstore::failover::FailoverConfig {
            failure_threshold: self.failure_threshold,
            recovery_timeout: std::time::Duration::from_secs(self.recovery_timeout_s),
            success_threshold: self.success_threshold,
        }
    }
}

fn default_debounce_ms() -> u64 {
    500
}

/// `watcher.{enabled, debounce_ms}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self { enabled: false, debounce_ms: default_debounce_ms() }
    }
}

fn default_batch_size() -> usize {
    64
}

fn default_batch_timeout_ms() -> u64 {
    250
}

fn default_over_fetch() -> usize {
    3
}

/// Tunables for the Indexing Pipeline's batching stage and the Query
/// Pipeline's candidate over-fetch, kept in their own section since
/// neither maps cleanly onto the four sections §6 names explicitly but
/// both are configuration surface the pipeline/query modules need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,
    #[serde(default = "default_over_fetch")]
    pub over_fetch: usize,
    #[serde(default)]
    pub force_reindex: bool,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_timeout_ms: default_batch_timeout_ms(),
            over_fetch: default_over_fetch(),
            force_reindex: false,
        }
    }
}

/// The complete configuration surface a caller constructs and hands to
/// the pipeline/query/failover modules. Assembling this from files,
/// environment variables, or CLI flags is out of scope (§1) — this type
/// is the destination of that assembly, not the mechanism.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub chunker: ChunkingConfig,
    #[serde(default)]
    pub failover: FailoverConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
}

impl Config {
    /// Deserializes a `Config` from a TOML document, matching the
    /// teacher's `.codescope.toml` convention. No file-discovery or
    /// env-merge happens here — the caller reads the file and hands us
    /// the raw string.
    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_fills_in_defaults() {
        let raw = r#"
            [project]
            path = "."
            name = "demo"
        "#;
        let config = Config::from_toml_str(raw).unwrap();
        assert_eq!(config.project.name, "demo");
        assert_eq!(config.chunker.max_chunks_per_file, 5000);
        assert_eq!(config.failover.failure_threshold, 5);
        assert!(!config.watcher.enabled);
    }

    #[test]
    fn chunking_config_carries_max_chunk_tokens_into_chunker_config() {
        let mut chunking = ChunkingConfig::default();
        chunking.max_chunk_tokens = 256;
        let chunker = chunking.to_chunker_config();
        assert_eq!(chunker.max_chunk_tokens, 256);
    }

    #[test]
    fn project_config_carries_max_file_size_into_scan_config() {
        let mut project = ProjectConfig::default();
        project.max_file_size = 2048;
        let scan = project.to_scan_config();
        assert_eq!(scan.max_file_size, 2048);
    }

    #[test]
    fn enabled_helper_finds_first_enabled_provider() {
        let entries = vec![
            ProviderEntry { name: "a".into(), enabled: false, settings: HashMap::new() },
            ProviderEntry { name: "b".into(), enabled: true, settings: HashMap::new() },
        ];
        let found = ProviderConfig::enabled(&entries).unwrap();
        assert_eq!(found.name, "b");
    }
}
