//! Indexing Pipeline (C8): one staged run — discover, chunk (CPU-bound,
//! `rayon` worker pool), flatten and dedupe by content hash, batch and
//! embed (retried with jittered backoff), upsert through the
//! Failover-wrapped vector store, and commit the manifest per file —
//! publishing progress as it goes.
//!
//! Grounded on the teacher's split between `rayon`-parallel scan/embed
//! worker groups (`semantic.rs::build_semantic_index`,
//! `scan.rs::walk_files_parallel`) and the `tokio` runtime driving
//! `server/src/main.rs`'s I/O-bound loop, generalized into one pipeline
//! object instead of being spread across ad hoc functions called from
//! `main`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rand::Rng;
use rayon::prelude::*;
use tokio::sync::{watch, RwLock};
use uuid::Uuid;

use crate::chunk::{Chunk, DedupStore};
use crate::config::{ChunkingConfig, IndexingConfig};
use crate::discovery::{self, DiscoveredFile, ScanConfig};
use crate::error::{CoreError, ErrorDetails};
use crate::manifest::{EmbeddingState, FileEntry, FileManifest};
use crate::providers::{EmbeddingProvider, SparseEmbeddingProvider};
use crate::query::KeywordIndex;
use crate::selector;
use crate::semantic_chunker::ChunkerConfig;
use crate::stats::{IndexingState, ProgressSnapshot, StatsRegistry};
use crate::tokenizer::Tokenizer;
use crate::vectorstore::{VectorRecord, VectorStore};

const COMPONENT: &str = "pipeline";
const MAX_PROVIDER_RETRIES: u32 = 4;
/// Default capacity of the pipeline's [`DedupStore`], sized well above a
/// typical single-repo chunk count so incremental reindexing keeps
/// recognizing unchanged chunks across runs rather than just within one.
const DEFAULT_DEDUP_CAPACITY: usize = 200_000;

/// Final counters for one `run()` call, returned to the caller in
/// addition to whatever was folded into the shared [`StatsRegistry`].
#[derive(Debug, Clone, Default)]
pub struct IndexSummary {
    pub files_discovered: usize,
    pub files_processed: usize,
    pub files_with_errors: usize,
    pub files_deleted: usize,
    pub chunks_created: usize,
    pub chunks_embedded: usize,
    pub chunks_indexed: usize,
    pub elapsed: Duration,
}

/// A file's chunks plus which chunker produced them, threaded through
/// the batching/embedding stages alongside the owning file so the
/// manifest can be committed per file once every one of its chunks has
/// been upserted (§5's per-file atomicity guarantee).
struct FileChunks {
    file: DiscoveredFile,
    chunks: Vec<Chunk>,
    governance_error: Option<CoreError>,
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Configuration the pipeline needs beyond what lives in [`ChunkingConfig`]/
/// [`IndexingConfig`]: which vector-store collection to target and the
/// per-file governance ceiling translated into a chunker-facing shape.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub collection: String,
    pub chunk_timeout: Duration,
    pub max_chunks_per_file: usize,
    pub batch_size: usize,
    pub dedup_capacity: usize,
}

impl PipelineConfig {
    pub fn from_configs(chunking: &ChunkingConfig, indexing: &IndexingConfig, collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            chunk_timeout: Duration::from_secs(chunking.chunk_timeout_seconds),
            max_chunks_per_file: chunking.max_chunks_per_file,
            batch_size: indexing.batch_size,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
        }
    }
}

/// The Indexing Pipeline (C8). Owns the manifest for the duration of a
/// call to [`IndexingPipeline::run`] (§3's ownership rule); the query
/// side only ever reads a [`ProgressSnapshot`] published over `progress`.
pub struct IndexingPipeline {
    pipeline_config: PipelineConfig,
    chunker_config: ChunkerConfig,
    tokenizer: Arc<dyn Tokenizer>,
    vector_store: Arc<dyn VectorStore>,
    dense_provider: Option<Arc<dyn EmbeddingProvider>>,
    sparse_provider: Option<Arc<dyn SparseEmbeddingProvider>>,
    stats: Arc<StatsRegistry>,
    progress_tx: watch::Sender<ProgressSnapshot>,
    keyword_index: Option<Arc<RwLock<KeywordIndex>>>,
    /// Shared across the batching stage (and, via [`Self::dedup_store`],
    /// available to chunkers that want it) so an unchanged chunk
    /// re-discovered on a later incremental pass is recognized by content
    /// hash without a second embed call (§5).
    dedup_store: Arc<DedupStore>,
}

impl IndexingPipeline {
    pub fn new(
        pipeline_config: PipelineConfig,
        chunker_config: ChunkerConfig,
        tokenizer: Arc<dyn Tokenizer>,
        vector_store: Arc<dyn VectorStore>,
        dense_provider: Option<Arc<dyn EmbeddingProvider>>,
        sparse_provider: Option<Arc<dyn SparseEmbeddingProvider>>,
        stats: Arc<StatsRegistry>,
    ) -> (Self, watch::Receiver<ProgressSnapshot>) {
        let (progress_tx, progress_rx) = watch::channel(ProgressSnapshot::default());
        let dedup_store = Arc::new(DedupStore::new(pipeline_config.dedup_capacity));
        (
            Self {
                pipeline_config,
                chunker_config,
                tokenizer,
                vector_store,
                dense_provider,
                sparse_provider,
                stats,
                progress_tx,
                keyword_index: None,
                dedup_store,
            },
            progress_rx,
        )
    }

    /// Shares a [`KeywordIndex`] with the Query Pipeline: this pipeline
    /// populates it from the same chunk content it embeds, so
    /// `KEYWORD_FALLBACK` has somewhere to go even when no embedding
    /// provider is configured at all.
    pub fn with_keyword_index(mut self, index: Arc<RwLock<KeywordIndex>>) -> Self {
        self.keyword_index = Some(index);
        self
    }

    /// Exposes the pipeline's [`DedupStore`] so a chunker that wants to
    /// skip re-emitting a chunk it has already produced in a prior pass
    /// can consult the same store the batching stage uses.
    pub fn dedup_store(&self) -> Arc<DedupStore> {
        Arc::clone(&self.dedup_store)
    }

    fn publish(&self, f: impl FnOnce(&mut ProgressSnapshot)) {
        self.progress_tx.send_modify(|snap| f(snap));
    }

    /// Stage 1 (Discovery) + governance-aware Stage 2 (Chunking pool).
    /// Chunking is CPU-bound and runs across `rayon`'s global pool via
    /// `spawn_blocking`, so the cooperative runtime never stalls on it
    /// (§5's "cooperative tasks must not block on CPU work").
    async fn discover_and_chunk(
        &self,
        scan_config: ScanConfig,
        manifest: &FileManifest,
        force_reindex: bool,
    ) -> Result<(Vec<FileChunks>, Vec<DiscoveredFile>), CoreError> {
        let discovered = tokio::task::spawn_blocking(move || discovery::discover_files(&scan_config))
            .await
            .map_err(|e| spawn_panic_error(e.to_string()))?;

        self.stats.add_files_discovered(COMPONENT, discovered.len() as u64);
        self.publish(|snap| {
            snap.state = IndexingState::InProgress;
            snap.files_discovered = discovered.len();
            snap.started_at.get_or_insert_with(Instant::now);
        });

        let to_chunk: Vec<DiscoveredFile> = if force_reindex {
            discovered.clone()
        } else {
            discovery::diff_against_manifest(&discovered, manifest).0
        };

        let chunker_config = self.chunker_config.clone();
        let tokenizer = Arc::clone(&self.tokenizer);
        let max_chunks = self.pipeline_config.max_chunks_per_file;
        let chunk_timeout = self.pipeline_config.chunk_timeout;

        let chunked = tokio::task::spawn_blocking(move || {
            to_chunk
                .into_par_iter()
                .map(|file| chunk_one_file(file, &chunker_config, tokenizer.as_ref(), max_chunks, chunk_timeout))
                .collect::<Vec<FileChunks>>()
        })
        .await
        .map_err(|e| spawn_panic_error(e.to_string()))?;

        Ok((chunked, discovered))
    }

    /// Runs one full index pass: discovery, chunking, batching/dedup,
    /// embedding, upsert, and per-file manifest commit. Deletions are
    /// applied first so a file removed and re-added in the same pass
    /// never races its own re-indexing.
    pub async fn run(
        &self,
        manifest: &mut FileManifest,
        scan_config: ScanConfig,
        force_reindex: bool,
    ) -> Result<IndexSummary, CoreError> {
        let start = Instant::now();
        let mut summary = IndexSummary::default();

        let (chunked_files, discovered) = self.discover_and_chunk(scan_config, manifest, force_reindex).await?;
        summary.files_discovered = discovered.len();

        let current_paths: Vec<String> = discovered.iter().map(|f| f.rel_path.clone()).collect();
        let deleted = manifest.deleted_since(&current_paths);
        for rel_path in &deleted {
            self.vector_store
                .delete(&self.pipeline_config.collection, crate::vectorstore::DeleteSelector::ByFilePath(rel_path.clone()))
                .await?;
            if let Some(index) = &self.keyword_index {
                if let Some(entry) = manifest.get(rel_path) {
                    let mut index = index.write().await;
                    for id in &entry.chunk_ids {
                        index.remove(id);
                    }
                }
            }
            manifest.remove(rel_path);
        }
        summary.files_deleted = deleted.len();

        // Flatten into one global chunk stream and dedup by content hash
        // across the whole batch (Stage 3), keeping a per-file chunk-id
        // list — including ids that were suppressed as duplicates, so
        // the manifest still records that the file references the
        // canonical chunk (§3's dedup lifecycle rule).
        let mut file_chunk_ids: HashMap<String, Vec<Uuid>> = HashMap::new();
        // Held as `Arc<Chunk>` (not `Chunk`) so the strong reference keeps
        // each newly seen chunk alive in `self.dedup_store` for the rest of
        // this run, rather than decaying the instant this loop moves on.
        let mut unique_chunks: Vec<Arc<Chunk>> = Vec::new();

        for fc in &chunked_files {
            if let Some(error) = &fc.governance_error {
                tracing::warn!(file = fc.file.rel_path, %error, "governance limit exceeded for file");
                self.stats.add_file_error(COMPONENT);
                summary.files_with_errors += 1;
            }
            let ids = file_chunk_ids.entry(fc.file.rel_path.clone()).or_default();
            for chunk in &fc.chunks {
                summary.chunks_created += 1;
                match self.dedup_store.get(&chunk.content_hash) {
                    Some(existing) => ids.push(existing.id),
                    None => {
                        let chunk = Arc::new(chunk.clone());
                        self.dedup_store.insert(&chunk);
                        ids.push(chunk.id);
                        unique_chunks.push(chunk);
                    }
                }
            }
        }
        self.stats.add_chunks_created(COMPONENT, summary.chunks_created as u64);

        // Stage 4 + 5: embed and upsert in fixed-size batches.
        let mut file_dense_ok: HashMap<String, bool> = HashMap::new();
        let mut file_sparse_ok: HashMap<String, bool> = HashMap::new();

        for batch in unique_chunks.chunks(self.pipeline_config.batch_size.max(1)) {
            let contents: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();

            // Size the batch with one concurrent-safe call instead of
            // counting each chunk's tokens again one at a time (§4.1).
            let token_counts = self.tokenizer.count_batch(&contents);
            let max_tokens = self
                .dense_provider
                .as_ref()
                .map(|p| p.max_tokens_per_input())
                .into_iter()
                .chain(self.sparse_provider.as_ref().map(|p| p.max_tokens_per_input()))
                .min();
            if let Some(max_tokens) = max_tokens {
                for (chunk, tokens) in batch.iter().zip(&token_counts) {
                    if *tokens > max_tokens {
                        tracing::warn!(
                            file = chunk.file_path,
                            tokens,
                            max_tokens,
                            "chunk exceeds the configured provider's max_tokens_per_input"
                        );
                    }
                }
            }

            let dense_result = match &self.dense_provider {
                Some(provider) => Some(with_retry(|| provider.embed_documents(&contents)).await),
                None => None,
            };
            let sparse_result = match &self.sparse_provider {
                Some(provider) => Some(with_retry(|| provider.embed_documents(&contents)).await),
                None => None,
            };

            let dense_vectors = match dense_result {
                Some(Ok(v)) => Some(v),
                Some(Err(error)) => {
                    tracing::warn!(%error, "dense embedding failed for batch, marking dense-failed");
                    None
                }
                None => None,
            };
            let sparse_vectors = match sparse_result {
                Some(Ok(v)) => Some(v),
                Some(Err(error)) => {
                    tracing::warn!(%error, "sparse embedding failed for batch, marking sparse-failed");
                    None
                }
                None => None,
            };

            let batch_dense_ok = self.dense_provider.is_some() && dense_vectors.is_some();
            let batch_sparse_ok = self.sparse_provider.is_some() && sparse_vectors.is_some();

            let records: Vec<VectorRecord> = batch
                .iter()
                .enumerate()
                .map(|(i, chunk)| VectorRecord {
                    id: chunk.id,
                    dense: dense_vectors.as_ref().map(|v| v[i].clone()),
                    sparse: sparse_vectors.as_ref().map(|v| v[i].clone()),
                    metadata: serde_json::json!({
                        "file_path": chunk.file_path,
                        "content": chunk.content,
                        "start_line": chunk.start_line,
                        "end_line": chunk.end_line,
                        "source": format!("{:?}", chunk.source),
                    }),
                })
                .collect();

            if !records.is_empty() {
                self.vector_store.upsert(&self.pipeline_config.collection, records).await?;
                summary.chunks_embedded += batch.iter().filter(|_| batch_dense_ok || batch_sparse_ok).count();
                summary.chunks_indexed += batch.len();
                self.stats.add_chunks_indexed(COMPONENT, batch.len() as u64);
            }

            for chunk in batch {
                file_dense_ok
                    .entry(chunk.file_path.clone())
                    .and_modify(|ok| *ok = *ok && batch_dense_ok)
                    .or_insert(batch_dense_ok);
                file_sparse_ok
                    .entry(chunk.file_path.clone())
                    .and_modify(|ok| *ok = *ok && batch_sparse_ok)
                    .or_insert(batch_sparse_ok);
            }
        }
        // Stage 6: commit the manifest per file, atomically, once every
        // chunk it references is accounted for.
        for fc in &chunked_files {
            let rel_path = &fc.file.rel_path;
            let ids = file_chunk_ids.remove(rel_path).unwrap_or_default();
            let dense_ok = file_dense_ok.get(rel_path).copied().unwrap_or(false);
            let sparse_ok = file_sparse_ok.get(rel_path).copied().unwrap_or(false);
            if ids.is_empty() && fc.governance_error.is_some() {
                continue;
            }

            manifest.upsert(FileEntry {
                rel_path: rel_path.clone(),
                content_hash: fc.file.content_hash.clone(),
                size: fc.file.size,
                chunk_count: ids.len(),
                chunk_ids: ids,
                embedding_state: EmbeddingState {
                    has_dense: dense_ok,
                    has_sparse: sparse_ok,
                    dense_model: self.dense_provider.as_ref().filter(|_| dense_ok).map(|p| p.model_name().to_string()),
                    sparse_model: self.sparse_provider.as_ref().filter(|_| sparse_ok).map(|p| p.model_name().to_string()),
                },
                indexed_at_unix: now_unix(),
            });
            summary.files_processed += 1;
            self.stats.add_files_processed(COMPONENT, 1);
            self.publish(|snap| {
                snap.files_processed += 1;
                snap.current_file = Some(rel_path.clone());
            });
        }

        summary.elapsed = start.elapsed();
        self.stats.add_elapsed(COMPONENT, summary.elapsed);
        self.publish(|snap| {
            snap.state = IndexingState::Idle;
            snap.chunks_created = summary.chunks_created;
            snap.chunks_indexed = summary.chunks_indexed;
            snap.current_file = None;
        });

        Ok(summary)
    }
}

fn chunk_one_file(
    file: DiscoveredFile,
    config: &ChunkerConfig,
    tokenizer: &dyn Tokenizer,
    max_chunks_per_file: usize,
    chunk_timeout: Duration,
) -> FileChunks {
    let Ok(source) = std::fs::read_to_string(&file.abs_path) else {
        return FileChunks {
            governance_error: Some(CoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("failed to read '{}' (deleted mid-pass, or not valid UTF-8)", file.rel_path),
            ))),
            file,
            chunks: Vec::new(),
        };
    };

    let started = Instant::now();
    let chunk_result = selector::chunk_file(&file.rel_path, &source, config, tokenizer);
    let elapsed = started.elapsed();

    let (mut chunks, mut governance_error) = match chunk_result {
        Ok((chunks, _source_kind)) => (chunks, None),
        Err(error) => (Vec::new(), Some(error)),
    };

    if governance_error.is_none() && elapsed > chunk_timeout {
        governance_error = Some(crate::error::governance_error(
            crate::error::GovernanceKind::ChunkingTimeout,
            file.rel_path.as_str(),
            format!("chunking '{}' exceeded {:?} (took {:?})", file.rel_path, chunk_timeout, elapsed),
            vec![
                "raise chunk_timeout_seconds for unusually large files".into(),
                "exclude the file via the project's ignore rules".into(),
            ],
        ));
    }
    if governance_error.is_none() && chunks.len() > max_chunks_per_file {
        governance_error = Some(crate::error::governance_error(
            crate::error::GovernanceKind::ChunkLimitExceeded,
            file.rel_path.as_str(),
            format!(
                "'{}' produced {} chunks, exceeding max_chunks_per_file={}",
                file.rel_path,
                chunks.len(),
                max_chunks_per_file
            ),
            vec![
                "raise max_chunks_per_file in the chunking config".into(),
                "split the file or exclude it from indexing".into(),
            ],
        ));
        chunks.truncate(max_chunks_per_file);
    }

    FileChunks { file, chunks, governance_error }
}

fn spawn_panic_error(message: String) -> CoreError {
    crate::error::governance_error(
        crate::error::GovernanceKind::ChunkingTimeout,
        "",
        format!("worker task panicked: {message}"),
        vec![
            "check logs for the panic message from the chunking worker".into(),
            "re-run indexing; a transient panic does not corrupt the manifest".into(),
        ],
    )
}

/// Jittered exponential backoff for transient provider errors, escalating
/// to the caller once `MAX_PROVIDER_RETRIES` is exhausted (§7's
/// Provider.Transient -> Provider.Permanent escalation).
async fn with_retry<T, F, Fut>(mut call: F) -> Result<T, CoreError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, CoreError>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retryable() && attempt < MAX_PROVIDER_RETRIES => {
                let base_ms = 100u64 * 2u64.pow(attempt);
                let jitter_ms = rand::thread_rng().gen_range(0..base_ms.max(1));
                tokio::time::sleep(Duration::from_millis(base_ms + jitter_ms)).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorDetails;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct StubDense {
        calls: AtomicUsize,
        fail_first: bool,
    }

    #[async_trait]
    impl EmbeddingProvider for StubDense {
        async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && call == 0 {
                return Err(CoreError::ProviderTransient {
                    message: "first call fails".into(),
                    details: ErrorDetails::new(),
                    suggestions: vec!["retry".into(), "reduce batch size".into()],
                });
            }
            Ok(texts.iter().map(|_| vec![0.1, 0.2]).collect())
        }
        async fn embed_queries(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError> {
            self.embed_documents(texts).await
        }
        fn model_name(&self) -> &str {
            "stub-dense"
        }
        fn dimension(&self) -> usize {
            2
        }
        fn max_batch_size(&self) -> usize {
            64
        }
        fn max_tokens_per_input(&self) -> usize {
            512
        }
    }

    fn runtime_store(dir: &std::path::Path) -> Arc<dyn VectorStore> {
        Arc::new(crate::vectorstore::backup::BackupStore::open(dir.join("store.json")).unwrap())
    }

    #[tokio::test]
    async fn index_run_chunks_embeds_and_commits_manifest() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn a() {\n    1\n}\n").unwrap();
        std::fs::write(dir.path().join("b.rs"), "fn b() {\n    2\n}\n").unwrap();

        let store = runtime_store(dir.path());
        let dense = Arc::new(StubDense { calls: AtomicUsize::new(0), fail_first: false });
        let stats = Arc::new(StatsRegistry::new());
        let (pipeline, _rx) = IndexingPipeline::new(
            PipelineConfig {
                collection: "chunks".into(),
                chunk_timeout: Duration::from_secs(30),
                max_chunks_per_file: 5000,
                batch_size: 64,
                dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            },
            ChunkerConfig::default(),
            Arc::new(crate::tokenizer::BytesEstimateTokenizer),
            store,
            Some(dense),
            None,
            stats,
        );

        let mut manifest = FileManifest::new();
        let scan_config = ScanConfig::new(dir.path());
        let summary = pipeline.run(&mut manifest, scan_config, false).await.unwrap();

        assert_eq!(summary.files_discovered, 2);
        assert_eq!(summary.files_processed, 2);
        assert!(summary.chunks_indexed > 0);
        assert!(manifest.get("a.rs").unwrap().embedding_state.has_dense);
    }

    #[tokio::test]
    async fn reindex_of_unchanged_project_embeds_nothing_new() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn a() {}\n").unwrap();
        let store = runtime_store(dir.path());
        let dense = Arc::new(StubDense { calls: AtomicUsize::new(0), fail_first: false });
        let stats = Arc::new(StatsRegistry::new());
        let (pipeline, _rx) = IndexingPipeline::new(
            PipelineConfig {
                collection: "chunks".into(),
                chunk_timeout: Duration::from_secs(30),
                max_chunks_per_file: 5000,
                batch_size: 64,
                dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            },
            ChunkerConfig::default(),
            Arc::new(crate::tokenizer::BytesEstimateTokenizer),
            store,
            Some(dense.clone()),
            None,
            stats,
        );

        let mut manifest = FileManifest::new();
        pipeline.run(&mut manifest, ScanConfig::new(dir.path()), false).await.unwrap();
        let calls_after_first = dense.calls.load(Ordering::SeqCst);

        let summary = pipeline.run(&mut manifest, ScanConfig::new(dir.path()), false).await.unwrap();
        assert_eq!(summary.files_processed, 0);
        assert_eq!(dense.calls.load(Ordering::SeqCst), calls_after_first);
    }
}
