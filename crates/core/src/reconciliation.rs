//! Reconciliation (C9): fills in missing dense/sparse embeddings on
//! already-indexed files without reparsing unchanged content, so turning
//! on sparse embeddings later, or swapping either model, never forces a
//! full reindex.
//!
//! Grounded on the manifest-diff idiom in the teacher's `scan.rs`/
//! `watch.rs` incremental-update functions (`update_manifest_entry`),
//! generalized from "update search index bitmasks" to "backfill a
//! missing embedding modality".

use std::sync::Arc;

use crate::chunk::{hash_content, Chunk, ChunkSource};
use crate::error::CoreError;
use crate::manifest::{EmbeddingPartition, FileManifest};
use crate::providers::{EmbeddingProvider, SparseEmbeddingProvider};
use crate::selector;
use crate::semantic_chunker::ChunkerConfig;
use crate::tokenizer::Tokenizer;
use crate::vectorstore::{VectorRecord, VectorStore};

/// Summary of one reconciliation pass, returned to the caller so it can
/// be folded into the pipeline's statistics without reconciliation
/// needing its own registry wiring.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationReport {
    pub files_backfilled: usize,
    pub chunks_embedded_dense: usize,
    pub chunks_embedded_sparse: usize,
    pub files_recomputed_from_source: usize,
    pub skipped_reason: Option<&'static str>,
}

/// Open Question (a): whether reconciliation tolerates a vector store
/// with no raw-content recall. Resolved in favor of both paths being
/// live — `store.supports_raw_content()` picks between them per file.
async fn load_chunk_texts(
    store: &dyn VectorStore,
    collection: &str,
    rel_path: &str,
    chunk_ids: &[uuid::Uuid],
    project_root: &std::path::Path,
    tokenizer: &dyn Tokenizer,
    chunker_config: &ChunkerConfig,
) -> Result<Vec<(uuid::Uuid, String)>, CoreError> {
    if store.supports_raw_content() {
        let records = store.fetch_metadata(collection, chunk_ids).await?;
        if records.len() == chunk_ids.len() {
            return Ok(records
                .into_iter()
                .filter_map(|r| {
                    let content = r.metadata.get("content")?.as_str()?.to_string();
                    Some((r.id, content))
                })
                .collect());
        }
    }
    // Fall back to re-chunking from source: slower, but correct even
    // against a store that only keeps vectors.
    let abs_path = project_root.join(rel_path);
    let source = match std::fs::read_to_string(&abs_path) {
        Ok(source) => source,
        // A file deleted out from under reconciliation isn't an error
        // (§4.9) — the next discovery pass removes it from the manifest.
        // An empty backfill here just leaves the file's missing modality
        // missing for one more pass.
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(error) => return Err(error.into()),
    };
    let (chunks, _) = selector::chunk_file(rel_path, &source, chunker_config, tokenizer)?;
    Ok(dedup_by_hash(chunks).into_iter().map(|c: Chunk| (c.id, c.content)).collect())
}

/// Whether reconciliation should run at all. Mirrors §4.9's three
/// unconditional skip conditions plus the "nothing to do" no-op case.
pub fn should_run(
    partition: &EmbeddingPartition,
    force_reindex: bool,
    vector_store_configured: bool,
    dense_provider: Option<&Arc<dyn EmbeddingProvider>>,
    sparse_provider: Option<&Arc<dyn SparseEmbeddingProvider>>,
) -> bool {
    if force_reindex || !vector_store_configured {
        return false;
    }
    if dense_provider.is_none() && sparse_provider.is_none() {
        return false;
    }
    !partition.is_empty_of_work()
}

/// Runs one reconciliation pass over `manifest`, backfilling whichever
/// modality (dense, sparse, or both) each file is missing for the
/// *currently configured* model names, then updates `manifest` in place.
#[allow(clippy::too_many_arguments)]
pub async fn reconcile(
    manifest: &mut FileManifest,
    project_root: &std::path::Path,
    collection: &str,
    dense_provider: Option<&Arc<dyn EmbeddingProvider>>,
    sparse_provider: Option<&Arc<dyn SparseEmbeddingProvider>>,
    vector_store: &dyn VectorStore,
    tokenizer: &dyn Tokenizer,
    chunker_config: &ChunkerConfig,
    force_reindex: bool,
) -> Result<ReconciliationReport, CoreError> {
    let dense_model = dense_provider.map(|p| p.model_name().to_string());
    let sparse_model = sparse_provider.map(|p| p.model_name().to_string());
    let partition = manifest.partition_by_embedding_state(dense_model.as_deref(), sparse_model.as_deref());

    if !should_run(&partition, force_reindex, true, dense_provider, sparse_provider) {
        let reason = if force_reindex {
            "force_reindex set"
        } else if partition.is_empty_of_work() {
            "no missing modalities"
        } else {
            "no embedding provider configured"
        };
        return Ok(ReconciliationReport { skipped_reason: Some(reason), ..Default::default() });
    }

    let mut report = ReconciliationReport::default();
    let needs_work: Vec<String> = partition
        .dense_only_missing
        .iter()
        .chain(partition.sparse_only_missing.iter())
        .chain(partition.both_missing.iter())
        .cloned()
        .collect();

    for rel_path in needs_work {
        let Some(entry) = manifest.get(&rel_path).cloned() else { continue };
        if entry.chunk_ids.is_empty() {
            continue;
        }

        let need_dense = dense_provider.is_some() && !entry.embedding_state.dense_current(dense_model.as_deref().unwrap_or(""));
        let need_sparse = sparse_provider.is_some() && !entry.embedding_state.sparse_current(sparse_model.as_deref().unwrap_or(""));
        if !need_dense && !need_sparse {
            continue;
        }

        let used_store_content = vector_store.supports_raw_content();
        let texts = load_chunk_texts(
            vector_store,
            collection,
            &rel_path,
            &entry.chunk_ids,
            project_root,
            tokenizer,
            chunker_config,
        )
        .await?;
        if !used_store_content {
            report.files_recomputed_from_source += 1;
        }
        if texts.is_empty() {
            continue;
        }

        let contents: Vec<String> = texts.iter().map(|(_, c)| c.clone()).collect();
        let mut records = Vec::with_capacity(texts.len());

        let dense_vectors = if need_dense {
            Some(dense_provider.unwrap().embed_documents(&contents).await?)
        } else {
            None
        };
        let sparse_vectors = if need_sparse {
            Some(sparse_provider.unwrap().embed_documents(&contents).await?)
        } else {
            None
        };

        for (i, (chunk_id, _text)) in texts.iter().enumerate() {
            records.push(VectorRecord {
                id: *chunk_id,
                dense: dense_vectors.as_ref().map(|v| v[i].clone()),
                sparse: sparse_vectors.as_ref().map(|v| v[i].clone()),
                metadata: serde_json::json!({ "file_path": rel_path }),
            });
        }

        if need_dense {
            report.chunks_embedded_dense += records.len();
        }
        if need_sparse {
            report.chunks_embedded_sparse += records.len();
        }

        vector_store.upsert(collection, records).await?;

        if let Some(entry) = manifest.entries.get_mut(&rel_path) {
            if need_dense {
                entry.embedding_state.has_dense = true;
                entry.embedding_state.dense_model = dense_model.clone();
            }
            if need_sparse {
                entry.embedding_state.has_sparse = true;
                entry.embedding_state.sparse_model = sparse_model.clone();
            }
        }
        report.files_backfilled += 1;
    }

    Ok(report)
}

/// Deduplicates a batch of freshly recomputed chunks by content hash, so
/// a reconciliation pass never double-embeds two chunks that happen to
/// share content after a re-chunk.
pub fn dedup_by_hash(chunks: Vec<Chunk>) -> Vec<Chunk> {
    let mut seen = std::collections::HashSet::new();
    chunks
        .into_iter()
        .filter(|c| seen.insert(hash_content(&c.content)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{EmbeddingState, FileEntry};

    fn entry_with(rel_path: &str, dense_model: Option<&str>) -> FileEntry {
        FileEntry {
            rel_path: rel_path.to_string(),
            content_hash: "h".into(),
            size: 10,
            chunk_count: 1,
            chunk_ids: vec![uuid::Uuid::now_v7()],
            embedding_state: EmbeddingState {
                has_dense: dense_model.is_some(),
                has_sparse: false,
                dense_model: dense_model.map(String::from),
                sparse_model: None,
            },
            indexed_at_unix: 0,
        }
    }

    #[test]
    fn should_run_is_false_when_force_reindex() {
        let partition = EmbeddingPartition {
            both_missing: vec!["a.rs".into()],
            ..Default::default()
        };
        assert!(!should_run(&partition, true, true, None, None));
    }

    #[test]
    fn should_run_is_false_with_no_providers() {
        let partition = EmbeddingPartition {
            both_missing: vec!["a.rs".into()],
            ..Default::default()
        };
        assert!(!should_run(&partition, false, true, None, None));
    }

    #[test]
    fn should_run_is_false_when_nothing_missing() {
        let partition = EmbeddingPartition::default();
        assert!(!should_run(&partition, false, true, None, None));
    }

    #[test]
    fn dedup_by_hash_drops_repeats() {
        let a = Chunk::new("a.rs", "same", 1, 1, 0, 4, ChunkSource::Delimiter, 1);
        let b = Chunk::new("b.rs", "same", 1, 1, 0, 4, ChunkSource::Delimiter, 1);
        let out = dedup_by_hash(vec![a, b]);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn manifest_partition_feeds_should_run_correctly() {
        let mut manifest = FileManifest::new();
        manifest.upsert(entry_with("a.rs", Some("old-model")));
        let partition = manifest.partition_by_embedding_state(Some("new-model"), None);
        assert!(!partition.dense_only_missing.is_empty());
    }
}
