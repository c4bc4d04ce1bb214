//! File manifest (C7): the persisted record of what has been indexed, used
//! to diff the current filesystem state against the last successful
//! index and drive incremental reindexing.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, ErrorDetails};

/// Per-modality embedding presence for one file, tracked so
/// reconciliation (C9) can backfill a single missing modality without a
/// full reindex. The model names travel with the flags so reconciliation
/// can tell "has dense embeddings" from "has dense embeddings *for the
/// currently configured model*" — switching models must look like a
/// missing embedding, not a complete one.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmbeddingState {
    pub has_dense: bool,
    pub has_sparse: bool,
    pub dense_model: Option<String>,
    pub sparse_model: Option<String>,
}

impl EmbeddingState {
    /// Whether this file's dense embedding, if any, was produced by
    /// `model` — used to decide whether a model change requires
    /// re-embedding rather than reading `has_dense` at face value.
    pub fn dense_current(&self, model: &str) -> bool {
        self.has_dense && self.dense_model.as_deref() == Some(model)
    }

    pub fn sparse_current(&self, model: &str) -> bool {
        self.has_sparse && self.sparse_model.as_deref() == Some(model)
    }
}

/// One file's entry in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub rel_path: String,
    pub content_hash: String,
    pub size: u64,
    pub chunk_count: usize,
    /// Chunk ids produced for this file as of the last successful index,
    /// so the manifest-completeness invariant can be checked directly
    /// against the vector store without re-chunking.
    #[serde(default)]
    pub chunk_ids: Vec<uuid::Uuid>,
    pub embedding_state: EmbeddingState,
    pub indexed_at_unix: u64,
}

/// How a set of files partitions with respect to a pair of currently
/// configured embedding models — the input to Reconciliation (C9).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmbeddingPartition {
    pub dense_only_missing: Vec<String>,
    pub sparse_only_missing: Vec<String>,
    pub both_missing: Vec<String>,
    pub complete: Vec<String>,
}

impl EmbeddingPartition {
    pub fn is_empty_of_work(&self) -> bool {
        self.dense_only_missing.is_empty()
            && self.sparse_only_missing.is_empty()
            && self.both_missing.is_empty()
    }
}

/// The full manifest: every indexed file keyed by its repo-relative path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileManifest {
    pub version: u32,
    pub entries: HashMap<String, FileEntry>,
}

const MANIFEST_VERSION: u32 = 1;

impl FileManifest {
    pub fn new() -> Self {
        Self { version: MANIFEST_VERSION, entries: HashMap::new() }
    }

    pub fn get(&self, rel_path: &str) -> Option<&FileEntry> {
        self.entries.get(rel_path)
    }

    pub fn upsert(&mut self, entry: FileEntry) {
        self.entries.insert(entry.rel_path.clone(), entry);
    }

    pub fn remove(&mut self, rel_path: &str) -> Option<FileEntry> {
        self.entries.remove(rel_path)
    }

    /// True when `content_hash` differs from the stored entry, or the
    /// path isn't in the manifest at all (new file).
    pub fn is_stale(&self, rel_path: &str, content_hash: &str) -> bool {
        match self.entries.get(rel_path) {
            Some(entry) => entry.content_hash != content_hash,
            None => true,
        }
    }

    /// Partitions every entry in the manifest by which embedding
    /// modalities are missing *for the given model names*, the query
    /// Reconciliation (C9) runs before a normal index pass so that
    /// switching on sparse embeddings, or changing either model, never
    /// requires a full reindex to notice what needs backfilling.
    pub fn partition_by_embedding_state(
        &self,
        dense_model: Option<&str>,
        sparse_model: Option<&str>,
    ) -> EmbeddingPartition {
        let mut partition = EmbeddingPartition::default();
        for entry in self.entries.values() {
            let dense_ok = match dense_model {
                Some(model) => entry.embedding_state.dense_current(model),
                None => true,
            };
            let sparse_ok = match sparse_model {
                Some(model) => entry.embedding_state.sparse_current(model),
                None => true,
            };
            match (dense_ok, sparse_ok) {
                (true, true) => partition.complete.push(entry.rel_path.clone()),
                (false, true) => partition.dense_only_missing.push(entry.rel_path.clone()),
                (true, false) => partition.sparse_only_missing.push(entry.rel_path.clone()),
                (false, false) => partition.both_missing.push(entry.rel_path.clone()),
            }
        }
        partition
    }

    /// Paths present in the manifest but absent from `current_paths` —
    /// files that were deleted since the last index.
    pub fn deleted_since(&self, current_paths: &[String]) -> Vec<String> {
        let current: std::collections::HashSet<&str> =
            current_paths.iter().map(|s| s.as_str()).collect();
        self.entries
            .keys()
            .filter(|path| !current.contains(path.as_str()))
            .cloned()
            .collect()
    }

    /// Loads a manifest from disk, returning an empty manifest if the
    /// file does not exist yet (first index of a repo).
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| CoreError::Parse {
            message: e.to_string(),
            details: ErrorDetails::new().with_file(path),
            suggestions: vec![
                "delete the corrupt manifest file to force a full reindex".into(),
                "check the manifest was not partially written by a concurrent process".into(),
            ],
        })
    }

    /// Persists the manifest via write-to-temp-then-rename, so a crash
    /// mid-write never leaves a torn manifest on disk.
    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        let tmp_path = path.with_extension("tmp");
        let serialized = serde_json::to_vec_pretty(self)?;
        std::fs::write(&tmp_path, serialized)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(rel_path: &str, hash: &str) -> FileEntry {
        FileEntry {
            rel_path: rel_path.to_string(),
            content_hash: hash.to_string(),
            size: 10,
            chunk_count: 1,
            chunk_ids: Vec::new(),
            embedding_state: EmbeddingState::default(),
            indexed_at_unix: 0,
        }
    }

    #[test]
    fn partition_separates_files_by_missing_modality() {
        let mut manifest = FileManifest::new();
        let mut complete = entry("complete.rs", "1");
        complete.embedding_state = EmbeddingState {
            has_dense: true,
            has_sparse: true,
            dense_model: Some("bge-small".into()),
            sparse_model: Some("splade".into()),
        };
        let mut dense_only = entry("dense_only.rs", "2");
        dense_only.embedding_state = EmbeddingState {
            has_dense: true,
            has_sparse: false,
            dense_model: Some("bge-small".into()),
            sparse_model: None,
        };
        let stale_model = entry("stale_model.rs", "3"); // has_dense=false entirely
        manifest.upsert(complete);
        manifest.upsert(dense_only);
        manifest.upsert(stale_model);

        let partition = manifest.partition_by_embedding_state(Some("bge-small"), Some("splade"));
        assert_eq!(partition.complete, vec!["complete.rs".to_string()]);
        assert_eq!(partition.sparse_only_missing, vec!["dense_only.rs".to_string()]);
        assert_eq!(partition.both_missing, vec!["stale_model.rs".to_string()]);
        assert!(partition.dense_only_missing.is_empty());
    }

    #[test]
    fn partition_treats_model_change_as_missing() {
        let mut manifest = FileManifest::new();
        let mut stale = entry("a.rs", "1");
        stale.embedding_state = EmbeddingState {
            has_dense: true,
            has_sparse: false,
            dense_model: Some("old-model".into()),
            sparse_model: None,
        };
        manifest.upsert(stale);
        let partition = manifest.partition_by_embedding_state(Some("new-model"), None);
        assert_eq!(partition.dense_only_missing, vec!["a.rs".to_string()]);
    }

    #[test]
    fn unknown_path_is_stale() {
        let manifest = FileManifest::new();
        assert!(manifest.is_stale("src/main.rs", "abc"));
    }

    #[test]
    fn unchanged_hash_is_not_stale() {
        let mut manifest = FileManifest::new();
        manifest.upsert(entry("src/main.rs", "abc"));
        assert!(!manifest.is_stale("src/main.rs", "abc"));
        assert!(manifest.is_stale("src/main.rs", "def"));
    }

    #[test]
    fn deleted_since_reports_paths_missing_from_current_scan() {
        let mut manifest = FileManifest::new();
        manifest.upsert(entry("a.rs", "1"));
        manifest.upsert(entry("b.rs", "2"));
        let deleted = manifest.deleted_since(&["a.rs".to_string()]);
        assert_eq!(deleted, vec!["b.rs".to_string()]);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        let mut manifest = FileManifest::new();
        manifest.upsert(entry("a.rs", "1"));
        manifest.save(&path).unwrap();

        let loaded = FileManifest::load(&path).unwrap();
        assert_eq!(loaded.get("a.rs").unwrap().content_hash, "1");
    }

    #[test]
    fn load_missing_file_returns_empty_manifest() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("does-not-exist.json");
        let manifest = FileManifest::load(&path).unwrap();
        assert!(manifest.entries.is_empty());
    }
}
