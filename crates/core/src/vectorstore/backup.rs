//! Backup vector store (§4.10, §6): a single-file, in-process
//! implementation used as the failover target when the primary is
//! unreachable. Everything lives in memory for the lifetime of the
//! process; [`BackupStore::flush`] persists the whole thing to one JSON
//! file, and [`BackupStore::load`] restores it on startup. Brute-force
//! linear scan is deliberate — the backup exists to keep search alive
//! during an outage, not to compete with the primary on scale.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, ErrorDetails};

use super::{DeleteSelector, SearchHit, SearchQuery, StoreHealth, VectorRecord, VectorStore};

#[derive(Debug, Default, Serialize, Deserialize)]
struct CollectionFile {
    records: HashMap<uuid::Uuid, VectorRecord>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BackupFile {
    collections: HashMap<String, CollectionFile>,
}

/// A flushable, single-file local vector store. Construct with
/// [`BackupStore::open`], which loads any existing backup file at
/// `path` or starts empty.
pub struct BackupStore {
    path: PathBuf,
    data: RwLock<BackupFile>,
}

impl BackupStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let path = path.into();
        let data = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw).map_err(|e| CoreError::Parse {
                message: e.to_string(),
                details: ErrorDetails::new().with_file(&path),
                suggestions: vec![
                    "delete the corrupt backup file to start an empty backup store".into(),
                    "check the backup was not partially written by a concurrent process".into(),
                ],
            })?
        } else {
            BackupFile::default()
        };
        Ok(Self { path, data: RwLock::new(data) })
    }

    /// Persists the current in-memory state to `path` via
    /// write-tmp-then-rename, matching the manifest's atomic-write
    /// discipline so a crash mid-flush never corrupts the backup.
    pub fn flush(&self) -> Result<(), CoreError> {
        let tmp_path = self.path.with_extension("tmp");
        let serialized = {
            let guard = self.data.read().unwrap();
            serde_json::to_vec(&*guard)?
        };
        std::fs::write(&tmp_path, serialized)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record_count(&self, collection: &str) -> usize {
        self.data
            .read()
            .unwrap()
            .collections
            .get(collection)
            .map(|c| c.records.len())
            .unwrap_or(0)
    }

    pub fn contains(&self, collection: &str, id: uuid::Uuid) -> bool {
        self.data
            .read()
            .unwrap()
            .collections
            .get(collection)
            .map(|c| c.records.contains_key(&id))
            .unwrap_or(false)
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl VectorStore for BackupStore {
    async fn create_collection_if_absent(
        &self,
        collection: &str,
        _dense_dim: Option<usize>,
        _sparse: bool,
    ) -> Result<(), CoreError> {
        let mut data = self.data.write().unwrap();
        data.collections.entry(collection.to_string()).or_default();
        Ok(())
    }

    async fn upsert(&self, collection: &str, records: Vec<VectorRecord>) -> Result<(), CoreError> {
        let mut data = self.data.write().unwrap();
        let entry = data.collections.entry(collection.to_string()).or_default();
        for record in records {
            entry.records.insert(record.id, record);
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query: SearchQuery,
    ) -> Result<Vec<SearchHit>, CoreError> {
        let data = self.data.read().unwrap();
        let Some(coll) = data.collections.get(collection) else {
            return Ok(Vec::new());
        };
        let mut scored: Vec<SearchHit> = coll
            .records
            .values()
            .filter_map(|record| {
                let score = match (&query.dense, &record.dense, &query.sparse, &record.sparse) {
                    (Some(qd), Some(rd), _, _) => cosine(qd, rd),
                    (_, _, Some(qs), Some(rs)) => qs.dot(rs),
                    _ => return None,
                };
                Some(SearchHit { id: record.id, score, metadata: record.metadata.clone() })
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(query.k.max(1));
        Ok(scored)
    }

    async fn delete(&self, collection: &str, selector: DeleteSelector) -> Result<(), CoreError> {
        let mut data = self.data.write().unwrap();
        let Some(coll) = data.collections.get_mut(collection) else {
            return Ok(());
        };
        match selector {
            DeleteSelector::ById(ids) => {
                for id in ids {
                    coll.records.remove(&id);
                }
            }
            DeleteSelector::ByFilePath(path) => {
                coll.records.retain(|_, record| {
                    record.metadata.get("file_path").and_then(|v| v.as_str()) != Some(path.as_str())
                });
            }
        }
        Ok(())
    }

    async fn health_check(&self) -> StoreHealth {
        StoreHealth::Healthy
    }

    fn supports_raw_content(&self) -> bool {
        true
    }

    async fn fetch_metadata(
        &self,
        collection: &str,
        ids: &[uuid::Uuid],
    ) -> Result<Vec<VectorRecord>, CoreError> {
        let data = self.data.read().unwrap();
        let Some(coll) = data.collections.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(ids.iter().filter_map(|id| coll.records.get(id).cloned()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn record(id: uuid::Uuid, dense: Vec<f32>, file_path: &str) -> VectorRecord {
        VectorRecord { id, dense: Some(dense), sparse: None, metadata: json!({"file_path": file_path}) }
    }

    #[tokio::test]
    async fn upsert_then_search_finds_closest_vector() {
        let dir = tempdir().unwrap();
        let store = BackupStore::open(dir.path().join("backup.json")).unwrap();
        let a = uuid::Uuid::now_v7();
        let b = uuid::Uuid::now_v7();
        store
            .upsert("chunks", vec![record(a, vec![1.0, 0.0], "a.rs"), record(b, vec![0.0, 1.0], "b.rs")])
            .await
            .unwrap();
        let hits = store
            .search("chunks", SearchQuery { dense: Some(vec![1.0, 0.0]), k: 1, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, a);
    }

    #[tokio::test]
    async fn delete_by_file_path_removes_all_its_records() {
        let dir = tempdir().unwrap();
        let store = BackupStore::open(dir.path().join("backup.json")).unwrap();
        let a = uuid::Uuid::now_v7();
        store.upsert("chunks", vec![record(a, vec![1.0, 0.0], "a.rs")]).await.unwrap();
        store
            .delete("chunks", DeleteSelector::ByFilePath("a.rs".to_string()))
            .await
            .unwrap();
        assert_eq!(store.record_count("chunks"), 0);
    }

    #[tokio::test]
    async fn flush_then_open_round_trips_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("backup.json");
        let a = uuid::Uuid::now_v7();
        {
            let store = BackupStore::open(&path).unwrap();
            store.upsert("chunks", vec![record(a, vec![1.0, 0.0], "a.rs")]).await.unwrap();
            store.flush().unwrap();
        }
        let reopened = BackupStore::open(&path).unwrap();
        assert!(reopened.contains("chunks", a));
    }
}
