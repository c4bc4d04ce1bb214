//! Vector Store (consumed, §6): the trait every upsert/search/delete call
//! in the Indexing and Query Pipelines goes through. This crate does not
//! implement a networked vector store — that is a provider concern, same
//! as embedding and reranking — but it does provide [`backup::BackupStore`],
//! the concrete single-file local store the spec requires as the backup
//! half of the failover pair (§4.10), and [`failover::FailoverStore`], the
//! primary/backup wrapper that makes the pair look like one `VectorStore`
//! to callers.

pub mod backup;
pub mod failover;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::chunk::SparseVector;
use crate::error::CoreError;

/// One vector-store record: a chunk's id, its dense and/or sparse
/// representation, and whatever metadata the caller wants to filter or
/// display on later (file path, span, language, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: uuid::Uuid,
    pub dense: Option<Vec<f32>>,
    pub sparse: Option<SparseVector>,
    pub metadata: serde_json::Value,
}

/// A search request against one collection. Either `dense` or `sparse`
/// (or both, for a store that fuses internally) may be set; a store
/// that supports only one modality ignores the other.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub dense: Option<Vec<f32>>,
    pub sparse: Option<SparseVector>,
    pub k: usize,
    pub filters: Option<serde_json::Value>,
}

/// One ranked result from [`VectorStore::search`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: uuid::Uuid,
    pub score: f32,
    pub metadata: serde_json::Value,
}

/// A delete request: either by explicit ids or every record for a file
/// path (used when a file is deleted or changed content entirely).
#[derive(Debug, Clone)]
pub enum DeleteSelector {
    ById(Vec<uuid::Uuid>),
    ByFilePath(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreHealth {
    Healthy,
    Unhealthy,
    Error,
}

/// The vector store interface this crate consumes (§6). A concrete,
/// networked implementation (Qdrant, pgvector, etc.) lives outside this
/// crate and is supplied by the caller; [`backup::BackupStore`] is the
/// one concrete implementation this crate owns, because the spec
/// requires a local single-file backup regardless of which primary the
/// caller brings.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn create_collection_if_absent(
        &self,
        collection: &str,
        dense_dim: Option<usize>,
        sparse: bool,
    ) -> Result<(), CoreError>;

    async fn upsert(&self, collection: &str, records: Vec<VectorRecord>) -> Result<(), CoreError>;

    async fn search(
        &self,
        collection: &str,
        query: SearchQuery,
    ) -> Result<Vec<SearchHit>, CoreError>;

    async fn delete(&self, collection: &str, selector: DeleteSelector) -> Result<(), CoreError>;

    async fn health_check(&self) -> StoreHealth;

    /// Whether this store can return a record's original content/metadata
    /// on demand, rather than only its vectors. Reconciliation (C9) uses
    /// this to decide whether it can backfill a missing modality from the
    /// store directly or must re-chunk from source (Open Question (a)).
    fn supports_raw_content(&self) -> bool {
        false
    }

    async fn fetch_metadata(
        &self,
        _collection: &str,
        _ids: &[uuid::Uuid],
    ) -> Result<Vec<VectorRecord>, CoreError> {
        Ok(Vec::new())
    }

    /// Whether the last/next search through this store runs against a
    /// degraded path (e.g. [`failover::FailoverStore`] serving off its
    /// backup while the circuit is open or half-open). The Query Pipeline
    /// surfaces this as a warning so a search succeeding against the
    /// backup is never reported as an unqualified `success` (§4.10).
    async fn is_degraded(&self) -> bool {
        false
    }
}
