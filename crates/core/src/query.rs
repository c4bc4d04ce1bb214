//! Query Pipeline (C11): turns a natural-language query into a ranked,
//! self-describing response — embed, pick a strategy from which
//! embeddings actually succeeded, search through the Failover wrapper,
//! optionally rerank, and report exactly how degraded (if at all) the
//! answer is.
//!
//! Grounded on the teacher's `semantic.rs::search`/`stubs.rs` scoring
//! split (embedding-backed ranking with a lexical fallback) and on the
//! teacher's former `grep_relevance_score` term-overlap idiom (since
//! removed along with the rest of its MCP-serving surface), reimplemented
//! here as [`KeywordIndex`].

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

use crate::providers::{EmbeddingProvider, Reranker, SparseEmbeddingProvider};
use crate::stats::{IndexingState, ProgressSnapshot};
use crate::vectorstore::{SearchHit, SearchQuery, VectorStore};

/// §4.11 step 1: a coarse intent guess, used only to weight downstream
/// ranking when a reranker supports it. Never fails; unrecognized or
/// ambiguous phrasing maps to [`QueryIntent::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    Discovery,
    Comprehension,
    Modification,
    Debugging,
    Documentation,
    Unknown,
}

/// Cheap keyword heuristic over the query text. Intentionally
/// order-sensitive and non-exhaustive — a wrong guess only costs a
/// ranking weight, never correctness.
pub fn classify_intent(query: &str) -> QueryIntent {
    let q = query.to_lowercase();
    let has_any = |words: &[&str]| words.iter().any(|w| q.contains(w));
    if has_any(&["fix", "bug", "error", "crash", "fails", "failing", "exception"]) {
        QueryIntent::Debugging
    } else if has_any(&["change", "refactor", "rename", "add", "implement", "update"]) {
        QueryIntent::Modification
    } else if has_any(&["how does", "why", "explain", "understand", "what does"]) {
        QueryIntent::Comprehension
    } else if has_any(&["readme", "docs", "documentation", "comment"]) {
        QueryIntent::Documentation
    } else if has_any(&["find", "where", "which file", "locate", "search"]) {
        QueryIntent::Discovery
    } else {
        QueryIntent::Unknown
    }
}

/// §4.11 step 4: which retrieval path actually ran, decided purely from
/// which embeddings succeeded (never from configuration alone).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SearchStrategy {
    Hybrid,
    DenseOnly,
    SparseOnly,
    KeywordFallback,
}

impl SearchStrategy {
    /// The lowercase `search_mode` string the response carries alongside
    /// the `SCREAMING_SNAKE_CASE` `strategy` field — same fact, two
    /// conventional spellings, matching §4.11's response shape.
    pub fn search_mode(&self) -> &'static str {
        match self {
            SearchStrategy::Hybrid => "hybrid",
            SearchStrategy::DenseOnly => "dense_only",
            SearchStrategy::SparseOnly => "sparse_only",
            SearchStrategy::KeywordFallback => "keyword_fallback",
        }
    }
}

/// Open Question (b): how dense and sparse candidate lists are combined
/// into one ranking when both succeeded.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum FusionMethod {
    WeightedSum { dense_weight: f32 },
    ReciprocalRankFusion { k: f32 },
}

impl Default for FusionMethod {
    fn default() -> Self {
        FusionMethod::WeightedSum { dense_weight: 0.5 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    Partial,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryMatch {
    pub chunk_id: Uuid,
    pub file_path: String,
    pub content: Option<String>,
    pub score: f32,
    pub start_line: Option<usize>,
    pub end_line: Option<usize>,
}

/// A `find_code` request (§6's tool-invocation surface, produced).
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub query: String,
    pub intent: Option<QueryIntent>,
    pub token_limit: Option<usize>,
    pub include_tests: bool,
    pub focus_languages: Vec<String>,
    pub max_results: usize,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            intent: None,
            token_limit: None,
            include_tests: true,
            focus_languages: Vec::new(),
            max_results: 20,
        }
    }
}

/// §4.11 step 7's response shape, exactly.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub status: ResponseStatus,
    pub warnings: Vec<String>,
    pub indexing_state: IndexingState,
    pub index_coverage: f64,
    pub search_mode: String,
    pub strategy: SearchStrategy,
    pub matches: Vec<QueryMatch>,
    pub total_matches: usize,
    pub metadata: serde_json::Value,
}

fn empty_response(state: IndexingState, warning: impl Into<String>) -> QueryResponse {
    QueryResponse {
        status: ResponseStatus::Partial,
        warnings: vec![warning.into()],
        indexing_state: state,
        index_coverage: 0.0,
        search_mode: SearchStrategy::KeywordFallback.search_mode().to_string(),
        strategy: SearchStrategy::KeywordFallback,
        matches: Vec::new(),
        total_matches: 0,
        metadata: serde_json::json!({}),
    }
}

fn error_response(message: impl Into<String>) -> QueryResponse {
    let message = message.into();
    QueryResponse {
        status: ResponseStatus::Error,
        warnings: vec![message.clone()],
        indexing_state: IndexingState::NotStarted,
        index_coverage: 0.0,
        search_mode: SearchStrategy::KeywordFallback.search_mode().to_string(),
        strategy: SearchStrategy::KeywordFallback,
        matches: Vec::new(),
        total_matches: 0,
        metadata: serde_json::json!({ "error": message }),
    }
}

/// A minimal in-process lexical index, built by the caller (typically the
/// indexing pipeline, from the same chunks it embeds) and handed to the
/// Query Pipeline so `KEYWORD_FALLBACK` has somewhere to go when neither
/// embedding modality is available. Scoring follows the teacher's
/// term-overlap-weighted-by-rarity idiom rather than a full BM25
/// implementation.
#[derive(Debug, Default)]
pub struct KeywordIndex {
    documents: HashMap<Uuid, (String, String)>, // id -> (file_path, content)
    doc_frequency: HashMap<String, usize>,
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| t.len() > 1)
        .map(|t| t.to_lowercase())
        .collect()
}

impl KeywordIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: Uuid, file_path: impl Into<String>, content: impl Into<String>) {
        let content = content.into();
        let mut seen = std::collections::HashSet::new();
        for term in tokenize(&content) {
            if seen.insert(term.clone()) {
                *self.doc_frequency.entry(term).or_insert(0) += 1;
            }
        }
        self.documents.insert(id, (file_path.into(), content));
    }

    /// Removes a document, e.g. when its owning file is deleted or
    /// re-chunked, so the index never serves a stale id the vector store
    /// no longer has.
    pub fn remove(&mut self, id: &Uuid) {
        let Some((_, content)) = self.documents.remove(id) else { return };
        let mut seen = std::collections::HashSet::new();
        for term in tokenize(&content) {
            if !seen.insert(term.clone()) {
                continue;
            }
            if let Some(count) = self.doc_frequency.get_mut(&term) {
                if *count <= 1 {
                    self.doc_frequency.remove(&term);
                } else {
                    *count -= 1;
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Scores every document by rarity-weighted term overlap with
    /// `query`, returning the top `k` by descending score.
    pub fn search(&self, query: &str, k: usize) -> Vec<(Uuid, f32, String, String)> {
        let terms: Vec<String> = tokenize(query);
        if terms.is_empty() || self.documents.is_empty() {
            return Vec::new();
        }
        let n_docs = self.documents.len() as f32;
        let mut scored: Vec<(Uuid, f32, String, String)> = self
            .documents
            .iter()
            .filter_map(|(id, (file_path, content))| {
                let lower = content.to_lowercase();
                let mut score = 0.0f32;
                for term in &terms {
                    if lower.contains(term.as_str()) {
                        let df = *self.doc_frequency.get(term).unwrap_or(&1) as f32;
                        score += (n_docs / df).ln().max(0.1);
                    }
                }
                (score > 0.0).then_some((*id, score, file_path.clone(), content.clone()))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }
}

/// Fuses two independently-ranked hit lists into one, per the chosen
/// [`FusionMethod`] (Open Question (b)).
fn fuse(dense: Vec<SearchHit>, sparse: Vec<SearchHit>, method: FusionMethod) -> Vec<SearchHit> {
    let mut combined: HashMap<Uuid, (f32, serde_json::Value)> = HashMap::new();
    match method {
        FusionMethod::WeightedSum { dense_weight } => {
            let sparse_weight = 1.0 - dense_weight;
            for hit in dense {
                combined.entry(hit.id).or_insert((0.0, hit.metadata.clone())).0 += dense_weight * hit.score;
            }
            for hit in sparse {
                combined.entry(hit.id).or_insert((0.0, hit.metadata.clone())).0 += sparse_weight * hit.score;
            }
        }
        FusionMethod::ReciprocalRankFusion { k } => {
            for (rank, hit) in dense.iter().enumerate() {
                combined.entry(hit.id).or_insert((0.0, hit.metadata.clone())).0 += 1.0 / (k + rank as f32 + 1.0);
            }
            for (rank, hit) in sparse.iter().enumerate() {
                combined.entry(hit.id).or_insert((0.0, hit.metadata.clone())).0 += 1.0 / (k + rank as f32 + 1.0);
            }
        }
    }
    let mut out: Vec<SearchHit> = combined
        .into_iter()
        .map(|(id, (score, metadata))| SearchHit { id, score, metadata })
        .collect();
    out.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    out
}

fn hit_to_match(hit: SearchHit) -> QueryMatch {
    let file_path = hit.metadata.get("file_path").and_then(|v| v.as_str()).unwrap_or("").to_string();
    let content = hit.metadata.get("content").and_then(|v| v.as_str()).map(|s| s.to_string());
    let start_line = hit.metadata.get("start_line").and_then(|v| v.as_u64()).map(|n| n as usize);
    let end_line = hit.metadata.get("end_line").and_then(|v| v.as_u64()).map(|n| n as usize);
    QueryMatch { chunk_id: hit.id, file_path, content, score: hit.score, start_line, end_line }
}

/// The Query Pipeline (C11). Holds only references to shared
/// infrastructure (store, providers, the indexing pipeline's published
/// progress) — it never writes to the manifest or the vector store.
pub struct QueryPipeline {
    collection: String,
    vector_store: Arc<dyn VectorStore>,
    dense_provider: Option<Arc<dyn EmbeddingProvider>>,
    sparse_provider: Option<Arc<dyn SparseEmbeddingProvider>>,
    reranker: Option<Arc<dyn Reranker>>,
    keyword_index: Option<Arc<KeywordIndex>>,
    progress: watch::Receiver<ProgressSnapshot>,
    over_fetch: usize,
    fusion_method: FusionMethod,
}

impl QueryPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        collection: impl Into<String>,
        vector_store: Arc<dyn VectorStore>,
        dense_provider: Option<Arc<dyn EmbeddingProvider>>,
        sparse_provider: Option<Arc<dyn SparseEmbeddingProvider>>,
        reranker: Option<Arc<dyn Reranker>>,
        keyword_index: Option<Arc<KeywordIndex>>,
        progress: watch::Receiver<ProgressSnapshot>,
        over_fetch: usize,
    ) -> Self {
        Self {
            collection: collection.into(),
            vector_store,
            dense_provider,
            sparse_provider,
            reranker,
            keyword_index,
            progress,
            over_fetch: over_fetch.max(1),
            fusion_method: FusionMethod::default(),
        }
    }

    pub fn with_fusion_method(mut self, method: FusionMethod) -> Self {
        self.fusion_method = method;
        self
    }

    /// §4.11: the full pipeline, end to end. Never panics and never
    /// returns `Err` — every failure mode is folded into the response's
    /// own `status`/`warnings` fields, per the "response advertises its
    /// own operational status" design (§1).
    pub async fn find_code(&self, request: QueryRequest) -> QueryResponse {
        let intent = request.intent.unwrap_or_else(|| classify_intent(&request.query));

        // Step 2: state preflight.
        let snapshot = self.progress.borrow().clone();
        if snapshot.state == IndexingState::NotStarted {
            return empty_response(
                snapshot.state,
                "index has not been built yet; run reindex before querying",
            );
        }
        let mut warnings = Vec::new();
        let mut index_coverage = 1.0;
        if snapshot.state == IndexingState::InProgress {
            index_coverage = snapshot.coverage();
            warnings.push(format!(
                "index is still building ({:.0}% of discovered files processed); results may be incomplete",
                index_coverage * 100.0
            ));
        }

        // Step 3: query embedding, both modalities in parallel.
        let dense_future = async {
            match &self.dense_provider {
                Some(provider) => Some(provider.embed_queries(std::slice::from_ref(&request.query)).await),
                None => None,
            }
        };
        let sparse_future = async {
            match &self.sparse_provider {
                Some(provider) => Some(provider.embed_queries(std::slice::from_ref(&request.query)).await),
                None => None,
            }
        };
        let (dense_result, sparse_result) = tokio::join!(dense_future, sparse_future);

        let dense_vector = match dense_result {
            Some(Ok(mut v)) if !v.is_empty() => Some(v.remove(0)),
            Some(Ok(_)) => None,
            Some(Err(error)) => {
                warnings.push(format!("dense query embedding failed: {error}"));
                None
            }
            None => None,
        };
        let sparse_vector = match sparse_result {
            Some(Ok(mut v)) if !v.is_empty() => Some(v.remove(0)),
            Some(Ok(_)) => None,
            Some(Err(error)) => {
                warnings.push(format!("sparse query embedding failed: {error}"));
                None
            }
            None => None,
        };

        // Step 4: strategy selection.
        let strategy = match (&dense_vector, &sparse_vector) {
            (Some(_), Some(_)) => SearchStrategy::Hybrid,
            (Some(_), None) => SearchStrategy::DenseOnly,
            (None, Some(_)) => SearchStrategy::SparseOnly,
            (None, None) => SearchStrategy::KeywordFallback,
        };

        let k = request.max_results.max(1);
        let fetch_k = k * self.over_fetch;

        let mut hits: Vec<SearchHit> = match strategy {
            SearchStrategy::Hybrid => {
                let dense_query = SearchQuery { dense: dense_vector.clone(), k: fetch_k, ..Default::default() };
                let sparse_query = SearchQuery { sparse: sparse_vector.clone(), k: fetch_k, ..Default::default() };
                let (dense_hits, sparse_hits) = tokio::join!(
                    self.vector_store.search(&self.collection, dense_query),
                    self.vector_store.search(&self.collection, sparse_query),
                );
                match (dense_hits, sparse_hits) {
                    (Ok(d), Ok(s)) => fuse(d, s, self.fusion_method),
                    (Ok(d), Err(error)) => {
                        warnings.push(format!("sparse search failed, continuing dense-only: {error}"));
                        d
                    }
                    (Err(error), Ok(s)) => {
                        warnings.push(format!("dense search failed, continuing sparse-only: {error}"));
                        s
                    }
                    (Err(error), Err(_)) => {
                        return error_response(format!("both dense and sparse search failed: {error}"));
                    }
                }
            }
            SearchStrategy::DenseOnly => {
                let query = SearchQuery { dense: dense_vector.clone(), k: fetch_k, ..Default::default() };
                match self.vector_store.search(&self.collection, query).await {
                    Ok(hits) => hits,
                    Err(error) => return error_response(format!("dense search failed: {error}")),
                }
            }
            SearchStrategy::SparseOnly => {
                let query = SearchQuery { sparse: sparse_vector.clone(), k: fetch_k, ..Default::default() };
                match self.vector_store.search(&self.collection, query).await {
                    Ok(hits) => hits,
                    Err(error) => return error_response(format!("sparse search failed: {error}")),
                }
            }
            SearchStrategy::KeywordFallback => match &self.keyword_index {
                Some(index) => index
                    .search(&request.query, fetch_k)
                    .into_iter()
                    .map(|(id, score, file_path, content)| SearchHit {
                        id,
                        score,
                        metadata: serde_json::json!({ "file_path": file_path, "content": content }),
                    })
                    .collect(),
                None => {
                    return error_response(
                        "neither dense nor sparse embedding succeeded and no keyword fallback index is configured",
                    );
                }
            },
        };

        // §4.10: a search strategy that touched the vector store while it
        // is serving off backup (circuit open/half-open) is degraded even
        // though it returned `Ok` — surface that so `status` can't read
        // `success` for an answer that skipped the primary store.
        if !matches!(strategy, SearchStrategy::KeywordFallback) && self.vector_store.is_degraded().await {
            warnings.push("search served from the failover backup store while the primary is unavailable".to_string());
        }

        if !request.include_tests {
            hits.retain(|h| {
                let path = h.metadata.get("file_path").and_then(|v| v.as_str()).unwrap_or("");
                !(path.contains("/test") || path.contains("_test.") || path.ends_with("_test.rs"))
            });
        }
        if !request.focus_languages.is_empty() {
            hits.retain(|h| {
                let path = h.metadata.get("file_path").and_then(|v| v.as_str()).unwrap_or("");
                request.focus_languages.iter().any(|lang| path.ends_with(lang.as_str()))
            });
        }

        hits.truncate(fetch_k);

        // Step 6: rerank, if configured.
        if let Some(reranker) = &self.reranker {
            let candidates: Vec<String> = hits
                .iter()
                .map(|h| h.metadata.get("content").and_then(|v| v.as_str()).unwrap_or("").to_string())
                .collect();
            match reranker.rerank(&request.query, &candidates).await {
                Ok(scores) if scores.len() == hits.len() => {
                    for (hit, score) in hits.iter_mut().zip(scores) {
                        hit.score = score;
                    }
                    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
                }
                Ok(_) => warnings.push("reranker returned a mismatched number of scores, skipping".to_string()),
                Err(error) => warnings.push(format!("reranking failed, returning unranked order: {error}")),
            }
        }

        hits.truncate(k);
        let total_matches = hits.len();
        let matches: Vec<QueryMatch> = hits.into_iter().map(hit_to_match).collect();

        let status = if !warnings.is_empty() { ResponseStatus::Partial } else { ResponseStatus::Success };

        QueryResponse {
            status,
            warnings,
            indexing_state: snapshot.state,
            index_coverage,
            search_mode: strategy.search_mode().to_string(),
            strategy,
            total_matches,
            matches,
            metadata: serde_json::json!({
                "intent": intent,
                "fusion_method": self.fusion_method,
                "over_fetch": self.over_fetch,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CoreError, ErrorDetails};
    use crate::stats::ProgressSnapshot;
    use async_trait::async_trait;

    struct StubDense;
    #[async_trait]
    impl EmbeddingProvider for StubDense {
        async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
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
            16
        }
        fn max_tokens_per_input(&self) -> usize {
            256
        }
    }

    struct FailingDense;
    #[async_trait]
    impl EmbeddingProvider for FailingDense {
        async fn embed_documents(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError> {
            Err(CoreError::ProviderPermanent {
                message: "model unavailable".into(),
                details: ErrorDetails::new(),
                suggestions: vec!["check model deployment".into(), "retry later".into()],
            })
        }
        async fn embed_queries(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError> {
            self.embed_documents(texts).await
        }
        fn model_name(&self) -> &str {
            "failing-dense"
        }
        fn dimension(&self) -> usize {
            2
        }
        fn max_batch_size(&self) -> usize {
            16
        }
        fn max_tokens_per_input(&self) -> usize {
            256
        }
    }

    fn idle_progress() -> watch::Receiver<ProgressSnapshot> {
        let (_tx, rx) = watch::channel(ProgressSnapshot {
            state: IndexingState::Idle,
            files_discovered: 10,
            files_processed: 10,
            ..Default::default()
        });
        rx
    }

    async fn store_with_one_match() -> Arc<dyn VectorStore> {
        let dir = tempfile::tempdir().unwrap();
        let store = crate::vectorstore::backup::BackupStore::open(dir.path().join("s.json")).unwrap();
        store
            .upsert(
                "chunks",
                vec![crate::vectorstore::VectorRecord {
                    id: Uuid::now_v7(),
                    dense: Some(vec![1.0, 0.0]),
                    sparse: None,
                    metadata: serde_json::json!({ "file_path": "auth.py", "content": "def login(): ..." }),
                }],
            )
            .await
            .unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn not_started_index_returns_partial_with_empty_matches() {
        let (_tx, rx) = watch::channel(ProgressSnapshot::default());
        let pipeline = QueryPipeline::new(
            "chunks",
            store_with_one_match().await,
            Some(Arc::new(StubDense)),
            None,
            None,
            None,
            rx,
            3,
        );
        let response = pipeline.find_code(QueryRequest::new("find login")).await;
        assert_eq!(response.status, ResponseStatus::Partial);
        assert!(response.matches.is_empty());
    }

    #[tokio::test]
    async fn dense_only_succeeds_when_sparse_is_unconfigured() {
        let pipeline = QueryPipeline::new(
            "chunks",
            store_with_one_match().await,
            Some(Arc::new(StubDense)),
            None,
            None,
            None,
            idle_progress(),
            3,
        );
        let response = pipeline.find_code(QueryRequest::new("authentication login session")).await;
        assert_eq!(response.strategy, SearchStrategy::DenseOnly);
        assert_eq!(response.search_mode, "dense_only");
        assert_eq!(response.status, ResponseStatus::Success);
        assert!(!response.matches.is_empty());
    }

    #[tokio::test]
    async fn degraded_dense_failure_falls_back_to_keyword_index() {
        let mut index = KeywordIndex::new();
        index.insert(Uuid::now_v7(), "auth.py", "def login(): handle session auth");
        let pipeline = QueryPipeline::new(
            "chunks",
            store_with_one_match().await,
            Some(Arc::new(FailingDense)),
            None,
            None,
            Some(Arc::new(index)),
            idle_progress(),
            3,
        );
        let response = pipeline.find_code(QueryRequest::new("login session")).await;
        assert_eq!(response.strategy, SearchStrategy::KeywordFallback);
        assert_eq!(response.status, ResponseStatus::Partial);
        assert!(!response.matches.is_empty());
    }

    struct AlwaysFailingPrimary;
    #[async_trait]
    impl VectorStore for AlwaysFailingPrimary {
        async fn create_collection_if_absent(
            &self,
            _collection: &str,
            _dense_dim: Option<usize>,
            _sparse: bool,
        ) -> Result<(), CoreError> {
            Ok(())
        }
        async fn upsert(&self, _collection: &str, _records: Vec<crate::vectorstore::VectorRecord>) -> Result<(), CoreError> {
            Ok(())
        }
        async fn search(&self, _collection: &str, _query: SearchQuery) -> Result<Vec<SearchHit>, CoreError> {
            Err(CoreError::VectorStoreUnreachable {
                message: "primary down".into(),
                details: ErrorDetails::new(),
                suggestions: vec!["retry later".into(), "check network".into()],
            })
        }
        async fn delete(&self, _collection: &str, _selector: crate::vectorstore::DeleteSelector) -> Result<(), CoreError> {
            Ok(())
        }
        async fn health_check(&self) -> crate::vectorstore::StoreHealth {
            crate::vectorstore::StoreHealth::Unhealthy
        }
    }

    #[tokio::test]
    async fn search_during_failover_is_reported_as_partial_with_a_degraded_warning() {
        use crate::vectorstore::failover::{FailoverConfig, FailoverStore};

        let dir = tempfile::tempdir().unwrap();
        let backup = Arc::new(crate::vectorstore::backup::BackupStore::open(dir.path().join("b.json")).unwrap());
        backup
            .upsert(
                "chunks",
                vec![crate::vectorstore::VectorRecord {
                    id: Uuid::now_v7(),
                    dense: Some(vec![1.0, 0.0]),
                    sparse: None,
                    metadata: serde_json::json!({ "file_path": "auth.py", "content": "def login(): ..." }),
                }],
            )
            .await
            .unwrap();
        let store = Arc::new(FailoverStore::new(
            Arc::new(AlwaysFailingPrimary),
            backup,
            FailoverConfig { failure_threshold: 1, ..Default::default() },
        )) as Arc<dyn VectorStore>;

        let pipeline = QueryPipeline::new("chunks", store, Some(Arc::new(StubDense)), None, None, None, idle_progress(), 3);
        let response = pipeline.find_code(QueryRequest::new("authentication login session")).await;

        assert_eq!(response.status, ResponseStatus::Partial);
        assert!(response.warnings.iter().any(|w| w.contains("failover")));
    }

    #[tokio::test]
    async fn no_providers_and_no_keyword_index_returns_error_status() {
        let pipeline =
            QueryPipeline::new("chunks", store_with_one_match().await, None, None, None, None, idle_progress(), 3);
        let response = pipeline.find_code(QueryRequest::new("anything")).await;
        assert_eq!(response.status, ResponseStatus::Error);
    }

    #[test]
    fn classify_intent_recognizes_debugging_language() {
        assert_eq!(classify_intent("why does this crash on startup"), QueryIntent::Debugging);
    }

    #[test]
    fn keyword_index_ranks_more_overlapping_terms_higher() {
        let mut index = KeywordIndex::new();
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        index.insert(a, "auth.py", "session login authentication token");
        index.insert(b, "utils.py", "generic helper function");
        let results = index.search("session login authentication", 5);
        assert_eq!(results[0].0, a);
    }

    #[test]
    fn keyword_index_remove_drops_the_document_and_its_terms() {
        let mut index = KeywordIndex::new();
        let a = Uuid::now_v7();
        index.insert(a, "auth.py", "session login authentication token");
        assert_eq!(index.len(), 1);
        index.remove(&a);
        assert!(index.is_empty());
        assert!(index.search("session login", 5).is_empty());
    }
}
