//! Chunk data model shared by every chunker, the indexing pipeline, and the
//! query pipeline, plus the content-hash dedup store used during indexing.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A sparse vector over a fixed vocabulary, used by keyword/BM25-style
/// retrieval and as one half of hybrid search.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseVector {
    pub fn new(indices: Vec<u32>, values: Vec<f32>) -> Self {
        debug_assert_eq!(indices.len(), values.len());
        Self { indices, values }
    }

    pub fn dot(&self, other: &SparseVector) -> f32 {
        let mut a = 0usize;
        let mut b = 0usize;
        let mut sum = 0.0f32;
        while a < self.indices.len() && b < other.indices.len() {
            match self.indices[a].cmp(&other.indices[b]) {
                std::cmp::Ordering::Less => a += 1,
                std::cmp::Ordering::Greater => b += 1,
                std::cmp::Ordering::Equal => {
                    sum += self.values[a] * other.values[b];
                    a += 1;
                    b += 1;
                }
            }
        }
        sum
    }
}

/// The kind of boundary that produced a chunk, recorded for diagnostics
/// and for the fallback-hop logging the Chunker Selector emits. Matches
/// the spec's `{semantic | delimiter | fallback | edge_case}` source tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkSource {
    Semantic,
    Delimiter,
    /// Recursive text splitter, the last-resort path when neither the
    /// semantic nor the delimiter chunker could produce a bounded chunk.
    Fallback,
    /// A short-circuit chunk emitted before any parsing was attempted
    /// (empty/whitespace-only/single-line source), per §4.4's edge cases.
    EdgeCase,
}

/// A single indexable unit of code: a contiguous byte/line span of one
/// file, produced by exactly one chunker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub file_path: String,
    pub content: String,
    pub content_hash: String,
    pub start_line: usize,
    pub end_line: usize,
    pub start_byte: usize,
    pub end_byte: usize,
    pub source: ChunkSource,
    pub symbol_name: Option<String>,
    pub token_count: usize,
    pub metadata: HashMap<String, String>,
}

impl Chunk {
    pub fn new(
        file_path: impl Into<String>,
        content: impl Into<String>,
        start_line: usize,
        end_line: usize,
        start_byte: usize,
        end_byte: usize,
        source: ChunkSource,
        token_count: usize,
    ) -> Self {
        let content = content.into();
        let content_hash = hash_content(&content);
        Self {
            id: Uuid::now_v7(),
            file_path: file_path.into(),
            content,
            content_hash,
            start_line,
            end_line,
            start_byte,
            end_byte,
            source,
            symbol_name: None,
            token_count,
            metadata: HashMap::new(),
        }
    }

    pub fn with_symbol_name(mut self, name: impl Into<String>) -> Self {
        self.symbol_name = Some(name.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Blake3 content hash, hex-encoded — used for chunk dedup and for the
/// file-level change detection in [`crate::discovery`].
pub fn hash_content(content: &str) -> String {
    blake3::hash(content.as_bytes()).to_hex().to_string()
}

/// Size-bounded content-hash -> chunk-id map shared across chunkers and
/// the pipeline's batching stage, so an unchanged chunk re-discovered
/// during incremental reindexing is recognized without a second embed
/// call. Entries are held weakly so the store never pins chunk content
/// in memory past its owner's lifetime; a weak reference that has
/// decayed is treated as a miss and quietly evicted.
pub struct DedupStore {
    capacity: usize,
    // insertion order for capacity eviction (FIFO), index -> hash
    order: RwLock<Vec<String>>,
    entries: RwLock<HashMap<String, Weak<Chunk>>>,
}

impl DedupStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: RwLock::new(Vec::new()),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Looks up a previously seen chunk by content hash. Returns `None`
    /// both for a true miss and for a hash whose chunk has since been
    /// dropped by its owner.
    pub fn get(&self, content_hash: &str) -> Option<Arc<Chunk>> {
        let entries = self.entries.read().unwrap();
        entries.get(content_hash).and_then(|weak| weak.upgrade())
    }

    /// Records a chunk under its content hash, evicting the oldest entry
    /// if the store is at capacity.
    pub fn insert(&self, chunk: &Arc<Chunk>) {
        let hash = chunk.content_hash.clone();
        let mut entries = self.entries.write().unwrap();
        let mut order = self.order.write().unwrap();
        if !entries.contains_key(&hash) {
            order.push(hash.clone());
            if order.len() > self.capacity {
                let evicted = order.remove(0);
                entries.remove(&evicted);
            }
        }
        entries.insert(hash, Arc::downgrade(chunk));
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_content_hashes_identically() {
        let a = Chunk::new("a.rs", "fn main() {}", 1, 1, 0, 12, ChunkSource::Delimiter, 4);
        let b = Chunk::new("b.rs", "fn main() {}", 10, 10, 0, 12, ChunkSource::Semantic, 4);
        assert_eq!(a.content_hash, b.content_hash);
    }

    #[test]
    fn dedup_store_recovers_live_chunk() {
        let store = DedupStore::new(4);
        let chunk = Arc::new(Chunk::new("a.rs", "hello", 1, 1, 0, 5, ChunkSource::Fallback, 2));
        store.insert(&chunk);
        assert!(store.get(&chunk.content_hash).is_some());
    }

    #[test]
    fn dedup_store_misses_once_chunk_is_dropped() {
        let store = DedupStore::new(4);
        let hash;
        {
            let chunk = Arc::new(Chunk::new("a.rs", "hello", 1, 1, 0, 5, ChunkSource::Fallback, 2));
            hash = chunk.content_hash.clone();
            store.insert(&chunk);
        }
        assert!(store.get(&hash).is_none());
    }

    #[test]
    fn dedup_store_evicts_oldest_beyond_capacity() {
        let store = DedupStore::new(2);
        let chunks: Vec<Arc<Chunk>> = (0..3)
            .map(|i| {
                Arc::new(Chunk::new(
                    "a.rs",
                    format!("content-{i}"),
                    1,
                    1,
                    0,
                    1,
                    ChunkSource::Fallback,
                    1,
                ))
            })
            .collect();
        for c in &chunks {
            store.insert(c);
        }
        assert_eq!(store.len(), 2);
        assert!(store.get(&chunks[0].content_hash).is_none());
        assert!(store.get(&chunks[2].content_hash).is_some());
    }

    #[test]
    fn sparse_vector_dot_product_matches_shared_indices_only() {
        let a = SparseVector::new(vec![1, 3, 5], vec![1.0, 2.0, 3.0]);
        let b = SparseVector::new(vec![1, 4, 5], vec![2.0, 1.0, 1.0]);
        // shared indices: 1 -> 1*2=2, 5 -> 3*1=3
        assert_eq!(a.dot(&b), 5.0);
    }
}
