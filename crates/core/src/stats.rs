//! Statistics registry (§9 "module-level state", supplementing C8/C13):
//! an append-only, per-component-sharded counter registry that the
//! Indexing Pipeline writes to and the Health & Status aggregator reads
//! from, without either side holding a lock across an await point.
//!
//! Modeled on the teacher's precomputed, `Arc`-shared `SemanticProgress`/
//! `TermDocFreq` idiom (`server/src/types.rs`), generalized from one
//! fixed-shape struct to a sharded registry keyed by component name so
//! each pipeline phase gets its own counters without contending on a
//! shared lock.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

/// The indexing pipeline's coarse lifecycle state, surfaced by both the
/// Query Pipeline's state-preflight step (§4.11) and Health & Status
/// (§4.13).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexingState {
    NotStarted,
    InProgress,
    Idle,
    Error,
}

/// Monotonically increasing counters for one logical pipeline component
/// (discovery, chunking, embedding, upsert, manifest). Plain `AtomicU64`
/// fields rather than a `Mutex<struct>` so concurrent workers never
/// block each other on a counter bump.
#[derive(Default)]
pub struct ComponentCounters {
    pub files_discovered: AtomicU64,
    pub files_processed: AtomicU64,
    pub files_with_errors: AtomicU64,
    pub chunks_created: AtomicU64,
    pub chunks_embedded: AtomicU64,
    pub chunks_indexed: AtomicU64,
    pub elapsed_micros: AtomicU64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ComponentSnapshot {
    pub files_discovered: u64,
    pub files_processed: u64,
    pub files_with_errors: u64,
    pub chunks_created: u64,
    pub chunks_embedded: u64,
    pub chunks_indexed: u64,
    pub elapsed: Duration,
}

impl ComponentCounters {
    fn snapshot(&self) -> ComponentSnapshot {
        ComponentSnapshot {
            files_discovered: self.files_discovered.load(Ordering::Relaxed),
            files_processed: self.files_processed.load(Ordering::Relaxed),
            files_with_errors: self.files_with_errors.load(Ordering::Relaxed),
            chunks_created: self.chunks_created.load(Ordering::Relaxed),
            chunks_embedded: self.chunks_embedded.load(Ordering::Relaxed),
            chunks_indexed: self.chunks_indexed.load(Ordering::Relaxed),
            elapsed: Duration::from_micros(self.elapsed_micros.load(Ordering::Relaxed)),
        }
    }
}

/// Sharded statistics registry: one [`ComponentCounters`] per named
/// component, created lazily on first write. Safe to share via `Arc`
/// across the chunking worker pool and the cooperative pipeline stages.
#[derive(Default)]
pub struct StatsRegistry {
    shards: DashMap<&'static str, ComponentCounters>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn shard(&self, component: &'static str) -> dashmap::mapref::one::Ref<'_, &'static str, ComponentCounters> {
        self.shards.entry(component).or_default();
        self.shards.get(component).unwrap()
    }

    pub fn add_files_discovered(&self, component: &'static str, n: u64) {
        self.shard(component).files_discovered.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_files_processed(&self, component: &'static str, n: u64) {
        self.shard(component).files_processed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_file_error(&self, component: &'static str) {
        self.shard(component).files_with_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_chunks_created(&self, component: &'static str, n: u64) {
        self.shard(component).chunks_created.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_chunks_embedded(&self, component: &'static str, n: u64) {
        self.shard(component).chunks_embedded.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_chunks_indexed(&self, component: &'static str, n: u64) {
        self.shard(component).chunks_indexed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_elapsed(&self, component: &'static str, elapsed: Duration) {
        self.shard(component)
            .elapsed_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    /// A point-in-time snapshot of every component touched so far, in a
    /// stable (sorted) order for deterministic display/serialization.
    pub fn snapshot(&self) -> BTreeMap<String, ComponentSnapshot> {
        self.shards
            .iter()
            .map(|entry| (entry.key().to_string(), entry.value().snapshot()))
            .collect()
    }

    /// Aggregate totals across every component, for the single-number
    /// summary the Health & Status surface shows by default.
    pub fn totals(&self) -> ComponentSnapshot {
        let mut total = ComponentSnapshot::default();
        for (_, snap) in self.snapshot() {
            total.files_discovered += snap.files_discovered;
            total.files_processed += snap.files_processed;
            total.files_with_errors += snap.files_with_errors;
            total.chunks_created += snap.chunks_created;
            total.chunks_embedded += snap.chunks_embedded;
            total.chunks_indexed += snap.chunks_indexed;
            total.elapsed += snap.elapsed;
        }
        total
    }
}

/// Published over a `tokio::sync::watch` channel by the Indexing Pipeline
/// so the Query Pipeline's state-preflight step and external `get_index_status`
/// callers can both read the current pass without polling the registry
/// directly.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub state: IndexingState,
    pub files_discovered: usize,
    pub files_processed: usize,
    pub chunks_created: usize,
    pub chunks_indexed: usize,
    pub current_file: Option<String>,
    #[serde(skip)]
    pub started_at: Option<Instant>,
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        Self {
            state: IndexingState::NotStarted,
            files_discovered: 0,
            files_processed: 0,
            chunks_created: 0,
            chunks_indexed: 0,
            current_file: None,
            started_at: None,
        }
    }
}

impl ProgressSnapshot {
    /// Fraction of discovered files processed so far, used by the Query
    /// Pipeline's `index_coverage` field while `state == in_progress`.
    pub fn coverage(&self) -> f64 {
        if self.files_discovered == 0 {
            1.0
        } else {
            (self.files_processed as f64 / self.files_discovered as f64).min(1.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_across_calls() {
        let stats = StatsRegistry::new();
        stats.add_files_discovered("discovery", 3);
        stats.add_files_discovered("discovery", 2);
        let snap = stats.snapshot();
        assert_eq!(snap["discovery"].files_discovered, 5);
    }

    #[test]
    fn totals_sum_across_components() {
        let stats = StatsRegistry::new();
        stats.add_chunks_created("chunking", 10);
        stats.add_chunks_created("reconciliation", 4);
        assert_eq!(stats.totals().chunks_created, 14);
    }

    #[test]
    fn coverage_is_complete_when_nothing_discovered() {
        let snap = ProgressSnapshot::default();
        assert_eq!(snap.coverage(), 1.0);
    }

    #[test]
    fn coverage_is_fraction_of_processed_over_discovered() {
        let snap = ProgressSnapshot {
            files_discovered: 10,
            files_processed: 3,
            ..Default::default()
        };
        assert!((snap.coverage() - 0.3).abs() < 1e-9);
    }
}
