//! Vector Store Failover (C10): wraps a primary [`VectorStore`] (typically
//! remote/networked) and a local [`BackupStore`] behind a circuit breaker,
//! so that a primary outage degrades search rather than failing it, and so
//! that writes made during the outage are never lost — they land on the
//! backup and are replayed to the primary once it recovers.
//!
//! Per §5, the circuit breaker's state is confined to one owner: every
//! state transition happens inside [`FailoverStore`]'s internal lock, and
//! every other caller only ever sees a read-only [`FailoverState`]
//! snapshot via [`FailoverStore::state`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{CoreError, ErrorDetails};

use super::{DeleteSelector, SearchHit, SearchQuery, StoreHealth, VectorRecord, VectorStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActiveStore {
    Primary,
    Backup,
}

/// Tunables for the circuit breaker, matching §4.10's defaults.
#[derive(Debug, Clone, Copy)]
pub struct FailoverConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub success_threshold: u32,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

/// Externally observable failover state (§3 `FailoverState`). Cloned out
/// of the lock for callers — never mutated in place by anyone but
/// [`FailoverStore`] itself.
#[derive(Debug, Clone, Serialize)]
pub struct FailoverState {
    pub active_store: ActiveStore,
    pub primary_healthy: bool,
    pub circuit_state: CircuitState,
    #[serde(skip)]
    pub failover_activated_at: Option<Instant>,
    #[serde(skip)]
    pub last_backup_sync: Option<Instant>,
    pub chunks_written_during_failover: HashSet<uuid::Uuid>,
}

impl Default for FailoverState {
    fn default() -> Self {
        Self {
            active_store: ActiveStore::Primary,
            primary_healthy: true,
            circuit_state: CircuitState::Closed,
            failover_activated_at: None,
            last_backup_sync: None,
            chunks_written_during_failover: HashSet::new(),
        }
    }
}

struct Inner {
    state: FailoverState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    deleted_during_failover: HashSet<String>,
}

/// Primary/backup pair presented to callers as a single [`VectorStore`].
pub struct FailoverStore {
    primary: Arc<dyn VectorStore>,
    backup: Arc<super::backup::BackupStore>,
    config: FailoverConfig,
    inner: Mutex<Inner>,
    probe_in_flight: AtomicBool,
}

impl FailoverStore {
    pub fn new(
        primary: Arc<dyn VectorStore>,
        backup: Arc<super::backup::BackupStore>,
        config: FailoverConfig,
    ) -> Self {
        Self {
            primary,
            backup,
            config,
            inner: Mutex::new(Inner {
                state: FailoverState::default(),
                consecutive_failures: 0,
                consecutive_successes: 0,
                deleted_during_failover: HashSet::new(),
            }),
            probe_in_flight: AtomicBool::new(false),
        }
    }

    /// A read-only snapshot of the current failover state, safe to hand
    /// to the health/status aggregator (C13) without holding the lock.
    pub async fn state(&self) -> FailoverState {
        self.inner.lock().await.state.clone()
    }

    async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        inner.consecutive_failures = 0;
        inner.state.primary_healthy = true;
    }

    /// Records a primary failure; returns `true` if this call tripped the
    /// breaker from closed to open.
    async fn record_failure(&self) -> bool {
        let mut inner = self.inner.lock().await;
        inner.consecutive_failures += 1;
        inner.state.primary_healthy = false;
        if inner.state.circuit_state == CircuitState::Closed
            && inner.consecutive_failures >= self.config.failure_threshold
        {
            inner.state.circuit_state = CircuitState::Open;
            inner.state.active_store = ActiveStore::Backup;
            inner.state.failover_activated_at = Some(Instant::now());
            tracing::warn!(
                consecutive_failures = inner.consecutive_failures,
                "circuit breaker opened, failing over to backup vector store"
            );
            return true;
        }
        false
    }

    /// Checks whether `recovery_timeout` has elapsed on an open circuit
    /// and, if so, moves it to half-open and allows exactly one caller
    /// through as the probe.
    async fn maybe_enter_half_open(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state.circuit_state != CircuitState::Open {
            return;
        }
        let elapsed = inner
            .state
            .failover_activated_at
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO);
        if elapsed >= self.config.recovery_timeout {
            inner.state.circuit_state = CircuitState::HalfOpen;
            inner.consecutive_successes = 0;
            tracing::info!("circuit breaker entering half-open, probing primary");
        }
    }

    /// Whether the caller should attempt a probe write/search against
    /// primary right now. Only one probe is allowed in flight at a time
    /// while half-open, so a burst of concurrent callers doesn't hammer a
    /// still-recovering primary.
    fn try_claim_probe(&self) -> bool {
        self.probe_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn release_probe(&self) {
        self.probe_in_flight.store(false, Ordering::SeqCst);
    }

    /// Records a successful half-open probe; returns `true` if this
    /// success closed the circuit (and therefore a sync-back should run).
    async fn record_probe_success(&self) -> bool {
        let mut inner = self.inner.lock().await;
        inner.consecutive_successes += 1;
        if inner.consecutive_successes >= self.config.success_threshold {
            inner.state.circuit_state = CircuitState::Closed;
            inner.state.active_store = ActiveStore::Primary;
            inner.state.primary_healthy = true;
            inner.consecutive_failures = 0;
            tracing::info!("circuit breaker closed, primary restored");
            return true;
        }
        false
    }

    async fn record_probe_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.state.circuit_state = CircuitState::Open;
        inner.state.active_store = ActiveStore::Backup;
        inner.state.failover_activated_at = Some(Instant::now());
        inner.consecutive_successes = 0;
        tracing::warn!("half-open probe failed, circuit re-opened");
    }

    async fn mark_written_during_failover(&self, ids: impl IntoIterator<Item = uuid::Uuid>) {
        let mut inner = self.inner.lock().await;
        inner.state.chunks_written_during_failover.extend(ids);
    }

    async fn mark_deleted_during_failover(&self, file_path: &str) {
        let mut inner = self.inner.lock().await;
        inner.deleted_during_failover.insert(file_path.to_string());
    }

    /// Replays everything written to the backup while the circuit was
    /// open/half-open back to the (now healthy) primary, then applies
    /// queued deletes, matching §4.10's "restoration" ordering: upserts
    /// first, tombstones second, so a flap never resurrects a deleted
    /// chunk.
    pub async fn sync_back(&self, collection: &str) -> Result<(), CoreError> {
        let (written, deleted) = {
            let inner = self.inner.lock().await;
            (
                inner.state.chunks_written_during_failover.clone(),
                inner.deleted_during_failover.clone(),
            )
        };
        if written.is_empty() && deleted.is_empty() {
            return Ok(());
        }
        let ids: Vec<uuid::Uuid> = written.into_iter().collect();
        if !ids.is_empty() {
            let records = self.backup.fetch_metadata(collection, &ids).await?;
            if !records.is_empty() {
                self.primary.upsert(collection, records).await?;
            }
        }
        for file_path in &deleted {
            self.primary
                .delete(collection, DeleteSelector::ByFilePath(file_path.clone()))
                .await?;
        }
        let mut inner = self.inner.lock().await;
        inner.state.chunks_written_during_failover.clear();
        inner.deleted_during_failover.clear();
        inner.state.last_backup_sync = Some(Instant::now());
        tracing::info!(synced = ids.len(), deleted = deleted.len(), "sync-back complete");
        Ok(())
    }

    async fn write_to_backup(
        &self,
        collection: &str,
        records: Vec<VectorRecord>,
    ) -> Result<(), CoreError> {
        let ids: Vec<uuid::Uuid> = records.iter().map(|r| r.id).collect();
        self.backup.upsert(collection, records).await?;
        self.mark_written_during_failover(ids).await;
        Ok(())
    }
}

#[async_trait]
impl VectorStore for FailoverStore {
    async fn create_collection_if_absent(
        &self,
        collection: &str,
        dense_dim: Option<usize>,
        sparse: bool,
    ) -> Result<(), CoreError> {
        let _ = self.primary.create_collection_if_absent(collection, dense_dim, sparse).await;
        self.backup.create_collection_if_absent(collection, dense_dim, sparse).await
    }

    async fn upsert(&self, collection: &str, records: Vec<VectorRecord>) -> Result<(), CoreError> {
        self.maybe_enter_half_open().await;
        let circuit_state = self.inner.lock().await.state.circuit_state;

        match circuit_state {
            CircuitState::Closed => match self.primary.upsert(collection, records.clone()).await {
                Ok(()) => {
                    self.record_success().await;
                    let backup = Arc::clone(&self.backup);
                    let collection = collection.to_string();
                    tokio::spawn(async move {
                        if let Err(error) = backup.upsert(&collection, records).await {
                            tracing::warn!(%error, "best-effort mirror to backup failed");
                        }
                    });
                    Ok(())
                }
                Err(error) => {
                    tracing::warn!(%error, "primary upsert failed");
                    self.record_failure().await;
                    self.write_to_backup(collection, records).await
                }
            },
            CircuitState::Open => self.write_to_backup(collection, records).await,
            CircuitState::HalfOpen => {
                if self.try_claim_probe() {
                    let result = self.primary.upsert(collection, records.clone()).await;
                    self.release_probe();
                    match result {
                        Ok(()) => {
                            let closed = self.record_probe_success().await;
                            let backup = Arc::clone(&self.backup);
                            let collection_owned = collection.to_string();
                            let records_for_backup = records.clone();
                            tokio::spawn(async move {
                                let _ = backup.upsert(&collection_owned, records_for_backup).await;
                            });
                            if closed {
                                self.sync_back(collection).await?;
                            }
                            Ok(())
                        }
                        Err(error) => {
                            tracing::warn!(%error, "half-open probe upsert failed");
                            self.record_probe_failure().await;
                            self.write_to_backup(collection, records).await
                        }
                    }
                } else {
                    self.write_to_backup(collection, records).await
                }
            }
        }
    }

    async fn search(
        &self,
        collection: &str,
        query: SearchQuery,
    ) -> Result<Vec<SearchHit>, CoreError> {
        self.maybe_enter_half_open().await;
        let circuit_state = self.inner.lock().await.state.circuit_state;
        match circuit_state {
            CircuitState::Closed => match self.primary.search(collection, query.clone()).await {
                Ok(hits) => {
                    self.record_success().await;
                    Ok(hits)
                }
                Err(error) => {
                    tracing::warn!(%error, "primary search failed");
                    self.record_failure().await;
                    self.backup.search(collection, query).await
                }
            },
            CircuitState::Open | CircuitState::HalfOpen => {
                self.backup.search(collection, query).await
            }
        }
    }

    async fn delete(&self, collection: &str, selector: DeleteSelector) -> Result<(), CoreError> {
        let circuit_state = self.inner.lock().await.state.circuit_state;
        match circuit_state {
            CircuitState::Closed => {
                self.primary.delete(collection, selector.clone()).await?;
                let _ = self.backup.delete(collection, selector).await;
                Ok(())
            }
            CircuitState::Open | CircuitState::HalfOpen => {
                if let DeleteSelector::ByFilePath(ref path) = selector {
                    self.mark_deleted_during_failover(path).await;
                }
                self.backup.delete(collection, selector).await
            }
        }
    }

    async fn health_check(&self) -> StoreHealth {
        match self.primary.health_check().await {
            StoreHealth::Healthy => StoreHealth::Healthy,
            _ => self.backup.health_check().await,
        }
    }

    fn supports_raw_content(&self) -> bool {
        true
    }

    async fn fetch_metadata(
        &self,
        collection: &str,
        ids: &[uuid::Uuid],
    ) -> Result<Vec<VectorRecord>, CoreError> {
        let circuit_state = self.inner.lock().await.state.circuit_state;
        match circuit_state {
            CircuitState::Closed => self.primary.fetch_metadata(collection, ids).await,
            _ => self.backup.fetch_metadata(collection, ids).await,
        }
    }

    /// Degraded whenever the circuit isn't fully closed: `Open` always
    /// serves off the backup, and `HalfOpen` still serves off the backup
    /// for every caller that doesn't win the single in-flight probe.
    async fn is_degraded(&self) -> bool {
        self.inner.lock().await.state.circuit_state != CircuitState::Closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vectorstore::backup::BackupStore;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;
    use tempfile::tempdir;

    /// A primary stub that fails every call once `should_fail` is set,
    /// so tests can drive the breaker through its transitions on demand.
    struct StubPrimary {
        should_fail: AtomicBool,
        call_count: AtomicU32,
    }

    impl StubPrimary {
        fn new() -> Self {
            Self { should_fail: AtomicBool::new(false), call_count: AtomicU32::new(0) }
        }
    }

    #[async_trait]
    impl VectorStore for StubPrimary {
        async fn create_collection_if_absent(
            &self,
            _collection: &str,
            _dense_dim: Option<usize>,
            _sparse: bool,
        ) -> Result<(), CoreError> {
            Ok(())
        }

        async fn upsert(&self, _collection: &str, _records: Vec<VectorRecord>) -> Result<(), CoreError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            if self.should_fail.load(Ordering::SeqCst) {
                Err(CoreError::VectorStoreUnreachable {
                    message: "stub failure".into(),
                    details: ErrorDetails::new(),
                    suggestions: vec!["retry later".into(), "check network".into()],
                })
            } else {
                Ok(())
            }
        }

        async fn search(&self, _collection: &str, _query: SearchQuery) -> Result<Vec<SearchHit>, CoreError> {
            Ok(Vec::new())
        }

        async fn delete(&self, _collection: &str, _selector: DeleteSelector) -> Result<(), CoreError> {
            Ok(())
        }

        async fn health_check(&self) -> StoreHealth {
            if self.should_fail.load(Ordering::SeqCst) {
                StoreHealth::Unhealthy
            } else {
                StoreHealth::Healthy
            }
        }

        fn supports_raw_content(&self) -> bool {
            true
        }

        async fn fetch_metadata(&self, _collection: &str, _ids: &[uuid::Uuid]) -> Result<Vec<VectorRecord>, CoreError> {
            Ok(Vec::new())
        }
    }

    fn record(id: uuid::Uuid) -> VectorRecord {
        VectorRecord { id, dense: Some(vec![1.0]), sparse: None, metadata: json!({}) }
    }

    #[tokio::test]
    async fn breaker_opens_after_failure_threshold_and_writes_land_on_backup() {
        let dir = tempdir().unwrap();
        let primary = Arc::new(StubPrimary::new());
        primary.should_fail.store(true, Ordering::SeqCst);
        let backup = Arc::new(BackupStore::open(dir.path().join("backup.json")).unwrap());
        let store = FailoverStore::new(
            primary.clone(),
            backup.clone(),
            FailoverConfig { failure_threshold: 2, ..Default::default() },
        );

        for _ in 0..2 {
            store.upsert("chunks", vec![record(uuid::Uuid::now_v7())]).await.unwrap();
        }

        let state = store.state().await;
        assert_eq!(state.circuit_state, CircuitState::Open);
        assert_eq!(state.active_store, ActiveStore::Backup);
        assert_eq!(state.chunks_written_during_failover.len(), 2);
    }

    #[tokio::test]
    async fn chunks_written_during_failover_sync_back_after_recovery() {
        let dir = tempdir().unwrap();
        let primary = Arc::new(StubPrimary::new());
        primary.should_fail.store(true, Ordering::SeqCst);
        let backup = Arc::new(BackupStore::open(dir.path().join("backup.json")).unwrap());
        let store = FailoverStore::new(
            primary.clone(),
            backup.clone(),
            FailoverConfig {
                failure_threshold: 1,
                recovery_timeout: Duration::from_millis(1),
                success_threshold: 1,
            },
        );

        let id = uuid::Uuid::now_v7();
        store.upsert("chunks", vec![record(id)]).await.unwrap();
        assert_eq!(store.state().await.circuit_state, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(5)).await;
        primary.should_fail.store(false, Ordering::SeqCst);

        store.upsert("chunks", vec![record(uuid::Uuid::now_v7())]).await.unwrap();

        let state = store.state().await;
        assert_eq!(state.circuit_state, CircuitState::Closed);
        assert!(state.chunks_written_during_failover.is_empty());
    }
}
