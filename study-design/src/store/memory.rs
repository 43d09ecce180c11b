//! In-memory store adapter
//!
//! Backs tests and embedded use. Every trait write takes the single state
//! lock once, which is what makes activation and compare-and-set atomic.

use super::{ProgressStore, StatusStore, StoreError, StoreResult, VersionStore};
use crate::types::{
    PendingRevision, PhaseProgress, ProgressMap, ProtocolVersion, StudyLifecycleStatus,
    VersionStatus,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// Deterministic failure injection for degradation tests.
///
/// Each counter fails that many upcoming calls of its kind, then the store
/// behaves normally again.
#[derive(Debug, Default)]
pub struct StoreFaults {
    progress_reads: AtomicUsize,
    progress_writes: AtomicUsize,
    status_writes: AtomicUsize,
    version_writes: AtomicUsize,
}

impl StoreFaults {
    pub fn fail_progress_reads(&self, count: usize) {
        self.progress_reads.store(count, Ordering::SeqCst);
    }

    pub fn fail_progress_writes(&self, count: usize) {
        self.progress_writes.store(count, Ordering::SeqCst);
    }

    pub fn fail_status_writes(&self, count: usize) {
        self.status_writes.store(count, Ordering::SeqCst);
    }

    pub fn fail_version_writes(&self, count: usize) {
        self.version_writes.store(count, Ordering::SeqCst);
    }

    fn trip(counter: &AtomicUsize, what: &str) -> StoreResult<()> {
        let tripped = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            tracing::debug!(operation = what, "injecting store fault");
            return Err(StoreError::Injected(what.to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct State {
    progress: HashMap<String, ProgressMap>,
    statuses: HashMap<String, StudyLifecycleStatus>,
    versions: HashMap<String, Vec<ProtocolVersion>>,
    revisions: HashMap<String, Vec<PendingRevision>>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    faults: StoreFaults,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn faults(&self) -> &StoreFaults {
        &self.faults
    }

    /// Register a study (or overwrite its status) without compare-and-set
    pub async fn insert_status(&self, study_id: &str, status: StudyLifecycleStatus) {
        let mut state = self.state.lock().await;
        state.statuses.insert(study_id.to_string(), status);
    }

    /// Raw progress records, bypassing fault injection
    pub async fn progress_snapshot(&self, study_id: &str) -> Option<ProgressMap> {
        let state = self.state.lock().await;
        state.progress.get(study_id).cloned()
    }

    /// Seed progress records directly
    pub async fn insert_progress(&self, study_id: &str, progress: ProgressMap) {
        let mut state = self.state.lock().await;
        state.progress.insert(study_id.to_string(), progress);
    }
}

#[async_trait]
impl ProgressStore for MemoryStore {
    async fn get_progress(&self, study_id: &str) -> StoreResult<Option<ProgressMap>> {
        StoreFaults::trip(&self.faults.progress_reads, "get_progress")?;
        let state = self.state.lock().await;
        Ok(state.progress.get(study_id).cloned())
    }

    async fn put_progress(
        &self,
        study_id: &str,
        phase_id: &str,
        progress: &PhaseProgress,
    ) -> StoreResult<()> {
        StoreFaults::trip(&self.faults.progress_writes, "put_progress")?;
        let mut state = self.state.lock().await;
        state
            .progress
            .entry(study_id.to_string())
            .or_default()
            .insert(phase_id.to_string(), progress.clone());
        Ok(())
    }

    async fn initialize_progress(
        &self,
        study_id: &str,
        defaults: &ProgressMap,
    ) -> StoreResult<()> {
        StoreFaults::trip(&self.faults.progress_writes, "initialize_progress")?;
        let mut state = self.state.lock().await;
        let records = state.progress.entry(study_id.to_string()).or_default();
        for (phase_id, progress) in defaults {
            records
                .entry(phase_id.clone())
                .or_insert_with(|| progress.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl StatusStore for MemoryStore {
    async fn get_status(&self, study_id: &str) -> StoreResult<Option<StudyLifecycleStatus>> {
        let state = self.state.lock().await;
        Ok(state.statuses.get(study_id).cloned())
    }

    async fn set_status(
        &self,
        study_id: &str,
        expected: &StudyLifecycleStatus,
        next: &StudyLifecycleStatus,
    ) -> StoreResult<()> {
        StoreFaults::trip(&self.faults.status_writes, "set_status")?;
        let mut state = self.state.lock().await;
        let current = state
            .statuses
            .get_mut(study_id)
            .ok_or_else(|| StoreError::Missing {
                entity: "study",
                id: study_id.to_string(),
            })?;
        if current != expected {
            return Err(StoreError::Conflict {
                study_id: study_id.to_string(),
                expected: expected.to_string(),
                actual: current.to_string(),
            });
        }
        *current = next.clone();
        Ok(())
    }
}

#[async_trait]
impl VersionStore for MemoryStore {
    async fn list_versions(&self, study_id: &str) -> StoreResult<Vec<ProtocolVersion>> {
        let state = self.state.lock().await;
        Ok(state.versions.get(study_id).cloned().unwrap_or_default())
    }

    async fn create_version(&self, study_id: &str, version: &ProtocolVersion) -> StoreResult<()> {
        StoreFaults::trip(&self.faults.version_writes, "create_version")?;
        let mut state = self.state.lock().await;
        let versions = state.versions.entry(study_id.to_string()).or_default();
        if versions.iter().any(|v| v.id == version.id) {
            return Err(StoreError::backend(format!(
                "version {} already exists",
                version.id
            )));
        }
        if version.status == VersionStatus::Active {
            for existing in versions
                .iter_mut()
                .filter(|v| v.status == VersionStatus::Active)
            {
                existing.status = VersionStatus::Archived;
            }
        }
        versions.push(version.clone());
        Ok(())
    }

    async fn archive_version(&self, study_id: &str, version_id: &str) -> StoreResult<()> {
        StoreFaults::trip(&self.faults.version_writes, "archive_version")?;
        let mut state = self.state.lock().await;
        let version = state
            .versions
            .get_mut(study_id)
            .and_then(|versions| versions.iter_mut().find(|v| v.id == version_id))
            .ok_or_else(|| StoreError::Missing {
                entity: "version",
                id: version_id.to_string(),
            })?;
        version.status = VersionStatus::Archived;
        Ok(())
    }

    async fn list_pending_revisions(&self, study_id: &str) -> StoreResult<Vec<PendingRevision>> {
        let state = self.state.lock().await;
        Ok(state.revisions.get(study_id).cloned().unwrap_or_default())
    }

    async fn upsert_pending_revision(
        &self,
        study_id: &str,
        revision: &PendingRevision,
    ) -> StoreResult<()> {
        StoreFaults::trip(&self.faults.version_writes, "upsert_pending_revision")?;
        let mut state = self.state.lock().await;
        let revisions = state.revisions.entry(study_id.to_string()).or_default();
        match revisions.iter_mut().find(|r| r.id == revision.id) {
            Some(existing) => *existing = revision.clone(),
            None => revisions.push(revision.clone()),
        }
        Ok(())
    }

    async fn remove_pending_revision(
        &self,
        study_id: &str,
        revision_id: &str,
    ) -> StoreResult<()> {
        StoreFaults::trip(&self.faults.version_writes, "remove_pending_revision")?;
        let mut state = self.state.lock().await;
        if let Some(revisions) = state.revisions.get_mut(study_id) {
            revisions.retain(|r| r.id != revision_id);
        }
        Ok(())
    }
}
