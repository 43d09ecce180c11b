//! Per-study phase progress
//!
//! The tracker owns a local copy of one study's progress records. Reads
//! never fail: a missing record is initialized, a failed read is retried
//! once through initialize-then-refetch, and after that the tracker falls
//! back to a fixed state. Writes always surface their errors and are
//! followed by an authoritative refetch.

use crate::catalog::{AccessPolicy, PhaseCatalog};
use crate::error::{Result, StudyDesignError};
use crate::store::ProgressStore;
use crate::types::{PhaseProgress, PhaseStatus, ProgressMap};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Which path produced the tracker's current state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressSource {
    /// Read straight from the store
    Store,
    /// The store had no usable record and was initialized first
    Initialized,
    /// Store unreachable; hard-coded state
    Fallback,
}

impl ProgressSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Store => "store",
            Self::Initialized => "initialized",
            Self::Fallback => "fallback",
        }
    }
}

/// Mean of the percentages, rounded half up; `0` for no phases.
///
/// Each percentage counts as at most 100, so the result stays in `0..=100`.
pub fn overall_completion<'a, I>(percentages: I) -> u8
where
    I: IntoIterator<Item = &'a PhaseProgress>,
{
    let (sum, count) = percentages
        .into_iter()
        .fold((0u64, 0u64), |(sum, count), p| {
            (sum + u64::from(p.percentage.min(100)), count + 1)
        });
    if count == 0 {
        return 0;
    }
    let rounded = (2 * sum + count) / (2 * count);
    u8::try_from(rounded.min(100)).unwrap_or(100)
}

pub struct PhaseProgressTracker {
    catalog: Arc<PhaseCatalog>,
    store: Arc<dyn ProgressStore>,
    study_id: String,
    progress: ProgressMap,
    source: ProgressSource,
}

impl PhaseProgressTracker {
    /// Create a tracker holding defaults; call [`Self::load`] to populate it
    pub fn new(
        catalog: Arc<PhaseCatalog>,
        store: Arc<dyn ProgressStore>,
        study_id: impl Into<String>,
    ) -> Self {
        let progress = defaults(&catalog);
        Self {
            catalog,
            store,
            study_id: study_id.into(),
            progress,
            source: ProgressSource::Fallback,
        }
    }

    pub fn study_id(&self) -> &str {
        &self.study_id
    }

    pub fn source(&self) -> ProgressSource {
        self.source
    }

    /// Current records, one per catalog phase
    pub fn progress(&self) -> &ProgressMap {
        &self.progress
    }

    pub fn get(&self, phase_id: &str) -> Option<&PhaseProgress> {
        self.progress.get(phase_id)
    }

    /// Fetch progress from the store, degrading instead of failing
    pub async fn load(&mut self) -> &ProgressMap {
        match self.store.get_progress(&self.study_id).await {
            Ok(Some(records)) => {
                self.replace(records);
                self.source = ProgressSource::Store;
            }
            Ok(None) => {
                tracing::info!(study_id = %self.study_id, "no progress record, initializing");
                self.initialize_and_refetch().await;
            }
            Err(err) => {
                tracing::warn!(
                    study_id = %self.study_id,
                    error = %err,
                    "progress read failed, retrying via initialize"
                );
                self.initialize_and_refetch().await;
            }
        }
        &self.progress
    }

    async fn initialize_and_refetch(&mut self) {
        let seed = defaults(&self.catalog);
        if let Err(err) = self.store.initialize_progress(&self.study_id, &seed).await {
            tracing::warn!(
                study_id = %self.study_id,
                error = %err,
                "progress initialization failed"
            );
            self.fall_back();
            return;
        }
        match self.store.get_progress(&self.study_id).await {
            Ok(Some(records)) => self.replace(records),
            Ok(None) => self.progress = seed,
            Err(err) => {
                tracing::warn!(study_id = %self.study_id, error = %err, "progress refetch failed");
                self.fall_back();
                return;
            }
        }
        self.source = ProgressSource::Initialized;
    }

    fn fall_back(&mut self) {
        tracing::warn!(study_id = %self.study_id, "using fallback phase progress");
        self.progress = fallback(&self.catalog);
        self.source = ProgressSource::Fallback;
    }

    /// Adopt store records: keep only catalog phases, synthesize missing
    /// ones, and repair records that break the completion invariant.
    fn replace(&mut self, mut records: ProgressMap) {
        let mut merged = ProgressMap::new();
        for phase in self.catalog.phases() {
            let mut record = records.remove(&phase.id).unwrap_or_default();
            if record.normalize() {
                tracing::warn!(
                    study_id = %self.study_id,
                    phase = %phase.id,
                    "normalized inconsistent progress record"
                );
            }
            merged.insert(phase.id.clone(), record);
        }
        if !records.is_empty() {
            tracing::debug!(
                study_id = %self.study_id,
                ignored = records.len(),
                "ignoring progress for phases outside the catalog"
            );
        }
        self.progress = merged;
    }

    /// Record a phase at `percentage` (100 marks it complete), then refetch.
    ///
    /// Idempotent: repeating the call leaves the same completion state.
    pub async fn mark_phase_complete(
        &mut self,
        phase_id: &str,
        percentage: u8,
    ) -> Result<&ProgressMap> {
        if !self.catalog.contains(phase_id) {
            return Err(StudyDesignError::not_found("phase", phase_id));
        }
        if percentage > 100 {
            return Err(StudyDesignError::InvalidPercentage {
                value: u32::from(percentage),
            });
        }

        let record = PhaseProgress {
            completed: percentage == 100,
            percentage,
            last_updated: Some(Utc::now()),
        };
        self.store
            .put_progress(&self.study_id, phase_id, &record)
            .await
            .map_err(StudyDesignError::store_write)?;
        tracing::info!(
            study_id = %self.study_id,
            phase = phase_id,
            percentage,
            "phase progress saved"
        );

        match self.store.get_progress(&self.study_id).await {
            Ok(Some(records)) => {
                self.replace(records);
                self.source = ProgressSource::Store;
            }
            Ok(None) | Err(_) => {
                tracing::warn!(
                    study_id = %self.study_id,
                    phase = phase_id,
                    "refetch after save failed, applying write locally"
                );
                self.progress.insert(phase_id.to_string(), record);
            }
        }
        Ok(&self.progress)
    }

    /// Mean completion over the sequential design phases
    pub fn overall_completion(&self) -> u8 {
        overall_completion(
            self.catalog
                .workflow_phases()
                .filter_map(|phase| self.progress.get(&phase.id)),
        )
    }

    pub fn completed_phase_ids(&self) -> BTreeSet<String> {
        self.progress
            .iter()
            .filter(|(_, p)| p.completed)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn phase_status(&self, phase_id: &str) -> Option<PhaseStatus> {
        self.progress.get(phase_id).map(PhaseProgress::status)
    }

    pub fn is_accessible(&self, phase_id: &str, policy: AccessPolicy) -> bool {
        self.catalog
            .is_accessible(phase_id, &self.completed_phase_ids(), policy)
    }
}

fn defaults(catalog: &PhaseCatalog) -> ProgressMap {
    catalog
        .phases()
        .iter()
        .map(|phase| (phase.id.clone(), PhaseProgress::default()))
        .collect()
}

/// First design phase complete, everything else untouched
fn fallback(catalog: &PhaseCatalog) -> ProgressMap {
    let mut progress = defaults(catalog);
    if let Some(first) = catalog.workflow_phases().next()
        && let Some(record) = progress.get_mut(&first.id)
    {
        record.completed = true;
        record.percentage = 100;
    }
    progress
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ARMS, BASIC_INFO, FORMS, PROTOCOL_VERSIONS, PUBLISH, REVIEW, VISITS};
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;

    fn tracker(store: &Arc<MemoryStore>) -> PhaseProgressTracker {
        PhaseProgressTracker::new(
            Arc::new(PhaseCatalog::standard()),
            Arc::clone(store) as Arc<dyn ProgressStore>,
            "study-1",
        )
    }

    fn at(percentage: u8) -> PhaseProgress {
        PhaseProgress {
            completed: percentage == 100,
            percentage,
            last_updated: None,
        }
    }

    #[test]
    fn overall_completion_rounds_half_up() {
        assert_eq!(overall_completion(std::iter::empty()), 0);
        let records = [at(100), at(100), at(100), at(100), at(0), at(0)];
        assert_eq!(overall_completion(records.iter()), 67);
        let records = [at(50), at(0)];
        assert_eq!(overall_completion(records.iter()), 25);
        let records = [at(1), at(0)];
        assert_eq!(overall_completion(records.iter()), 1);
    }

    #[tokio::test]
    async fn missing_record_is_initialized_once() {
        let store = Arc::new(MemoryStore::new());
        let mut tracker = tracker(&store);
        let progress = tracker.load().await;
        assert_eq!(progress.len(), 8);
        assert!(progress.values().all(|p| !p.completed && p.percentage == 0));
        assert_eq!(tracker.source(), ProgressSource::Initialized);

        let persisted = store.progress_snapshot("study-1").await.expect("initialized");
        assert_eq!(persisted.len(), 8);

        tracker.load().await;
        assert_eq!(tracker.source(), ProgressSource::Store);
    }

    #[tokio::test]
    async fn partial_record_is_completed_with_defaults() {
        let store = Arc::new(MemoryStore::new());
        let mut seeded = ProgressMap::new();
        seeded.insert(ARMS.to_string(), at(40));
        store.insert_progress("study-1", seeded).await;

        let mut tracker = tracker(&store);
        let progress = tracker.load().await;
        assert_eq!(progress.len(), 8);
        assert_eq!(progress.get(ARMS).map(|p| p.percentage), Some(40));
        assert_eq!(progress.get(VISITS), Some(&PhaseProgress::default()));
        assert_eq!(tracker.phase_status(ARMS), Some(PhaseStatus::InProgress));
    }

    #[tokio::test]
    async fn inconsistent_records_are_normalized() {
        let store = Arc::new(MemoryStore::new());
        let mut seeded = ProgressMap::new();
        seeded.insert(
            REVIEW.to_string(),
            PhaseProgress {
                completed: true,
                percentage: 80,
                last_updated: None,
            },
        );
        store.insert_progress("study-1", seeded).await;

        let mut tracker = tracker(&store);
        tracker.load().await;
        assert_eq!(tracker.get(REVIEW), Some(&at(100)));
        assert!(tracker.is_accessible(PUBLISH, AccessPolicy::Development));
    }

    #[tokio::test]
    async fn out_of_range_records_are_clamped() {
        let store = Arc::new(MemoryStore::new());
        let seeded = PhaseCatalog::standard()
            .phases()
            .iter()
            .map(|phase| {
                let record = PhaseProgress {
                    completed: false,
                    percentage: 200,
                    last_updated: None,
                };
                (phase.id.clone(), record)
            })
            .collect::<ProgressMap>();
        store.insert_progress("study-1", seeded).await;

        let mut tracker = tracker(&store);
        tracker.load().await;
        assert_eq!(tracker.get(ARMS), Some(&at(100)));
        assert_eq!(tracker.phase_status(ARMS), Some(PhaseStatus::Completed));
        assert_eq!(tracker.overall_completion(), 100);
    }

    #[test]
    fn overall_completion_ignores_excess_percentages() {
        let overflow = PhaseProgress {
            completed: false,
            percentage: 250,
            last_updated: None,
        };
        let records = [overflow, at(0)];
        assert_eq!(overall_completion(records.iter()), 50);
    }

    #[tokio::test]
    async fn read_failure_recovers_through_initialize() {
        let store = Arc::new(MemoryStore::new());
        store.faults().fail_progress_reads(1);
        let mut tracker = tracker(&store);
        tracker.load().await;
        assert_eq!(tracker.source(), ProgressSource::Initialized);
        assert_eq!(tracker.overall_completion(), 0);
    }

    #[tokio::test]
    async fn persistent_read_failure_falls_back() {
        let store = Arc::new(MemoryStore::new());
        store.faults().fail_progress_reads(2);
        let mut tracker = tracker(&store);
        let progress = tracker.load().await;
        assert_eq!(progress.get(BASIC_INFO), Some(&at(100)));
        assert!(
            progress
                .iter()
                .filter(|(id, _)| id.as_str() != BASIC_INFO)
                .all(|(_, p)| p.percentage == 0)
        );
        assert_eq!(tracker.source(), ProgressSource::Fallback);
        assert_eq!(tracker.overall_completion(), 17);
    }

    #[tokio::test]
    async fn mark_complete_writes_then_refetches() {
        let store = Arc::new(MemoryStore::new());
        let mut tracker = tracker(&store);
        tracker.load().await;

        tracker
            .mark_phase_complete(BASIC_INFO, 100)
            .await
            .expect("save");
        tracker.mark_phase_complete(FORMS, 30).await.expect("save");
        assert_eq!(tracker.completed_phase_ids(), BTreeSet::from([BASIC_INFO.to_string()]));
        assert_eq!(tracker.phase_status(FORMS), Some(PhaseStatus::InProgress));

        // Idempotent
        tracker
            .mark_phase_complete(BASIC_INFO, 100)
            .await
            .expect("save again");
        assert_eq!(tracker.completed_phase_ids().len(), 1);

        let persisted = store.progress_snapshot("study-1").await.expect("persisted");
        assert!(persisted.get(BASIC_INFO).is_some_and(|p| p.completed));
    }

    #[tokio::test]
    async fn write_failure_surfaces_and_leaves_state() {
        let store = Arc::new(MemoryStore::new());
        let mut tracker = tracker(&store);
        tracker.load().await;
        store.faults().fail_progress_writes(1);

        let err = tracker
            .mark_phase_complete(ARMS, 100)
            .await
            .expect_err("write should fail");
        assert!(matches!(err, StudyDesignError::StoreWrite { .. }));
        assert!(tracker.completed_phase_ids().is_empty());
    }

    #[tokio::test]
    async fn invalid_inputs_are_rejected() {
        let store = Arc::new(MemoryStore::new());
        let mut tracker = tracker(&store);
        tracker.load().await;

        let err = tracker
            .mark_phase_complete("separator", 100)
            .await
            .expect_err("unknown phase");
        assert!(matches!(err, StudyDesignError::NotFound { .. }));

        let err = tracker
            .mark_phase_complete(ARMS, 101)
            .await
            .expect_err("over 100");
        assert!(matches!(err, StudyDesignError::InvalidPercentage { value: 101 }));
    }

    #[tokio::test]
    async fn management_phases_do_not_count_toward_completion() {
        let store = Arc::new(MemoryStore::new());
        let mut tracker = tracker(&store);
        tracker.load().await;
        tracker
            .mark_phase_complete(PROTOCOL_VERSIONS, 100)
            .await
            .expect("save");
        assert_eq!(tracker.overall_completion(), 0);
    }
}
