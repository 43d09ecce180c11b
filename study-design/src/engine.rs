//! Workflow engine
//!
//! The async surface the UI layer drives. Stateless between calls: each
//! operation reads what it needs from the stores, performs at most one
//! write per action, and returns the refreshed state.

use crate::capability::CapabilityTable;
use crate::catalog::{AccessPolicy, PhaseCatalog};
use crate::config::StudyDesignConfig;
use crate::error::Result;
use crate::lifecycle::{RevisionRequest, VersionLifecycle};
use crate::progress::{PhaseProgressTracker, ProgressSource};
use crate::publish_gate::{
    ConfirmationPrompt, GateSnapshot, PublishGate, PublishPolicy, TransitionOutcome,
    confirmation_prompt,
};
use crate::store::{ProgressStore, StatusStore, VersionStore};
use crate::types::{
    PendingRevision, Phase, PhaseProgress, PhaseStatus, ProtocolVersion, Reviewer,
};
use crate::validation::ValidationReport;
use serde::Serialize;
use std::sync::Arc;

/// One phase as presented to the UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseView {
    pub phase: Phase,
    pub progress: PhaseProgress,
    pub status: PhaseStatus,
    pub accessible: bool,
}

/// Progress of one study across the whole catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub study_id: String,
    pub phases: Vec<PhaseView>,
    pub overall_completion: u8,
    pub source: ProgressSource,
}

impl ProgressSnapshot {
    pub fn phase(&self, phase_id: &str) -> Option<&PhaseView> {
        self.phases.iter().find(|v| v.phase.id == phase_id)
    }
}

pub struct WorkflowEngine {
    catalog: Arc<PhaseCatalog>,
    access_policy: AccessPolicy,
    progress_store: Arc<dyn ProgressStore>,
    gate: PublishGate,
    versions: VersionLifecycle,
    capabilities: CapabilityTable,
}

impl WorkflowEngine {
    /// Build over one backend that implements every store port
    pub fn new<S>(store: Arc<S>) -> Self
    where
        S: ProgressStore + StatusStore + VersionStore + 'static,
    {
        Self::from_parts(
            Arc::clone(&store) as Arc<dyn ProgressStore>,
            Arc::clone(&store) as Arc<dyn StatusStore>,
            store as Arc<dyn VersionStore>,
        )
    }

    pub fn from_parts(
        progress: Arc<dyn ProgressStore>,
        status: Arc<dyn StatusStore>,
        versions: Arc<dyn VersionStore>,
    ) -> Self {
        Self {
            catalog: Arc::new(PhaseCatalog::standard()),
            access_policy: AccessPolicy::default(),
            progress_store: progress,
            gate: PublishGate::new(status, PublishPolicy::default()),
            versions: VersionLifecycle::new(versions),
            capabilities: CapabilityTable::standard(),
        }
    }

    /// Apply policies and the capability table from configuration
    pub fn configure(mut self, config: &StudyDesignConfig) -> Result<Self> {
        self.access_policy = config.access_policy;
        self.capabilities = config.capability_table()?;
        self.gate = self.gate.with_policy(config.publish_policy());
        Ok(self)
    }

    pub fn with_catalog(mut self, catalog: PhaseCatalog) -> Self {
        self.catalog = Arc::new(catalog);
        self
    }

    pub fn with_access_policy(mut self, policy: AccessPolicy) -> Self {
        self.access_policy = policy;
        self
    }

    pub fn with_publish_policy(mut self, policy: PublishPolicy) -> Self {
        self.gate = self.gate.with_policy(policy);
        self
    }

    pub fn with_capabilities(mut self, capabilities: CapabilityTable) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn catalog(&self) -> &PhaseCatalog {
        &self.catalog
    }

    pub fn access_policy(&self) -> AccessPolicy {
        self.access_policy
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Phase progress
    // ─────────────────────────────────────────────────────────────────────────

    fn tracker(&self, study_id: &str) -> PhaseProgressTracker {
        PhaseProgressTracker::new(
            Arc::clone(&self.catalog),
            Arc::clone(&self.progress_store),
            study_id,
        )
    }

    fn snapshot(&self, tracker: &PhaseProgressTracker) -> ProgressSnapshot {
        let phases = self
            .catalog
            .phases()
            .iter()
            .map(|phase| {
                let progress = tracker.get(&phase.id).cloned().unwrap_or_default();
                PhaseView {
                    status: progress.status(),
                    accessible: tracker.is_accessible(&phase.id, self.access_policy),
                    progress,
                    phase: phase.clone(),
                }
            })
            .collect();
        ProgressSnapshot {
            study_id: tracker.study_id().to_string(),
            phases,
            overall_completion: tracker.overall_completion(),
            source: tracker.source(),
        }
    }

    /// Never fails; degraded reads are reflected in `source`
    pub async fn load_progress(&self, study_id: &str) -> ProgressSnapshot {
        let mut tracker = self.tracker(study_id);
        tracker.load().await;
        self.snapshot(&tracker)
    }

    pub async fn is_phase_accessible(&self, study_id: &str, phase_id: &str) -> bool {
        let mut tracker = self.tracker(study_id);
        tracker.load().await;
        tracker.is_accessible(phase_id, self.access_policy)
    }

    pub async fn mark_phase_complete(
        &self,
        study_id: &str,
        phase_id: &str,
        percentage: u8,
    ) -> Result<ProgressSnapshot> {
        let mut tracker = self.tracker(study_id);
        tracker.load().await;
        tracker.mark_phase_complete(phase_id, percentage).await?;
        Ok(self.snapshot(&tracker))
    }

    pub async fn overall_completion(&self, study_id: &str) -> u8 {
        self.load_progress(study_id).await.overall_completion
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Publish gate
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn publish_state(&self, study_id: &str) -> Result<GateSnapshot> {
        self.gate.current(study_id).await
    }

    pub async fn submit_for_review(
        &self,
        study_id: &str,
        report: &ValidationReport,
    ) -> Result<TransitionOutcome> {
        self.gate.submit_for_review(study_id, report).await
    }

    pub async fn approve(
        &self,
        study_id: &str,
        reviewers: &[Reviewer],
    ) -> Result<TransitionOutcome> {
        self.gate.approve(study_id, reviewers).await
    }

    pub async fn publish(
        &self,
        study_id: &str,
        report: &ValidationReport,
        override_failures: bool,
    ) -> Result<TransitionOutcome> {
        self.gate.publish(study_id, report, override_failures).await
    }

    pub fn publish_prompt(&self, report: &ValidationReport) -> ConfirmationPrompt {
        confirmation_prompt(report.overall)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Protocol versions
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn request_revision(
        &self,
        study_id: &str,
        request: RevisionRequest,
    ) -> Result<PendingRevision> {
        self.versions.request_revision(study_id, request).await
    }

    pub async fn submit_revision(
        &self,
        study_id: &str,
        revision_id: &str,
    ) -> Result<PendingRevision> {
        self.versions.submit_revision(study_id, revision_id).await
    }

    pub async fn approve_revision(
        &self,
        study_id: &str,
        revision_id: &str,
    ) -> Result<ProtocolVersion> {
        self.versions.approve_revision(study_id, revision_id).await
    }

    pub async fn pending_revisions(&self, study_id: &str) -> Result<Vec<PendingRevision>> {
        self.versions.pending_revisions(study_id).await
    }

    pub async fn version_history(&self, study_id: &str) -> Result<Vec<ProtocolVersion>> {
        self.versions.version_history(study_id).await
    }

    pub async fn active_version(&self, study_id: &str) -> Result<Option<ProtocolVersion>> {
        self.versions.active_version(study_id).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Capabilities
    // ─────────────────────────────────────────────────────────────────────────

    pub fn capabilities(&self) -> &CapabilityTable {
        &self.capabilities
    }

    pub fn has_module_access(&self, role: &str, module: &str) -> bool {
        self.capabilities.capability(role, module)
    }

    pub fn has_category_access(&self, role: &str, category: &str) -> bool {
        self.capabilities.category_access(role, category)
    }
}
