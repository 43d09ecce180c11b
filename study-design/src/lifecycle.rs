//! Protocol revision lifecycle
//!
//! `DRAFT --submit--> UNDER_REVIEW --approve--> APPROVED`. Approval turns the
//! revision into an ACTIVE protocol version and drops it from the pending
//! set. The store archives the previous ACTIVE version atomically with the
//! insert.

use crate::error::{Result, StudyDesignError};
use crate::store::VersionStore;
use crate::types::{
    AmendmentType, Change, PendingRevision, ProtocolVersion, RevisionStatus, VersionStatus,
};
use crate::version::{next_version_label, sort_newest_first};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Caller input for a new amendment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub amendment_type: AmendmentType,
    #[serde(default)]
    pub proposed_changes: Vec<Change>,
}

fn revision_entity(revision_id: &str) -> String {
    format!("revision {revision_id}")
}

pub struct VersionLifecycle {
    store: Arc<dyn VersionStore>,
}

impl VersionLifecycle {
    pub fn new(store: Arc<dyn VersionStore>) -> Self {
        Self { store }
    }

    /// Version history, newest first
    pub async fn version_history(&self, study_id: &str) -> Result<Vec<ProtocolVersion>> {
        let mut versions = self
            .store
            .list_versions(study_id)
            .await
            .map_err(StudyDesignError::store_read)?;
        sort_newest_first(&mut versions);
        Ok(versions)
    }

    pub async fn active_version(&self, study_id: &str) -> Result<Option<ProtocolVersion>> {
        let versions = self.version_history(study_id).await?;
        Ok(versions
            .into_iter()
            .find(|v| v.status == VersionStatus::Active))
    }

    pub async fn pending_revisions(&self, study_id: &str) -> Result<Vec<PendingRevision>> {
        self.store
            .list_pending_revisions(study_id)
            .await
            .map_err(StudyDesignError::store_read)
    }

    async fn find_revision(&self, study_id: &str, revision_id: &str) -> Result<PendingRevision> {
        self.pending_revisions(study_id)
            .await?
            .into_iter()
            .find(|r| r.id == revision_id)
            .ok_or_else(|| StudyDesignError::not_found("revision", revision_id))
    }

    /// Open a DRAFT revision targeting the next version label
    pub async fn request_revision(
        &self,
        study_id: &str,
        request: RevisionRequest,
    ) -> Result<PendingRevision> {
        if request.title.trim().is_empty() {
            return Err(StudyDesignError::invalid_amendment(
                "revision title must not be empty",
            ));
        }

        let versions = self.version_history(study_id).await?;
        if request.amendment_type == AmendmentType::Original && !versions.is_empty() {
            return Err(StudyDesignError::invalid_amendment(
                "an ORIGINAL version can only be requested for a study without versions",
            ));
        }
        let current = versions
            .iter()
            .find(|v| v.status == VersionStatus::Active)
            .map(|v| v.version_label);
        let target = next_version_label(current.as_ref(), request.amendment_type)?;

        let revision = PendingRevision {
            id: Uuid::new_v4().to_string(),
            title: request.title,
            description: request.description,
            amendment_type: request.amendment_type,
            status: RevisionStatus::Draft,
            target_version_label: target,
            proposed_changes: request.proposed_changes,
            requested_at: Utc::now(),
        };
        self.store
            .upsert_pending_revision(study_id, &revision)
            .await
            .map_err(StudyDesignError::store_write)?;

        tracing::info!(
            study_id,
            revision_id = %revision.id,
            amendment = revision.amendment_type.as_str(),
            target = %revision.target_version_label,
            impact = revision.estimated_impact().as_str(),
            "protocol revision requested"
        );
        Ok(revision)
    }

    /// DRAFT → UNDER_REVIEW
    pub async fn submit_revision(
        &self,
        study_id: &str,
        revision_id: &str,
    ) -> Result<PendingRevision> {
        let mut revision = self.find_revision(study_id, revision_id).await?;
        if revision.status != RevisionStatus::Draft {
            return Err(StudyDesignError::invalid_transition(
                revision_entity(revision_id),
                revision.status.as_str(),
                RevisionStatus::UnderReview.as_str(),
            ));
        }

        revision.status = RevisionStatus::UnderReview;
        self.store
            .upsert_pending_revision(study_id, &revision)
            .await
            .map_err(StudyDesignError::store_write)?;

        tracing::info!(study_id, revision_id, "revision submitted for review");
        self.find_revision(study_id, revision_id).await
    }

    /// UNDER_REVIEW → APPROVED, producing the new ACTIVE version.
    ///
    /// Refuses a target label that is not newer than the active version,
    /// which happens when another revision was approved first.
    pub async fn approve_revision(
        &self,
        study_id: &str,
        revision_id: &str,
    ) -> Result<ProtocolVersion> {
        let revision = self.find_revision(study_id, revision_id).await?;
        if revision.status != RevisionStatus::UnderReview {
            return Err(StudyDesignError::invalid_transition(
                revision_entity(revision_id),
                revision.status.as_str(),
                RevisionStatus::Approved.as_str(),
            ));
        }

        if let Some(active) = self.active_version(study_id).await?
            && revision.target_version_label <= active.version_label
        {
            return Err(StudyDesignError::StaleRevision {
                revision_id: revision_id.to_string(),
                target: revision.target_version_label.to_string(),
                active: active.version_label.to_string(),
            });
        }

        let now = Utc::now();
        let version = ProtocolVersion {
            id: Uuid::new_v4().to_string(),
            version_label: revision.target_version_label,
            status: VersionStatus::Active,
            amendment_type: revision.amendment_type,
            title: revision.title,
            summary: revision.description,
            created_at: now,
            approved_at: Some(now),
            published_at: None,
            changes: revision.proposed_changes,
        };
        self.store
            .create_version(study_id, &version)
            .await
            .map_err(StudyDesignError::store_write)?;
        self.store
            .remove_pending_revision(study_id, revision_id)
            .await
            .map_err(StudyDesignError::store_write)?;

        tracing::info!(
            study_id,
            revision_id,
            version = %version.version_label,
            "revision approved, new protocol version active"
        );
        Ok(version)
    }
}
