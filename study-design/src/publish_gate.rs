//! Publish gate: the study lifecycle state machine
//!
//! External statuses collapse onto four gate states, each of which allows
//! at most one advance action. Validation failures and open reviewer
//! feedback are reported as advisories but do not block by default; the
//! `block_on_failed_validation` policy turns a FAILED verdict into a hard
//! stop for `publish` unless the caller overrides it explicitly.

use crate::error::{Result, StudyDesignError};
use crate::store::StatusStore;
use crate::types::{CheckStatus, Reviewer, ReviewerStatus, StudyLifecycleStatus};
use crate::validation::ValidationReport;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublishState {
    Draft,
    ProtocolReview,
    ReadyToPublish,
    Published,
}

impl PublishState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::ProtocolReview => "PROTOCOL_REVIEW",
            Self::ReadyToPublish => "READY_TO_PUBLISH",
            Self::Published => "PUBLISHED",
        }
    }

    /// Map an external lifecycle status; unknown statuses land in DRAFT
    pub fn from_status(status: &StudyLifecycleStatus) -> Self {
        match status {
            StudyLifecycleStatus::Planning
            | StudyLifecycleStatus::Draft
            | StudyLifecycleStatus::Rejected => Self::Draft,
            StudyLifecycleStatus::ProtocolReview => Self::ProtocolReview,
            StudyLifecycleStatus::Approved => Self::ReadyToPublish,
            StudyLifecycleStatus::Active
            | StudyLifecycleStatus::Completed
            | StudyLifecycleStatus::Terminated
            | StudyLifecycleStatus::Withdrawn
            | StudyLifecycleStatus::Suspended => Self::Published,
            StudyLifecycleStatus::Unknown(code) => {
                tracing::warn!(status = %code, "unknown study status, treating as draft");
                Self::Draft
            }
        }
    }

    /// The single action allowed from this state
    pub fn allowed_action(&self) -> Option<GateAction> {
        match self {
            Self::Draft => Some(GateAction::SubmitForReview),
            Self::ProtocolReview => Some(GateAction::Approve),
            Self::ReadyToPublish => Some(GateAction::Publish),
            Self::Published => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GateAction {
    SubmitForReview,
    Approve,
    Publish,
}

impl GateAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SubmitForReview => "submitForReview",
            Self::Approve => "approve",
            Self::Publish => "publish",
        }
    }

    pub fn required_state(&self) -> PublishState {
        match self {
            Self::SubmitForReview => PublishState::Draft,
            Self::Approve => PublishState::ProtocolReview,
            Self::Publish => PublishState::ReadyToPublish,
        }
    }

    /// Status written to the store when the action succeeds
    pub fn target_status(&self) -> StudyLifecycleStatus {
        match self {
            Self::SubmitForReview => StudyLifecycleStatus::ProtocolReview,
            Self::Approve => StudyLifecycleStatus::Approved,
            Self::Publish => StudyLifecycleStatus::Active,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Advisories
// ─────────────────────────────────────────────────────────────────────────────

/// Attached when an action proceeds despite a WARNING or FAILED verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationBlockedWarning {
    pub overall: CheckStatus,
    pub failed_checks: Vec<String>,
    pub warning_checks: Vec<String>,
}

impl ValidationBlockedWarning {
    pub fn from_report(report: &ValidationReport) -> Option<Self> {
        (report.overall != CheckStatus::Passed).then(|| Self {
            overall: report.overall,
            failed_checks: report.failed_checks(),
            warning_checks: report.warning_checks(),
        })
    }
}

/// Summary of reviewer sign-off; never blocks a transition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewerAdvisory {
    pub pending: Vec<String>,
    pub changes_requested: Vec<String>,
    /// Where reviewer sign-off alone would place the study
    pub suggested_state: Option<PublishState>,
}

impl ReviewerAdvisory {
    pub fn from_reviewers(reviewers: &[Reviewer]) -> Option<Self> {
        if reviewers.is_empty() {
            return None;
        }
        let names = |wanted: ReviewerStatus| {
            reviewers
                .iter()
                .filter(|r| r.status == wanted)
                .map(|r| r.name.clone())
                .collect::<Vec<_>>()
        };
        let advisory = Self {
            pending: names(ReviewerStatus::Assigned),
            changes_requested: names(ReviewerStatus::ChangesRequested),
            suggested_state: Some(reviewer_publish_state(reviewers)),
        };
        (!advisory.pending.is_empty() || !advisory.changes_requested.is_empty())
            .then_some(advisory)
    }
}

/// Gate state implied by reviewer sign-off alone
pub fn reviewer_publish_state(reviewers: &[Reviewer]) -> PublishState {
    if reviewers
        .iter()
        .any(|r| r.status == ReviewerStatus::ChangesRequested)
    {
        PublishState::Draft
    } else if reviewers.iter().any(|r| r.status != ReviewerStatus::Approved) {
        PublishState::ProtocolReview
    } else {
        PublishState::ReadyToPublish
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptSeverity {
    Informational,
    Cautionary,
    Override,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfirmationPrompt {
    pub severity: PromptSeverity,
    pub message: String,
}

const PUBLISH_CONFIRMATION: &str = "Are you sure you want to publish this study? This action cannot be undone and will make the study live for data capture.";

/// Confirmation wording for `publish`, escalating with the verdict
pub fn confirmation_prompt(overall: CheckStatus) -> ConfirmationPrompt {
    let (severity, prefix) = match overall {
        CheckStatus::Passed => (PromptSeverity::Informational, ""),
        CheckStatus::Warning => (
            PromptSeverity::Cautionary,
            "NOTE: This study has validation warnings. ",
        ),
        CheckStatus::Failed => (
            PromptSeverity::Override,
            "WARNING: This study has validation failures! Publishing will make it live for data capture despite these issues. ",
        ),
    };
    ConfirmationPrompt {
        severity,
        message: format!("{prefix}{PUBLISH_CONFIRMATION}"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Gate
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishPolicy {
    /// Refuse `publish` on a FAILED verdict unless overridden
    #[serde(default)]
    pub block_on_failed_validation: bool,
}

/// Result of one gate transition, built from the refetched status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionOutcome {
    pub action: GateAction,
    pub previous: StudyLifecycleStatus,
    pub status: StudyLifecycleStatus,
    pub state: PublishState,
    pub next_action: Option<GateAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_warning: Option<ValidationBlockedWarning>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewer_advisory: Option<ReviewerAdvisory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<ConfirmationPrompt>,
}

/// Current gate position of a study
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GateSnapshot {
    pub status: StudyLifecycleStatus,
    pub state: PublishState,
    pub next_action: Option<GateAction>,
}

pub struct PublishGate {
    store: Arc<dyn StatusStore>,
    policy: PublishPolicy,
}

impl PublishGate {
    pub fn new(store: Arc<dyn StatusStore>, policy: PublishPolicy) -> Self {
        Self { store, policy }
    }

    pub fn with_policy(mut self, policy: PublishPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> PublishPolicy {
        self.policy
    }

    pub async fn current(&self, study_id: &str) -> Result<GateSnapshot> {
        let status = self
            .store
            .get_status(study_id)
            .await
            .map_err(StudyDesignError::store_read)?
            .ok_or_else(|| StudyDesignError::not_found("study", study_id))?;
        let state = PublishState::from_status(&status);
        Ok(GateSnapshot {
            next_action: state.allowed_action(),
            status,
            state,
        })
    }

    /// DRAFT → PROTOCOL_REVIEW; allowed with failing validation
    pub async fn submit_for_review(
        &self,
        study_id: &str,
        report: &ValidationReport,
    ) -> Result<TransitionOutcome> {
        let mut outcome = self.advance(study_id, GateAction::SubmitForReview).await?;
        outcome.validation_warning = ValidationBlockedWarning::from_report(report);
        Ok(outcome)
    }

    /// PROTOCOL_REVIEW → APPROVED; reviewer sign-off is advisory only
    pub async fn approve(
        &self,
        study_id: &str,
        reviewers: &[Reviewer],
    ) -> Result<TransitionOutcome> {
        let advisory = ReviewerAdvisory::from_reviewers(reviewers);
        if let Some(advisory) = &advisory {
            tracing::warn!(
                study_id,
                pending = advisory.pending.len(),
                changes_requested = advisory.changes_requested.len(),
                "approving with open reviewer feedback"
            );
        }
        let mut outcome = self.advance(study_id, GateAction::Approve).await?;
        outcome.reviewer_advisory = advisory;
        Ok(outcome)
    }

    /// APPROVED → ACTIVE
    pub async fn publish(
        &self,
        study_id: &str,
        report: &ValidationReport,
        override_failures: bool,
    ) -> Result<TransitionOutcome> {
        if self.policy.block_on_failed_validation
            && report.overall == CheckStatus::Failed
            && !override_failures
        {
            // Still reject illegal transitions ahead of the validation block
            let snapshot = self.current(study_id).await?;
            Self::check_state(study_id, &snapshot.status, GateAction::Publish)?;
            return Err(StudyDesignError::ValidationBlocked {
                message: format!(
                    "{} failed check(s): {}",
                    report.counts().failed,
                    report.failed_checks().join(", ")
                ),
            });
        }

        let mut outcome = self.advance(study_id, GateAction::Publish).await?;
        outcome.validation_warning = ValidationBlockedWarning::from_report(report);
        outcome.prompt = Some(confirmation_prompt(report.overall));
        if report.overall == CheckStatus::Failed {
            tracing::warn!(study_id, "study published with failing validation");
        }
        Ok(outcome)
    }

    fn check_state(
        study_id: &str,
        status: &StudyLifecycleStatus,
        action: GateAction,
    ) -> Result<()> {
        if PublishState::from_status(status) != action.required_state() {
            return Err(StudyDesignError::invalid_transition(
                format!("study {study_id}"),
                status.as_str(),
                action.target_status().as_str(),
            ));
        }
        Ok(())
    }

    /// One compare-and-set write, then an authoritative refetch
    async fn advance(&self, study_id: &str, action: GateAction) -> Result<TransitionOutcome> {
        let snapshot = self.current(study_id).await?;
        Self::check_state(study_id, &snapshot.status, action)?;

        let target = action.target_status();
        self.store
            .set_status(study_id, &snapshot.status, &target)
            .await
            .map_err(StudyDesignError::store_write)?;
        tracing::info!(
            study_id,
            action = action.as_str(),
            from = %snapshot.status,
            to = %target,
            "study status advanced"
        );

        let status = match self.store.get_status(study_id).await {
            Ok(Some(status)) => status,
            Ok(None) | Err(_) => {
                tracing::warn!(study_id, "status refetch failed, assuming written status");
                target
            }
        };
        let state = PublishState::from_status(&status);
        Ok(TransitionOutcome {
            action,
            previous: snapshot.status,
            next_action: state.allowed_action(),
            status,
            state,
            validation_warning: None,
            reviewer_advisory: None,
            prompt: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::Check;
    use crate::validation::ValidationCategory;
    use pretty_assertions::assert_eq;

    async fn gate_with(
        status: StudyLifecycleStatus,
        policy: PublishPolicy,
    ) -> (Arc<MemoryStore>, PublishGate) {
        let store = Arc::new(MemoryStore::new());
        store.insert_status("s1", status).await;
        let gate = PublishGate::new(Arc::clone(&store) as Arc<dyn StatusStore>, policy);
        (store, gate)
    }

    fn report(status: CheckStatus) -> ValidationReport {
        ValidationReport::from_categories(vec![ValidationCategory::new(
            "Regulatory",
            vec![Check::new("IRB approval documents", status, true)],
        )])
    }

    fn reviewer(name: &str, status: ReviewerStatus) -> Reviewer {
        Reviewer {
            id: name.to_lowercase(),
            name: name.to_string(),
            role: "Medical Monitor".to_string(),
            status,
        }
    }

    #[test]
    fn status_mapping() {
        use StudyLifecycleStatus::*;
        let cases = [
            (Planning, PublishState::Draft),
            (Draft, PublishState::Draft),
            (Rejected, PublishState::Draft),
            (ProtocolReview, PublishState::ProtocolReview),
            (Approved, PublishState::ReadyToPublish),
            (Active, PublishState::Published),
            (Completed, PublishState::Published),
            (Terminated, PublishState::Published),
            (Withdrawn, PublishState::Published),
            (Suspended, PublishState::Published),
            (Unknown("ON_HOLD".to_string()), PublishState::Draft),
        ];
        for (status, expected) in cases {
            assert_eq!(PublishState::from_status(&status), expected, "{status}");
        }
    }

    #[test]
    fn exactly_one_action_per_state() {
        assert_eq!(PublishState::Draft.allowed_action(), Some(GateAction::SubmitForReview));
        assert_eq!(PublishState::ProtocolReview.allowed_action(), Some(GateAction::Approve));
        assert_eq!(PublishState::ReadyToPublish.allowed_action(), Some(GateAction::Publish));
        assert_eq!(PublishState::Published.allowed_action(), None);
    }

    #[test]
    fn prompt_escalates_with_verdict() {
        let passed = confirmation_prompt(CheckStatus::Passed);
        assert_eq!(passed.severity, PromptSeverity::Informational);
        assert!(passed.message.starts_with("Are you sure"));

        let warning = confirmation_prompt(CheckStatus::Warning);
        assert_eq!(warning.severity, PromptSeverity::Cautionary);
        assert!(warning.message.starts_with("NOTE:"));

        let failed = confirmation_prompt(CheckStatus::Failed);
        assert_eq!(failed.severity, PromptSeverity::Override);
        assert!(failed.message.starts_with("WARNING:"));
        assert!(failed.message.ends_with(PUBLISH_CONFIRMATION));
    }

    #[test]
    fn reviewer_state_derivation() {
        assert_eq!(
            reviewer_publish_state(&[
                reviewer("A", ReviewerStatus::Approved),
                reviewer("B", ReviewerStatus::ChangesRequested),
            ]),
            PublishState::Draft
        );
        assert_eq!(
            reviewer_publish_state(&[
                reviewer("A", ReviewerStatus::Approved),
                reviewer("B", ReviewerStatus::Assigned),
            ]),
            PublishState::ProtocolReview
        );
        assert_eq!(
            reviewer_publish_state(&[reviewer("A", ReviewerStatus::Approved)]),
            PublishState::ReadyToPublish
        );
    }

    #[tokio::test]
    async fn submit_with_failed_validation_attaches_warning() {
        let (store, gate) = gate_with(StudyLifecycleStatus::Draft, PublishPolicy::default()).await;
        let outcome = gate
            .submit_for_review("s1", &report(CheckStatus::Failed))
            .await
            .expect("submit");
        assert_eq!(outcome.state, PublishState::ProtocolReview);
        assert_eq!(outcome.next_action, Some(GateAction::Approve));
        let warning = outcome.validation_warning.expect("warning attached");
        assert_eq!(warning.failed_checks, vec!["Regulatory: IRB approval documents"]);
        assert_eq!(
            store.get_status("s1").await.expect("status"),
            Some(StudyLifecycleStatus::ProtocolReview)
        );
    }

    #[tokio::test]
    async fn submit_with_warning_verdict_attaches_warning() {
        let (_store, gate) = gate_with(StudyLifecycleStatus::Draft, PublishPolicy::default()).await;
        let report = ValidationReport::from_categories(vec![
            ValidationCategory::new(
                "Study Information",
                vec![Check::new("Study title", CheckStatus::Passed, true)],
            ),
            ValidationCategory::new(
                "Form Bindings",
                vec![Check::new("All forms have timing rules", CheckStatus::Warning, false)],
            ),
        ]);
        assert_eq!(report.overall, CheckStatus::Warning);

        let outcome = gate.submit_for_review("s1", &report).await.expect("submit");
        assert_eq!(outcome.status, StudyLifecycleStatus::ProtocolReview);
        let warning = outcome.validation_warning.expect("warning attached");
        assert_eq!(warning.overall, CheckStatus::Warning);
        assert!(warning.failed_checks.is_empty());
        assert_eq!(
            warning.warning_checks,
            vec!["Form Bindings: All forms have timing rules"]
        );
    }

    #[tokio::test]
    async fn passed_verdict_attaches_no_warning() {
        let (_store, gate) = gate_with(StudyLifecycleStatus::Draft, PublishPolicy::default()).await;
        let outcome = gate
            .submit_for_review("s1", &report(CheckStatus::Passed))
            .await
            .expect("submit");
        assert_eq!(outcome.validation_warning, None);
    }

    #[tokio::test]
    async fn second_submit_is_rejected_without_write() {
        let (store, gate) = gate_with(StudyLifecycleStatus::Draft, PublishPolicy::default()).await;
        gate.submit_for_review("s1", &report(CheckStatus::Passed))
            .await
            .expect("first submit");

        // A write would consume this fault and fail with StoreWrite
        store.faults().fail_status_writes(1);
        let err = gate
            .submit_for_review("s1", &report(CheckStatus::Passed))
            .await
            .expect_err("already in review");
        match err {
            StudyDesignError::InvalidTransition {
                current, attempted, ..
            } => {
                assert_eq!(current, "PROTOCOL_REVIEW");
                assert_eq!(attempted, "PROTOCOL_REVIEW");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            store.get_status("s1").await.expect("status"),
            Some(StudyLifecycleStatus::ProtocolReview)
        );

        // The armed fault is still pending, proving no write was attempted
        let err = gate.approve("s1", &[]).await.expect_err("fault fires now");
        assert!(matches!(err, StudyDesignError::StoreWrite { .. }));
    }

    #[tokio::test]
    async fn approve_from_draft_is_rejected_without_write() {
        let (store, gate) = gate_with(StudyLifecycleStatus::Draft, PublishPolicy::default()).await;
        let err = gate.approve("s1", &[]).await.expect_err("illegal");
        match err {
            StudyDesignError::InvalidTransition {
                current, attempted, ..
            } => {
                assert_eq!(current, "DRAFT");
                assert_eq!(attempted, "APPROVED");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            store.get_status("s1").await.expect("status"),
            Some(StudyLifecycleStatus::Draft)
        );
    }

    #[tokio::test]
    async fn approve_with_open_feedback_still_advances() {
        let (_store, gate) =
            gate_with(StudyLifecycleStatus::ProtocolReview, PublishPolicy::default()).await;
        let outcome = gate
            .approve(
                "s1",
                &[
                    reviewer("Chen", ReviewerStatus::Assigned),
                    reviewer("Williams", ReviewerStatus::ChangesRequested),
                ],
            )
            .await
            .expect("approve");
        assert_eq!(outcome.status, StudyLifecycleStatus::Approved);
        let advisory = outcome.reviewer_advisory.expect("advisory");
        assert_eq!(advisory.pending, vec!["Chen"]);
        assert_eq!(advisory.changes_requested, vec!["Williams"]);
        assert_eq!(advisory.suggested_state, Some(PublishState::Draft));
    }

    #[tokio::test]
    async fn publish_with_failures_is_allowed_by_default() {
        let (_store, gate) =
            gate_with(StudyLifecycleStatus::Approved, PublishPolicy::default()).await;
        let outcome = gate
            .publish("s1", &report(CheckStatus::Failed), false)
            .await
            .expect("publish");
        assert_eq!(outcome.state, PublishState::Published);
        assert_eq!(outcome.next_action, None);
        assert_eq!(
            outcome.prompt.map(|p| p.severity),
            Some(PromptSeverity::Override)
        );
    }

    #[tokio::test]
    async fn strict_policy_blocks_failed_publish_without_override() {
        let policy = PublishPolicy {
            block_on_failed_validation: true,
        };
        let (store, gate) = gate_with(StudyLifecycleStatus::Approved, policy).await;
        let err = gate
            .publish("s1", &report(CheckStatus::Failed), false)
            .await
            .expect_err("blocked");
        assert!(matches!(err, StudyDesignError::ValidationBlocked { .. }));
        assert_eq!(
            store.get_status("s1").await.expect("status"),
            Some(StudyLifecycleStatus::Approved)
        );

        let outcome = gate
            .publish("s1", &report(CheckStatus::Failed), true)
            .await
            .expect("override");
        assert_eq!(outcome.status, StudyLifecycleStatus::Active);
    }

    #[tokio::test]
    async fn published_study_has_no_further_actions() {
        let (_store, gate) =
            gate_with(StudyLifecycleStatus::Active, PublishPolicy::default()).await;
        let err = gate
            .publish("s1", &report(CheckStatus::Passed), false)
            .await
            .expect_err("already published");
        assert!(matches!(err, StudyDesignError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn store_write_failure_surfaces() {
        let (store, gate) = gate_with(StudyLifecycleStatus::Draft, PublishPolicy::default()).await;
        store.faults().fail_status_writes(1);
        let err = gate
            .submit_for_review("s1", &report(CheckStatus::Passed))
            .await
            .expect_err("write fails");
        assert!(matches!(err, StudyDesignError::StoreWrite { .. }));
        assert!(err.to_string().contains("injected fault"));
    }

    #[tokio::test]
    async fn unknown_study_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let gate = PublishGate::new(store as Arc<dyn StatusStore>, PublishPolicy::default());
        let err = gate.current("ghost").await.expect_err("missing");
        assert!(matches!(err, StudyDesignError::NotFound { entity: "study", .. }));
    }
}
