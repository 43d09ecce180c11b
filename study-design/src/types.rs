//! Core types for the study design workflow
//!
//! Wire shapes use SCREAMING_SNAKE_CASE enum codes so records round-trip
//! through any JSON store unchanged.

use crate::version::VersionLabel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ─────────────────────────────────────────────────────────────────────────────
// Phases
// ─────────────────────────────────────────────────────────────────────────────

/// Which partition of the catalog a phase belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PhaseCategory {
    /// Sequential design workflow (basic-info through publish)
    Design,
    /// Independent, always reachable
    ProtocolManagement,
}

impl PhaseCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Design => "design",
            Self::ProtocolManagement => "protocol-management",
        }
    }
}

/// A design phase definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Phase {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: PhaseCategory,
    /// Phases that must be complete first, in workflow order
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl Phase {
    pub fn is_workflow(&self) -> bool {
        self.category == PhaseCategory::Design
    }
}

/// Completion state of one phase for one study
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseProgress {
    pub completed: bool,
    pub percentage: u8,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl PhaseProgress {
    /// A completed phase at 100%
    pub fn complete(at: DateTime<Utc>) -> Self {
        Self {
            completed: true,
            percentage: 100,
            last_updated: Some(at),
        }
    }

    /// Whether `completed ⇔ percentage == 100` holds
    pub fn is_consistent(&self) -> bool {
        self.completed == (self.percentage == 100)
    }

    /// Restore the completion invariant.
    ///
    /// A record flagged completed or above 100% is pinned to a completed
    /// 100%; a 100% record is marked completed. Returns true if anything
    /// changed.
    pub fn normalize(&mut self) -> bool {
        if self.percentage > 100 {
            self.percentage = 100;
            self.completed = true;
            return true;
        }
        if self.is_consistent() {
            return false;
        }
        if self.completed {
            self.percentage = 100;
        } else {
            self.completed = true;
        }
        true
    }

    pub fn status(&self) -> PhaseStatus {
        if self.completed {
            PhaseStatus::Completed
        } else if self.percentage > 0 {
            PhaseStatus::InProgress
        } else {
            PhaseStatus::NotStarted
        }
    }
}

/// Progress records keyed by phase id
pub type ProgressMap = BTreeMap<String, PhaseProgress>;

/// Display status derived from a phase's progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseStatus {
    NotStarted,
    InProgress,
    Completed,
}

// ─────────────────────────────────────────────────────────────────────────────
// Protocol versions and revisions
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AmendmentType {
    Original,
    AdministrativeChange,
    MinorAmendment,
    SubstantialAmendment,
}

impl AmendmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Original => "ORIGINAL",
            Self::AdministrativeChange => "ADMINISTRATIVE_CHANGE",
            Self::MinorAmendment => "MINOR_AMENDMENT",
            Self::SubstantialAmendment => "SUBSTANTIAL_AMENDMENT",
        }
    }

    /// Parse from a wire code or a short alias (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        let normalized = s.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "ORIGINAL" => Some(Self::Original),
            "ADMINISTRATIVE_CHANGE" | "ADMINISTRATIVE" | "ADMIN" => {
                Some(Self::AdministrativeChange)
            }
            "MINOR_AMENDMENT" | "MINOR" => Some(Self::MinorAmendment),
            "SUBSTANTIAL_AMENDMENT" | "SUBSTANTIAL" | "MAJOR" => Some(Self::SubstantialAmendment),
            _ => None,
        }
    }

    /// Impact assumed when a revision lists no changes
    pub fn default_impact(&self) -> ImpactLevel {
        match self {
            Self::SubstantialAmendment => ImpactLevel::High,
            Self::MinorAmendment => ImpactLevel::Medium,
            Self::AdministrativeChange | Self::Original => ImpactLevel::Low,
        }
    }

    /// Substantial amendments go back to the IRB/regulator before activation
    pub fn requires_regulatory_approval(&self) -> bool {
        matches!(self, Self::SubstantialAmendment)
    }
}

/// Ordered so that the maximum over a change list is the overall impact
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImpactLevel {
    Low,
    Medium,
    High,
}

impl ImpactLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }
}

/// One proposed or recorded protocol change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    pub section: String,
    pub description: String,
    #[serde(default)]
    pub justification: String,
    pub impact_level: ImpactLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VersionStatus {
    Active,
    Archived,
}

impl VersionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Archived => "ARCHIVED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(Self::Active),
            "ARCHIVED" => Some(Self::Archived),
            _ => None,
        }
    }
}

/// An immutable protocol version record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolVersion {
    pub id: String,
    pub version_label: VersionLabel,
    pub status: VersionStatus,
    pub amendment_type: AmendmentType,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub changes: Vec<Change>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RevisionStatus {
    Draft,
    UnderReview,
    Approved,
}

impl RevisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::UnderReview => "UNDER_REVIEW",
            Self::Approved => "APPROVED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DRAFT" => Some(Self::Draft),
            "UNDER_REVIEW" => Some(Self::UnderReview),
            "APPROVED" => Some(Self::Approved),
            _ => None,
        }
    }
}

/// An amendment working its way toward becoming a protocol version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRevision {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub amendment_type: AmendmentType,
    pub status: RevisionStatus,
    pub target_version_label: VersionLabel,
    #[serde(default)]
    pub proposed_changes: Vec<Change>,
    pub requested_at: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Validation
// ─────────────────────────────────────────────────────────────────────────────

/// Ordered by severity so that `max` is the reduction rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckStatus {
    Passed,
    Warning,
    Failed,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "PASSED",
            Self::Warning => "WARNING",
            Self::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Check {
    pub name: String,
    pub status: CheckStatus,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Check {
    pub fn new(name: impl Into<String>, status: CheckStatus, required: bool) -> Self {
        Self {
            name: name.into(),
            status,
            required,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Study lifecycle
// ─────────────────────────────────────────────────────────────────────────────

/// Authoritative study status as held by the status store.
///
/// Unrecognized codes are preserved in `Unknown` rather than rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StudyLifecycleStatus {
    Planning,
    Draft,
    Rejected,
    ProtocolReview,
    Approved,
    Active,
    Completed,
    Terminated,
    Withdrawn,
    Suspended,
    Unknown(String),
}

impl StudyLifecycleStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Planning => "PLANNING",
            Self::Draft => "DRAFT",
            Self::Rejected => "REJECTED",
            Self::ProtocolReview => "PROTOCOL_REVIEW",
            Self::Approved => "APPROVED",
            Self::Active => "ACTIVE",
            Self::Completed => "COMPLETED",
            Self::Terminated => "TERMINATED",
            Self::Withdrawn => "WITHDRAWN",
            Self::Suspended => "SUSPENDED",
            Self::Unknown(code) => code,
        }
    }

    /// Total parse; codes are matched case-insensitively
    pub fn parse(code: &str) -> Self {
        match code.trim().to_ascii_uppercase().as_str() {
            "PLANNING" => Self::Planning,
            "DRAFT" => Self::Draft,
            "REJECTED" => Self::Rejected,
            "PROTOCOL_REVIEW" => Self::ProtocolReview,
            "APPROVED" => Self::Approved,
            "ACTIVE" => Self::Active,
            "COMPLETED" => Self::Completed,
            "TERMINATED" => Self::Terminated,
            "WITHDRAWN" => Self::Withdrawn,
            "SUSPENDED" => Self::Suspended,
            _ => Self::Unknown(code.to_string()),
        }
    }

    /// Statuses no workflow action leaves
    pub fn is_absorbing(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Terminated | Self::Withdrawn | Self::Suspended
        )
    }
}

impl From<String> for StudyLifecycleStatus {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<StudyLifecycleStatus> for String {
    fn from(value: StudyLifecycleStatus) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for StudyLifecycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reviewers
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewerStatus {
    Assigned,
    Approved,
    ChangesRequested,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reviewer {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub role: String,
    pub status: ReviewerStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn normalize_restores_completion_invariant() {
        let mut flagged = PhaseProgress {
            completed: true,
            percentage: 40,
            last_updated: None,
        };
        assert!(flagged.normalize());
        assert_eq!(flagged.percentage, 100);

        let mut full = PhaseProgress {
            completed: false,
            percentage: 100,
            last_updated: None,
        };
        assert!(full.normalize());
        assert!(full.completed);

        let mut partial = PhaseProgress {
            completed: false,
            percentage: 60,
            last_updated: None,
        };
        assert!(!partial.normalize());
        assert_eq!(partial.status(), PhaseStatus::InProgress);

        let mut overflow = PhaseProgress {
            completed: false,
            percentage: 200,
            last_updated: None,
        };
        assert!(overflow.normalize());
        assert_eq!(overflow.percentage, 100);
        assert!(overflow.completed);
    }

    #[test]
    fn lifecycle_status_parse_is_total() {
        assert_eq!(
            StudyLifecycleStatus::parse("protocol_review"),
            StudyLifecycleStatus::ProtocolReview
        );
        assert_eq!(
            StudyLifecycleStatus::parse("ON_HOLD"),
            StudyLifecycleStatus::Unknown("ON_HOLD".to_string())
        );
        assert_eq!(StudyLifecycleStatus::parse("ON_HOLD").as_str(), "ON_HOLD");
    }

    #[test]
    fn lifecycle_status_serializes_as_code() {
        let json = serde_json::to_string(&StudyLifecycleStatus::Approved).expect("serialize");
        assert_eq!(json, "\"APPROVED\"");
        let back: StudyLifecycleStatus = serde_json::from_str("\"SUSPENDED\"").expect("parse");
        assert!(back.is_absorbing());
    }

    #[test]
    fn amendment_aliases() {
        assert_eq!(
            AmendmentType::parse("substantial"),
            Some(AmendmentType::SubstantialAmendment)
        );
        assert_eq!(
            AmendmentType::parse("administrative-change"),
            Some(AmendmentType::AdministrativeChange)
        );
        assert_eq!(AmendmentType::parse("bogus"), None);
        assert!(AmendmentType::SubstantialAmendment.requires_regulatory_approval());
        assert!(!AmendmentType::MinorAmendment.requires_regulatory_approval());
    }

    #[test]
    fn check_status_orders_by_severity() {
        assert!(CheckStatus::Failed > CheckStatus::Warning);
        assert!(CheckStatus::Warning > CheckStatus::Passed);
        assert!(ImpactLevel::High > ImpactLevel::Low);
    }
}
