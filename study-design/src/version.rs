//! Protocol version labels and amendment arithmetic
//!
//! A label is exactly two non-negative integers joined by a dot. Labels
//! compare numerically by component, so `2.10` sorts after `2.9`.

use crate::error::{Result, StudyDesignError};
use crate::types::{AmendmentType, Change, ImpactLevel, PendingRevision, ProtocolVersion};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionLabel {
    pub major: u32,
    pub minor: u32,
}

impl VersionLabel {
    /// Label assigned to the original protocol
    pub const BASELINE: Self = Self { major: 1, minor: 0 };

    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Label that follows this one for the given amendment.
    ///
    /// Substantial amendments bump the major component and reset minor;
    /// minor and administrative changes bump minor. `ORIGINAL` never
    /// follows an existing version.
    pub fn next(&self, amendment: AmendmentType) -> Result<Self> {
        let overflow = || StudyDesignError::InvalidVersionLabel {
            label: self.to_string(),
        };
        match amendment {
            AmendmentType::SubstantialAmendment => Ok(Self {
                major: self.major.checked_add(1).ok_or_else(overflow)?,
                minor: 0,
            }),
            AmendmentType::MinorAmendment | AmendmentType::AdministrativeChange => Ok(Self {
                major: self.major,
                minor: self.minor.checked_add(1).ok_or_else(overflow)?,
            }),
            AmendmentType::Original => Err(StudyDesignError::invalid_amendment(format!(
                "an ORIGINAL version cannot follow version {self}"
            ))),
        }
    }
}

impl FromStr for VersionLabel {
    type Err = StudyDesignError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || StudyDesignError::InvalidVersionLabel {
            label: s.to_string(),
        };
        let (major, minor) = s.split_once('.').ok_or_else(invalid)?;
        let component = |part: &str| -> Result<u32> {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            part.parse::<u32>().map_err(|_| invalid())
        };
        Ok(Self {
            major: component(major)?,
            minor: component(minor)?,
        })
    }
}

impl TryFrom<String> for VersionLabel {
    type Error = StudyDesignError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<VersionLabel> for String {
    fn from(value: VersionLabel) -> Self {
        value.to_string()
    }
}

impl fmt::Display for VersionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Derive the label a new amendment will receive.
///
/// `current` is the active label, or `None` for a study without versions.
/// Without a current label amendments derive from [`VersionLabel::BASELINE`]
/// and an `ORIGINAL` request yields the baseline itself.
pub fn next_version_label(
    current: Option<&VersionLabel>,
    amendment: AmendmentType,
) -> Result<VersionLabel> {
    match (current, amendment) {
        (None, AmendmentType::Original) => Ok(VersionLabel::BASELINE),
        (None, other) => VersionLabel::BASELINE.next(other),
        (Some(label), other) => label.next(other),
    }
}

/// Highest impact among the changes, or the amendment type's default
pub fn estimated_impact(amendment: AmendmentType, changes: &[Change]) -> ImpactLevel {
    changes
        .iter()
        .map(|c| c.impact_level)
        .max()
        .unwrap_or_else(|| amendment.default_impact())
}

impl PendingRevision {
    pub fn estimated_impact(&self) -> ImpactLevel {
        estimated_impact(self.amendment_type, &self.proposed_changes)
    }

    pub fn requires_regulatory_approval(&self) -> bool {
        self.amendment_type.requires_regulatory_approval()
    }
}

/// Sort versions newest first by label
pub fn sort_newest_first(versions: &mut [ProtocolVersion]) {
    versions.sort_by(|a, b| b.version_label.cmp(&a.version_label));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(s: &str) -> VersionLabel {
        s.parse().expect("valid label")
    }

    #[test]
    fn substantial_bumps_major() {
        let next = next_version_label(Some(&label("1.3")), AmendmentType::SubstantialAmendment)
            .expect("next");
        assert_eq!(next.to_string(), "2.0");
    }

    #[test]
    fn minor_and_administrative_bump_minor() {
        let current = label("2.0");
        assert_eq!(
            next_version_label(Some(&current), AmendmentType::MinorAmendment)
                .expect("next")
                .to_string(),
            "2.1"
        );
        assert_eq!(
            next_version_label(Some(&current), AmendmentType::AdministrativeChange)
                .expect("next")
                .to_string(),
            "2.1"
        );
    }

    #[test]
    fn documented_label_examples() {
        let cases = [
            ("2.1", AmendmentType::SubstantialAmendment, "3.0"),
            ("1.0", AmendmentType::AdministrativeChange, "1.1"),
            ("1.0", AmendmentType::MinorAmendment, "1.1"),
            ("1.9", AmendmentType::MinorAmendment, "1.10"),
        ];
        for (current, amendment_type, expected) in cases {
            let next = next_version_label(Some(&label(current)), amendment_type).expect("next");
            assert_eq!(next.to_string(), expected, "{current} + {amendment_type:?}");
        }
    }

    #[test]
    fn missing_current_uses_baseline() {
        assert_eq!(
            next_version_label(None, AmendmentType::Original).expect("original"),
            VersionLabel::BASELINE
        );
        assert_eq!(
            next_version_label(None, AmendmentType::MinorAmendment)
                .expect("minor")
                .to_string(),
            "1.1"
        );
        assert_eq!(
            next_version_label(None, AmendmentType::SubstantialAmendment)
                .expect("major")
                .to_string(),
            "2.0"
        );
    }

    #[test]
    fn original_after_existing_version_is_rejected() {
        let err = next_version_label(Some(&label("1.0")), AmendmentType::Original)
            .expect_err("should reject");
        assert!(matches!(err, StudyDesignError::InvalidAmendment { .. }));
    }

    #[test]
    fn malformed_labels_are_rejected() {
        for bad in ["", "1", "1.", ".1", "1.2.3", "v1.0", "1.-2", "a.b", " 1.0"] {
            assert!(
                bad.parse::<VersionLabel>().is_err(),
                "expected '{bad}' to be rejected"
            );
        }
    }

    #[test]
    fn labels_compare_numerically() {
        assert!(label("2.10") > label("2.9"));
        assert!(label("10.0") > label("9.99"));
        assert_eq!(label("03.01"), label("3.1"));
    }

    #[test]
    fn label_serializes_as_string() {
        let json = serde_json::to_string(&label("1.2")).expect("serialize");
        assert_eq!(json, "\"1.2\"");
        assert!(serde_json::from_str::<VersionLabel>("\"1.x\"").is_err());
    }

    #[test]
    fn impact_is_the_highest_change_level() {
        let change = |impact| Change {
            section: "Eligibility".to_string(),
            description: "Tighten criteria".to_string(),
            justification: String::new(),
            impact_level: impact,
        };
        assert_eq!(
            estimated_impact(
                AmendmentType::AdministrativeChange,
                &[change(ImpactLevel::Low), change(ImpactLevel::High)]
            ),
            ImpactLevel::High
        );
        assert_eq!(
            estimated_impact(AmendmentType::MinorAmendment, &[]),
            ImpactLevel::Medium
        );
    }
}
