//! Phase catalog and access rules
//!
//! Design phases form a sequential chain (`basic-info` → ... → `publish`);
//! protocol-management phases sit outside the chain and are always reachable.

use crate::error::{Result, StudyDesignError};
use crate::types::{Phase, PhaseCategory};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

pub const BASIC_INFO: &str = "basic-info";
pub const ARMS: &str = "arms";
pub const VISITS: &str = "visits";
pub const FORMS: &str = "forms";
pub const REVIEW: &str = "review";
pub const PUBLISH: &str = "publish";
pub const PROTOCOL_VERSIONS: &str = "protocol-versions";
pub const PROTOCOL_REVISIONS: &str = "protocol-revisions";

/// How strictly design phases gate on their predecessors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessPolicy {
    /// Only `publish` is gated (on `review`); everything else is open
    #[default]
    Development,
    /// Every design phase requires all of its dependencies
    Sequential,
}

impl AccessPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Sequential => "sequential",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseCatalog {
    phases: Vec<Phase>,
}

impl PhaseCatalog {
    /// The standard study design workflow
    pub fn standard() -> Self {
        let design = [
            (BASIC_INFO, "Basic Information", "Study title, phase, sponsor and investigators"),
            (ARMS, "Study Arms", "Treatment arms, interventions and allocation"),
            (VISITS, "Visit Schedule", "Visit definitions, windows and procedures"),
            (FORMS, "Form Bindings", "Case report forms bound to visits"),
            (REVIEW, "Review & Validation", "Design validation and protocol review"),
            (PUBLISH, "Publish Study", "Make the study live for data capture"),
        ];
        let mut phases = Vec::with_capacity(design.len() + 2);
        for (idx, (id, name, description)) in design.iter().enumerate() {
            phases.push(Phase {
                id: (*id).to_string(),
                name: (*name).to_string(),
                description: (*description).to_string(),
                category: PhaseCategory::Design,
                depends_on: design[..idx].iter().map(|(d, _, _)| (*d).to_string()).collect(),
            });
        }
        phases.push(Phase {
            id: PROTOCOL_VERSIONS.to_string(),
            name: "Protocol Versions".to_string(),
            description: "Version history of the study protocol".to_string(),
            category: PhaseCategory::ProtocolManagement,
            depends_on: Vec::new(),
        });
        phases.push(Phase {
            id: PROTOCOL_REVISIONS.to_string(),
            name: "Protocol Revisions".to_string(),
            description: "Request and track protocol amendments".to_string(),
            category: PhaseCategory::ProtocolManagement,
            depends_on: Vec::new(),
        });
        Self { phases }
    }

    /// Build a custom catalog.
    ///
    /// Ids must be unique, design dependencies must name earlier design
    /// phases, and protocol-management phases may not depend on anything.
    pub fn new(phases: Vec<Phase>) -> Result<Self> {
        let mut seen_design: HashSet<&str> = HashSet::new();
        let mut seen_all: HashSet<&str> = HashSet::new();
        for phase in &phases {
            if phase.id.trim().is_empty() {
                return Err(StudyDesignError::invalid_catalog("phase id must not be empty"));
            }
            if !seen_all.insert(phase.id.as_str()) {
                return Err(StudyDesignError::invalid_catalog(format!(
                    "duplicate phase id '{}'",
                    phase.id
                )));
            }
            match phase.category {
                PhaseCategory::ProtocolManagement if !phase.depends_on.is_empty() => {
                    return Err(StudyDesignError::invalid_catalog(format!(
                        "protocol-management phase '{}' must not declare dependencies",
                        phase.id
                    )));
                }
                PhaseCategory::ProtocolManagement => {}
                PhaseCategory::Design => {
                    if let Some(dep) = phase
                        .depends_on
                        .iter()
                        .find(|dep| !seen_design.contains(dep.as_str()))
                    {
                        return Err(StudyDesignError::invalid_catalog(format!(
                            "phase '{}' depends on '{dep}', which is not an earlier design phase",
                            phase.id
                        )));
                    }
                    seen_design.insert(phase.id.as_str());
                }
            }
        }
        Ok(Self { phases })
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    /// Sequential design phases, in order
    pub fn workflow_phases(&self) -> impl Iterator<Item = &Phase> {
        self.phases.iter().filter(|p| p.is_workflow())
    }

    /// Independent protocol-management phases
    pub fn management_phases(&self) -> impl Iterator<Item = &Phase> {
        self.phases.iter().filter(|p| !p.is_workflow())
    }

    pub fn get(&self, phase_id: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.id == phase_id)
    }

    pub fn contains(&self, phase_id: &str) -> bool {
        self.get(phase_id).is_some()
    }

    /// Whether a phase may be entered given the set of completed phases.
    ///
    /// Unknown ids are never accessible.
    pub fn is_accessible(
        &self,
        phase_id: &str,
        completed: &BTreeSet<String>,
        policy: AccessPolicy,
    ) -> bool {
        let Some(phase) = self.get(phase_id) else {
            return false;
        };
        if !phase.is_workflow() {
            return true;
        }
        match policy {
            AccessPolicy::Development => phase.id != PUBLISH || completed.contains(REVIEW),
            AccessPolicy::Sequential => phase.depends_on.iter().all(|dep| completed.contains(dep)),
        }
    }
}

impl Default for PhaseCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn completed(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn standard_catalog_shape() {
        let catalog = PhaseCatalog::standard();
        let workflow: Vec<&str> = catalog.workflow_phases().map(|p| p.id.as_str()).collect();
        assert_eq!(workflow, vec![BASIC_INFO, ARMS, VISITS, FORMS, REVIEW, PUBLISH]);
        let management: Vec<&str> = catalog.management_phases().map(|p| p.id.as_str()).collect();
        assert_eq!(management, vec![PROTOCOL_VERSIONS, PROTOCOL_REVISIONS]);

        let publish = catalog.get(PUBLISH).expect("publish phase");
        assert_eq!(publish.depends_on.len(), 5);
        assert!(catalog.get(BASIC_INFO).expect("basic-info").depends_on.is_empty());
        // Re-validating the standard catalog must succeed
        assert!(PhaseCatalog::new(catalog.phases().to_vec()).is_ok());
    }

    #[test]
    fn development_policy_only_gates_publish() {
        let catalog = PhaseCatalog::standard();
        let none = completed(&[]);
        for id in [BASIC_INFO, ARMS, VISITS, FORMS, REVIEW] {
            assert!(catalog.is_accessible(id, &none, AccessPolicy::Development));
        }
        assert!(!catalog.is_accessible(PUBLISH, &none, AccessPolicy::Development));
        assert!(catalog.is_accessible(PUBLISH, &completed(&[REVIEW]), AccessPolicy::Development));
    }

    #[test]
    fn sequential_policy_requires_all_dependencies() {
        let catalog = PhaseCatalog::standard();
        let done = completed(&[BASIC_INFO, ARMS]);
        assert!(catalog.is_accessible(VISITS, &done, AccessPolicy::Sequential));
        assert!(!catalog.is_accessible(FORMS, &done, AccessPolicy::Sequential));
        // review alone does not unlock publish under the strict policy
        assert!(!catalog.is_accessible(PUBLISH, &completed(&[REVIEW]), AccessPolicy::Sequential));
    }

    #[test]
    fn management_phases_are_always_accessible() {
        let catalog = PhaseCatalog::standard();
        for policy in [AccessPolicy::Development, AccessPolicy::Sequential] {
            assert!(catalog.is_accessible(PROTOCOL_VERSIONS, &completed(&[]), policy));
            assert!(catalog.is_accessible(PROTOCOL_REVISIONS, &completed(&[]), policy));
        }
    }

    #[test]
    fn unknown_phase_is_not_accessible() {
        let catalog = PhaseCatalog::standard();
        assert!(!catalog.is_accessible("separator", &completed(&[]), AccessPolicy::Development));
        assert!(!catalog.is_accessible("", &completed(&[]), AccessPolicy::Sequential));
    }

    #[test]
    fn custom_catalog_rejects_forward_dependencies() {
        let phase = |id: &str, deps: &[&str]| Phase {
            id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            category: PhaseCategory::Design,
            depends_on: deps.iter().map(|d| (*d).to_string()).collect(),
        };
        let err = PhaseCatalog::new(vec![phase("a", &["b"]), phase("b", &[])])
            .expect_err("forward dependency");
        assert!(err.to_string().contains("not an earlier design phase"));

        let err = PhaseCatalog::new(vec![phase("a", &[]), phase("a", &[])]).expect_err("dup");
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn management_phase_with_dependencies_is_rejected() {
        let err = PhaseCatalog::new(vec![Phase {
            id: "history".to_string(),
            name: "History".to_string(),
            description: String::new(),
            category: PhaseCategory::ProtocolManagement,
            depends_on: vec!["basic-info".to_string()],
        }])
        .expect_err("should reject");
        assert!(matches!(err, StudyDesignError::InvalidCatalog { .. }));
    }
}
