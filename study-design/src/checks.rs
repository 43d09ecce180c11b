//! Standard design checks
//!
//! Builds the five default validation categories from a flat snapshot of
//! the study design. A required check that does not hold is FAILED; an
//! optional one is a WARNING.

use crate::types::{Check, CheckStatus};
use crate::validation::{ValidationCategory, ValidationReport};
use serde::{Deserialize, Serialize};

pub const STUDY_INFORMATION: &str = "Study Information";
pub const STUDY_ARMS: &str = "Study Arms";
pub const VISIT_SCHEDULE: &str = "Visit Schedule";
pub const FORM_BINDINGS: &str = "Form Bindings";
pub const REGULATORY: &str = "Regulatory";

/// Counts and flags describing a study design at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DesignSnapshot {
    pub title: Option<String>,
    pub principal_investigator: Option<String>,
    pub study_phase: Option<String>,
    pub primary_endpoint: Option<String>,
    pub sample_size_justified: bool,

    pub arm_count: usize,
    pub randomization_configured: bool,
    pub arms_without_intervention: usize,
    pub allocation_defined: bool,

    pub visit_count: usize,
    pub has_baseline_visit: bool,
    pub visits_without_window: usize,
    pub visits_without_procedures: usize,
    pub has_end_of_treatment_visit: bool,

    pub unbound_required_forms: usize,
    pub demographics_at_baseline: bool,
    pub safety_forms_configured: bool,
    pub forms_without_timing: usize,

    pub irb_documents_uploaded: bool,
    pub consent_forms_uploaded: bool,
    pub sites_missing_agreements: usize,
    pub ind_number: Option<String>,
}

fn present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|s| !s.trim().is_empty())
}

const NO_VISITS: &str = "No visits scheduled";

fn required(name: &str, ok: bool, failure: impl FnOnce() -> String) -> Check {
    if ok {
        Check::new(name, CheckStatus::Passed, true)
    } else {
        Check::new(name, CheckStatus::Failed, true).with_message(failure())
    }
}

fn optional(name: &str, ok: bool, advisory: impl FnOnce() -> String) -> Check {
    if ok {
        Check::new(name, CheckStatus::Passed, false)
    } else {
        Check::new(name, CheckStatus::Warning, false).with_message(advisory())
    }
}

fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("1 {noun}")
    } else {
        format!("{count} {noun}s")
    }
}

impl DesignSnapshot {
    pub fn study_information(&self) -> ValidationCategory {
        ValidationCategory::new(
            STUDY_INFORMATION,
            vec![
                required("Study title defined", present(&self.title), || {
                    "Study title is missing".to_string()
                }),
                required(
                    "Principal investigator assigned",
                    present(&self.principal_investigator),
                    || "No principal investigator assigned".to_string(),
                ),
                required("Study phase specified", present(&self.study_phase), || {
                    "Study phase is not set".to_string()
                }),
                required(
                    "Primary endpoint defined",
                    present(&self.primary_endpoint),
                    || "Primary endpoint is missing".to_string(),
                ),
                optional("Sample size calculation", self.sample_size_justified, || {
                    "Statistical plan could be more detailed".to_string()
                }),
            ],
        )
    }

    pub fn study_arms(&self) -> ValidationCategory {
        // Single-arm studies have nothing to randomize
        let randomization_ok = self.arm_count <= 1 || self.randomization_configured;
        ValidationCategory::new(
            STUDY_ARMS,
            vec![
                required("At least one study arm defined", self.arm_count > 0, || {
                    "No study arms defined".to_string()
                }),
                required("Randomization strategy configured", randomization_ok, || {
                    "Randomization is not configured for a multi-arm study".to_string()
                }),
                required(
                    "All arms have interventions",
                    self.arm_count > 0 && self.arms_without_intervention == 0,
                    || {
                        if self.arm_count == 0 {
                            "No study arms defined".to_string()
                        } else {
                            format!(
                                "{} without interventions",
                                plural(self.arms_without_intervention, "arm")
                            )
                        }
                    },
                ),
                required("Subject allocation defined", self.allocation_defined, || {
                    "Subject allocation is not defined".to_string()
                }),
            ],
        )
    }

    pub fn visit_schedule(&self) -> ValidationCategory {
        ValidationCategory::new(
            VISIT_SCHEDULE,
            vec![
                required("Baseline visit defined", self.has_baseline_visit, || {
                    "No baseline visit in the schedule".to_string()
                }),
                required(
                    "Visit windows configured",
                    self.visit_count > 0 && self.visits_without_window == 0,
                    || {
                        if self.visit_count == 0 {
                            NO_VISITS.to_string()
                        } else {
                            format!(
                                "{} without a window",
                                plural(self.visits_without_window, "visit")
                            )
                        }
                    },
                ),
                required(
                    "All visits have procedures",
                    self.visit_count > 0 && self.visits_without_procedures == 0,
                    || {
                        if self.visit_count == 0 {
                            NO_VISITS.to_string()
                        } else {
                            format!(
                                "{} without procedures",
                                plural(self.visits_without_procedures, "visit")
                            )
                        }
                    },
                ),
                required("End of treatment visit", self.has_end_of_treatment_visit, || {
                    "No end of treatment visit".to_string()
                }),
            ],
        )
    }

    pub fn form_bindings(&self) -> ValidationCategory {
        ValidationCategory::new(
            FORM_BINDINGS,
            vec![
                required(
                    "Required forms bound to visits",
                    self.unbound_required_forms == 0,
                    || {
                        format!(
                            "{} not bound",
                            plural(self.unbound_required_forms, "required form")
                        )
                    },
                ),
                required(
                    "Demographics form at baseline",
                    self.demographics_at_baseline,
                    || "Demographics form is not bound to the baseline visit".to_string(),
                ),
                required("Safety forms configured", self.safety_forms_configured, || {
                    "Safety forms are not configured".to_string()
                }),
                optional(
                    "All forms have timing rules",
                    self.forms_without_timing == 0,
                    || "Some forms missing specific timing constraints".to_string(),
                ),
            ],
        )
    }

    pub fn regulatory(&self) -> ValidationCategory {
        ValidationCategory::new(
            REGULATORY,
            vec![
                required("IRB approval documents", self.irb_documents_uploaded, || {
                    "IRB approval letter not uploaded".to_string()
                }),
                required("Informed consent forms", self.consent_forms_uploaded, || {
                    "Informed consent forms not uploaded".to_string()
                }),
                optional(
                    "Investigator agreements",
                    self.sites_missing_agreements == 0,
                    || {
                        format!(
                            "{} missing signed agreements",
                            plural(self.sites_missing_agreements, "site")
                        )
                    },
                ),
                required("FDA IND number", present(&self.ind_number), || {
                    "IND number is not recorded".to_string()
                }),
            ],
        )
    }

    /// All five standard categories, aggregated
    pub fn validate(&self) -> ValidationReport {
        ValidationReport::from_categories(vec![
            self.study_information(),
            self.study_arms(),
            self.visit_schedule(),
            self.form_bindings(),
            self.regulatory(),
        ])
    }
}
