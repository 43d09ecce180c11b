//! Validation aggregation
//!
//! Reduces categorized checks to one publish-readiness verdict. The rule is
//! the same at both levels: any FAILED wins, then any WARNING, else PASSED.
//! Optional checks count like required ones; nothing is filtered out.

use crate::types::{Check, CheckStatus};
use serde::{Deserialize, Serialize};

/// Reduce statuses by severity; an empty input is PASSED
pub fn reduce_statuses<I>(statuses: I) -> CheckStatus
where
    I: IntoIterator<Item = CheckStatus>,
{
    statuses.into_iter().max().unwrap_or(CheckStatus::Passed)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationCategory {
    pub category: String,
    pub status: CheckStatus,
    pub checks: Vec<Check>,
}

impl ValidationCategory {
    pub fn new(category: impl Into<String>, checks: Vec<Check>) -> Self {
        let status = reduce_statuses(checks.iter().map(|c| c.status));
        Self {
            category: category.into(),
            status,
            checks,
        }
    }

    /// Recompute `status` from the checks, e.g. after deserializing a
    /// category whose reported status may be stale.
    pub fn recompute(&mut self) {
        self.status = reduce_statuses(self.checks.iter().map(|c| c.status));
    }
}

/// A non-passing check together with the category it came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub category: String,
    pub check: String,
    pub status: CheckStatus,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub passed: usize,
    pub warning: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub overall: CheckStatus,
    pub categories: Vec<ValidationCategory>,
}

impl ValidationReport {
    /// Aggregate categories. Category statuses are recomputed from their
    /// checks so a caller-supplied status can never mask a failure.
    pub fn from_categories(mut categories: Vec<ValidationCategory>) -> Self {
        for category in &mut categories {
            category.recompute();
        }
        let overall = reduce_statuses(categories.iter().map(|c| c.status));
        Self {
            overall,
            categories,
        }
    }

    /// Per-check counts across all categories
    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for check in self.categories.iter().flat_map(|c| &c.checks) {
            match check.status {
                CheckStatus::Passed => counts.passed += 1,
                CheckStatus::Warning => counts.warning += 1,
                CheckStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Failing and warning checks, failures first, each in report order
    pub fn findings(&self) -> Vec<Finding> {
        let collect = |wanted: CheckStatus| {
            self.categories.iter().flat_map(move |category| {
                category
                    .checks
                    .iter()
                    .filter(move |check| check.status == wanted)
                    .map(move |check| Finding {
                        category: category.category.clone(),
                        check: check.name.clone(),
                        status: check.status,
                        required: check.required,
                        message: check.message.clone(),
                    })
            })
        };
        collect(CheckStatus::Failed)
            .chain(collect(CheckStatus::Warning))
            .collect()
    }

    /// Names of failed checks as `category: check`
    pub fn failed_checks(&self) -> Vec<String> {
        self.check_names(CheckStatus::Failed)
    }

    /// Names of warning checks as `category: check`
    pub fn warning_checks(&self) -> Vec<String> {
        self.check_names(CheckStatus::Warning)
    }

    fn check_names(&self, wanted: CheckStatus) -> Vec<String> {
        self.findings()
            .into_iter()
            .filter(|f| f.status == wanted)
            .map(|f| format!("{}: {}", f.category, f.check))
            .collect()
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::from_categories(Vec::new())
    }
}
