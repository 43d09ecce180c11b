//! Role capability lookup
//!
//! An immutable role → module table handed to the engine at construction.
//! Backend role names are resolved through an alias map first; a role that
//! resolves to nothing known has no capabilities at all.

use crate::error::{Result, StudyDesignError};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

pub const SYSTEM_ADMIN: &str = "SYSTEM_ADMIN";
pub const PRINCIPAL_INVESTIGATOR: &str = "PRINCIPAL_INVESTIGATOR";
pub const STUDY_COORDINATOR: &str = "STUDY_COORDINATOR";
pub const DATA_MANAGER: &str = "DATA_MANAGER";
pub const CRA: &str = "CRA";
pub const SITE_USER: &str = "SITE_USER";
pub const MEDICAL_CODER: &str = "MEDICAL_CODER";
pub const AUDITOR: &str = "AUDITOR";

pub const STUDY_DESIGN_MODULE: &str = "study-design";

const ROLE_MODULES: &[(&str, &[&str])] = &[
    (
        SYSTEM_ADMIN,
        &[
            "study-design",
            "datacapture-management",
            "dq-management",
            "user-management",
            "subject-management",
            "audit-trail",
            "medical-coding",
            "reports",
            "data-integration",
            "system-monitoring",
        ],
    ),
    (
        PRINCIPAL_INVESTIGATOR,
        &[
            "study-design",
            "datacapture-management",
            "dq-management",
            "subject-management",
            "medical-coding",
            "reports",
            "audit-trail",
        ],
    ),
    (
        STUDY_COORDINATOR,
        &[
            "datacapture-management",
            "subject-management",
            "dq-management",
            "reports",
        ],
    ),
    (
        DATA_MANAGER,
        &[
            "datacapture-management",
            "dq-management",
            "medical-coding",
            "reports",
            "data-integration",
            "audit-trail",
        ],
    ),
    (
        CRA,
        &[
            "datacapture-management",
            "subject-management",
            "dq-management",
            "reports",
            "audit-trail",
        ],
    ),
    (SITE_USER, &["datacapture-management", "subject-management"]),
    (MEDICAL_CODER, &["medical-coding", "reports"]),
    (AUDITOR, &["audit-trail", "reports", "dq-management"]),
];

/// Fine-grained permissions derived from module access and role
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModulePermissions {
    pub can_view: bool,
    pub can_edit: bool,
    pub can_delete: bool,
    pub can_export: bool,
    pub can_manage_users: bool,
    pub can_view_audit_trail: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityTable {
    modules: BTreeMap<String, BTreeSet<String>>,
    aliases: BTreeMap<String, String>,
    categories: BTreeMap<String, BTreeSet<String>>,
}

fn owned_set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

impl CapabilityTable {
    /// Build a table; every alias must point at a role in `modules`
    pub fn new(
        modules: BTreeMap<String, BTreeSet<String>>,
        aliases: BTreeMap<String, String>,
        categories: BTreeMap<String, BTreeSet<String>>,
    ) -> Result<Self> {
        let normalize = |s: &str| s.trim().to_ascii_uppercase();
        let modules: BTreeMap<String, BTreeSet<String>> = modules
            .into_iter()
            .map(|(role, set)| (normalize(&role), set))
            .collect();
        let mut resolved = BTreeMap::new();
        for (alias, role) in aliases {
            let role = normalize(&role);
            if !modules.contains_key(&role) {
                return Err(StudyDesignError::config(format!(
                    "role alias '{alias}' points at unknown role '{role}'"
                )));
            }
            resolved.insert(normalize(&alias), role);
        }
        let categories = categories
            .into_iter()
            .map(|(category, roles)| {
                (
                    category,
                    roles.iter().map(|r| normalize(r)).collect::<BTreeSet<_>>(),
                )
            })
            .collect();
        Ok(Self {
            modules,
            aliases: resolved,
            categories,
        })
    }

    /// The EDC's standard eight-role table
    pub fn standard() -> Self {
        let modules: BTreeMap<String, BTreeSet<String>> = ROLE_MODULES
            .iter()
            .map(|(role, modules)| ((*role).to_string(), owned_set(modules)))
            .collect();

        let aliases: BTreeMap<String, String> = [
            ("USER", SITE_USER),
            ("ADMIN", SYSTEM_ADMIN),
            ("PI", PRINCIPAL_INVESTIGATOR),
            ("COORDINATOR", STUDY_COORDINATOR),
            ("DM", DATA_MANAGER),
            ("CODER", MEDICAL_CODER),
        ]
        .into_iter()
        .map(|(alias, role)| (alias.to_string(), role.to_string()))
        .collect();

        let categories: BTreeMap<String, BTreeSet<String>> = [
            (
                "study-management",
                owned_set(&[SYSTEM_ADMIN, PRINCIPAL_INVESTIGATOR, DATA_MANAGER]),
            ),
            (
                "clinical-operations",
                owned_set(&[
                    SYSTEM_ADMIN,
                    PRINCIPAL_INVESTIGATOR,
                    STUDY_COORDINATOR,
                    DATA_MANAGER,
                    CRA,
                    SITE_USER,
                ]),
            ),
            (
                "data-quality",
                owned_set(&[
                    SYSTEM_ADMIN,
                    PRINCIPAL_INVESTIGATOR,
                    STUDY_COORDINATOR,
                    DATA_MANAGER,
                    CRA,
                    AUDITOR,
                ]),
            ),
            (
                "clinical-analytics",
                owned_set(&[
                    SYSTEM_ADMIN,
                    PRINCIPAL_INVESTIGATOR,
                    DATA_MANAGER,
                    MEDICAL_CODER,
                    CRA,
                    AUDITOR,
                ]),
            ),
            ("system-integration", owned_set(&[SYSTEM_ADMIN, DATA_MANAGER])),
        ]
        .into_iter()
        .map(|(category, roles)| (category.to_string(), roles))
        .collect();

        Self {
            modules,
            aliases,
            categories,
        }
    }

    /// Canonical role for a backend role name, if known
    pub fn resolve_role(&self, role: &str) -> Option<&str> {
        let normalized = role.trim().to_ascii_uppercase();
        if let Some((key, _)) = self.modules.get_key_value(&normalized) {
            return Some(key.as_str());
        }
        self.aliases.get(&normalized).map(String::as_str)
    }

    /// Whether `role` may open `module`
    pub fn capability(&self, role: &str, module: &str) -> bool {
        self.resolve_role(role)
            .and_then(|r| self.modules.get(r))
            .is_some_and(|modules| modules.contains(module))
    }

    /// Whether `role` is listed for the module category
    pub fn category_access(&self, role: &str, category: &str) -> bool {
        match (self.resolve_role(role), self.categories.get(category)) {
            (Some(role), Some(roles)) => roles.contains(role),
            _ => false,
        }
    }

    pub fn accessible_modules(&self, role: &str) -> Vec<String> {
        self.resolve_role(role)
            .and_then(|r| self.modules.get(r))
            .map(|modules| modules.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn module_permissions(&self, role: &str, module: &str) -> ModulePermissions {
        let Some(role) = self.resolve_role(role) else {
            return ModulePermissions::default();
        };
        let access = self.capability(role, module);
        ModulePermissions {
            can_view: access,
            can_edit: access && role != AUDITOR,
            can_delete: access && matches!(role, SYSTEM_ADMIN | PRINCIPAL_INVESTIGATOR),
            can_export: access && role != SITE_USER,
            can_manage_users: role == SYSTEM_ADMIN,
            can_view_audit_trail: matches!(
                role,
                SYSTEM_ADMIN | PRINCIPAL_INVESTIGATOR | DATA_MANAGER | CRA | AUDITOR
            ),
        }
    }
}

impl Default for CapabilityTable {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn study_design_is_limited_to_admins_and_investigators() {
        let table = CapabilityTable::standard();
        assert!(table.capability(SYSTEM_ADMIN, STUDY_DESIGN_MODULE));
        assert!(table.capability(PRINCIPAL_INVESTIGATOR, STUDY_DESIGN_MODULE));
        for role in [STUDY_COORDINATOR, DATA_MANAGER, CRA, SITE_USER, MEDICAL_CODER, AUDITOR] {
            assert!(!table.capability(role, STUDY_DESIGN_MODULE), "{role}");
        }
    }

    #[test]
    fn backend_aliases_resolve_case_insensitively() {
        let table = CapabilityTable::standard();
        assert_eq!(table.resolve_role("admin"), Some(SYSTEM_ADMIN));
        assert_eq!(table.resolve_role(" pi "), Some(PRINCIPAL_INVESTIGATOR));
        assert!(table.capability("PI", STUDY_DESIGN_MODULE));
        assert!(table.capability("user", "subject-management"));
    }

    #[test]
    fn unknown_roles_have_no_capabilities() {
        let table = CapabilityTable::standard();
        assert_eq!(table.resolve_role("INTERN"), None);
        assert!(!table.capability("INTERN", "reports"));
        assert!(!table.category_access("INTERN", "clinical-operations"));
        assert!(table.accessible_modules("INTERN").is_empty());
        assert_eq!(
            table.module_permissions("INTERN", "reports"),
            ModulePermissions::default()
        );
    }

    #[test]
    fn category_access_uses_category_roles() {
        let table = CapabilityTable::standard();
        assert!(table.category_access(DATA_MANAGER, "study-management"));
        assert!(!table.category_access(SITE_USER, "study-management"));
        assert!(!table.category_access(SYSTEM_ADMIN, "no-such-category"));
    }

    #[test]
    fn permissions_follow_role() {
        let table = CapabilityTable::standard();
        let auditor = table.module_permissions(AUDITOR, "audit-trail");
        assert!(auditor.can_view);
        assert!(!auditor.can_edit);
        assert!(auditor.can_view_audit_trail);

        let site = table.module_permissions(SITE_USER, "subject-management");
        assert!(site.can_edit);
        assert!(!site.can_export);
        assert!(!site.can_delete);

        let admin = table.module_permissions("ADMIN", STUDY_DESIGN_MODULE);
        assert!(admin.can_delete);
        assert!(admin.can_manage_users);
    }

    #[test]
    fn custom_table_rejects_dangling_alias() {
        let modules = BTreeMap::from([("REVIEWER".to_string(), owned_set(&["study-design"]))]);
        let aliases = BTreeMap::from([("REV".to_string(), "EDITOR".to_string())]);
        let err = CapabilityTable::new(modules, aliases, BTreeMap::new()).expect_err("dangling");
        assert!(err.to_string().contains("unknown role"));
    }

    #[test]
    fn custom_table_normalizes_role_names() {
        let modules = BTreeMap::from([("reviewer".to_string(), owned_set(&["study-design"]))]);
        let aliases = BTreeMap::from([("rev".to_string(), "Reviewer".to_string())]);
        let table = CapabilityTable::new(modules, aliases, BTreeMap::new()).expect("table");
        assert!(table.capability("REV", STUDY_DESIGN_MODULE));
        assert!(table.capability("reviewer", STUDY_DESIGN_MODULE));
    }
}
