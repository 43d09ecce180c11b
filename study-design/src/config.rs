//! Study design configuration loading
//!
//! Loads configuration from `~/.config/edc/study-design.toml` (or the
//! `EDC_STUDY_DESIGN_CONFIG` env var). Every field has a default, so a
//! missing file is not an error.

use crate::capability::CapabilityTable;
use crate::catalog::AccessPolicy;
use crate::error::{Result, StudyDesignError};
use crate::publish_gate::PublishPolicy;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StudyDesignConfig {
    /// How strictly design phases gate on their predecessors
    #[serde(default)]
    pub access_policy: AccessPolicy,

    #[serde(default)]
    pub publish: PublishConfig,

    #[serde(default)]
    pub store: StoreConfig,

    /// Replaces the standard role table when present
    #[serde(default)]
    pub capabilities: Option<CapabilitiesConfig>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PublishConfig {
    /// Refuse to publish a study whose validation FAILED unless overridden
    #[serde(default)]
    pub block_on_failed_validation: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Path to the SQLite workflow store (`~/` is expanded)
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    dirs::home_dir()
        .map(|h| {
            h.join(".config")
                .join("edc")
                .join("study-design.db")
                .to_string_lossy()
                .into_owned()
        })
        .unwrap_or_else(|| "study-design.db".to_string())
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CapabilitiesConfig {
    /// Role → module ids
    #[serde(default)]
    pub roles: BTreeMap<String, Vec<String>>,

    /// Backend role name → role
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,

    /// Module category → roles allowed to see it
    #[serde(default)]
    pub categories: BTreeMap<String, Vec<String>>,
}

impl CapabilitiesConfig {
    pub fn build(&self) -> Result<CapabilityTable> {
        let to_set = |items: &Vec<String>| items.iter().cloned().collect::<BTreeSet<_>>();
        CapabilityTable::new(
            self.roles
                .iter()
                .map(|(role, modules)| (role.clone(), to_set(modules)))
                .collect(),
            self.aliases.clone(),
            self.categories
                .iter()
                .map(|(category, roles)| (category.clone(), to_set(roles)))
                .collect(),
        )
    }
}

impl StudyDesignConfig {
    /// Environment variable for config path override
    pub const ENV_CONFIG_PATH: &'static str = "EDC_STUDY_DESIGN_CONFIG";

    /// Default config filename
    pub const DEFAULT_CONFIG_FILENAME: &'static str = "study-design.toml";

    /// Load configuration from file
    ///
    /// Resolution order:
    /// 1. `EDC_STUDY_DESIGN_CONFIG` environment variable
    /// 2. `~/.config/edc/study-design.toml`
    ///
    /// If the config file doesn't exist, returns default configuration.
    pub fn load() -> Result<Self> {
        let path = Self::resolve_config_path();

        if !path.exists() {
            tracing::info!(
                path = %path.display(),
                "study design config not found, using defaults"
            );
            return Ok(Self::default());
        }

        Self::load_from_path(&path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            StudyDesignError::config_with_source(
                format!("failed to read config at {}", path.display()),
                e,
            )
        })?;

        Self::parse(&contents)
    }

    /// Parse configuration from TOML string
    pub fn parse(contents: &str) -> Result<Self> {
        let cfg: StudyDesignConfig = toml::from_str(contents)
            .map_err(|e| StudyDesignError::config_with_source("failed to parse config", e))?;

        cfg.validate()?;
        Ok(cfg)
    }

    fn resolve_config_path() -> PathBuf {
        if let Ok(path) = std::env::var(Self::ENV_CONFIG_PATH) {
            return PathBuf::from(path);
        }

        dirs::home_dir()
            .map(|h| {
                h.join(".config")
                    .join("edc")
                    .join(Self::DEFAULT_CONFIG_FILENAME)
            })
            .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_CONFIG_FILENAME))
    }

    fn validate(&self) -> Result<()> {
        if let Some(capabilities) = &self.capabilities {
            // Hard failure on dangling aliases
            capabilities.build()?;

            for (role, modules) in &capabilities.roles {
                if modules.is_empty() {
                    tracing::warn!(role = %role, "role grants no modules");
                }
            }
            if !capabilities
                .roles
                .values()
                .any(|modules| modules.iter().any(|m| m == crate::capability::STUDY_DESIGN_MODULE))
            {
                tracing::warn!("no role can open the study-design module");
            }
        }

        if self.publish.block_on_failed_validation
            && self.access_policy == AccessPolicy::Development
        {
            tracing::warn!(
                "publish hardening is on but phase access uses the development policy"
            );
        }

        if self.store.db_path.trim().is_empty() {
            return Err(StudyDesignError::config("store.db_path must not be empty"));
        }
        Ok(())
    }

    pub fn publish_policy(&self) -> PublishPolicy {
        PublishPolicy {
            block_on_failed_validation: self.publish.block_on_failed_validation,
        }
    }

    pub fn capability_table(&self) -> Result<CapabilityTable> {
        match &self.capabilities {
            Some(capabilities) => capabilities.build(),
            None => Ok(CapabilityTable::standard()),
        }
    }

    /// Get resolved database path (expands ~)
    pub fn resolved_db_path(&self) -> PathBuf {
        let path = &self.store.db_path;
        if let Some(stripped) = path.strip_prefix("~/")
            && let Some(home) = dirs::home_dir()
        {
            return home.join(stripped);
        }
        PathBuf::from(path)
    }
}
