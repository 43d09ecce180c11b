//! Study design error types
//!
//! Reads degrade gracefully inside the components that own them; everything
//! that reaches a caller through this type is a failed write, an illegal
//! transition, or invalid input.

use thiserror::Error;

/// Error category for structured logging and exit-code mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Unknown study, phase, revision or version
    NotFound,
    /// Action attempted from a state that does not allow it
    InvalidTransition,
    /// Publish refused because validation failed and no override was given
    ValidationBlocked,
    /// A store read failed and no degraded path applies
    StoreRead,
    /// A store write failed; surfaced verbatim, never retried
    StoreWrite,
    /// Malformed caller input (labels, percentages, catalogs)
    InvalidInput,
    /// Configuration file or environment misconfigured
    ConfigError,
}

impl ErrorCategory {
    /// Machine-readable code for logging
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::InvalidTransition => "INVALID_TRANSITION",
            Self::ValidationBlocked => "VALIDATION_BLOCKED",
            Self::StoreRead => "STORE_READ_ERROR",
            Self::StoreWrite => "STORE_WRITE_ERROR",
            Self::InvalidInput => "INVALID_INPUT",
            Self::ConfigError => "CONFIG_ERROR",
        }
    }

    /// Whether the caller may retry the same action unchanged
    pub fn retryable(&self) -> bool {
        matches!(self, Self::StoreRead | Self::StoreWrite)
    }
}

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum StudyDesignError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid transition for {entity}: cannot move from {current} to {attempted}")]
    InvalidTransition {
        entity: String,
        current: String,
        attempted: String,
    },

    #[error(
        "revision {revision_id} targets version {target} but version {active} is already active"
    )]
    StaleRevision {
        revision_id: String,
        target: String,
        active: String,
    },

    #[error("publish blocked: {message}")]
    ValidationBlocked { message: String },

    #[error("store read failed: {message}")]
    StoreRead {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("store write failed: {message}")]
    StoreWrite {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("invalid version label '{label}': expected <major>.<minor>")]
    InvalidVersionLabel { label: String },

    #[error("invalid percentage {value}: must be between 0 and 100")]
    InvalidPercentage { value: u32 },

    #[error("invalid amendment: {message}")]
    InvalidAmendment { message: String },

    #[error("invalid phase catalog: {message}")]
    InvalidCatalog { message: String },

    #[error("config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },
}

impl StudyDesignError {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::InvalidTransition { .. } | Self::StaleRevision { .. } => {
                ErrorCategory::InvalidTransition
            }
            Self::ValidationBlocked { .. } => ErrorCategory::ValidationBlocked,
            Self::StoreRead { .. } => ErrorCategory::StoreRead,
            Self::StoreWrite { .. } => ErrorCategory::StoreWrite,
            Self::InvalidVersionLabel { .. }
            | Self::InvalidPercentage { .. }
            | Self::InvalidAmendment { .. }
            | Self::InvalidCatalog { .. } => ErrorCategory::InvalidInput,
            Self::Config { .. } => ErrorCategory::ConfigError,
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn invalid_transition(
        entity: impl Into<String>,
        current: impl Into<String>,
        attempted: impl Into<String>,
    ) -> Self {
        Self::InvalidTransition {
            entity: entity.into(),
            current: current.into(),
            attempted: attempted.into(),
        }
    }

    /// Create a store read error carrying the store's own message
    pub fn store_read(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::StoreRead {
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a store write error carrying the store's own message
    pub fn store_write(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::StoreWrite {
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    pub fn invalid_amendment(message: impl Into<String>) -> Self {
        Self::InvalidAmendment {
            message: message.into(),
        }
    }

    pub fn invalid_catalog(message: impl Into<String>) -> Self {
        Self::InvalidCatalog {
            message: message.into(),
        }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config error with source
    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

pub type Result<T> = std::result::Result<T, StudyDesignError>;
