//! Study Design Workflow Engine
//!
//! Decision logic behind an EDC study-design workflow:
//! - gates access to design phases on completion of earlier phases
//! - derives protocol version labels and classifies amendment impact
//! - aggregates validation checks into a publish-readiness verdict that
//!   drives the study lifecycle (DRAFT → PROTOCOL_REVIEW → APPROVED → ACTIVE)
//!
//! Persistence is reached only through the store ports in [`store`]; the
//! crate ships an in-memory adapter and a SQLite adapter.

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod capability;
pub mod catalog;
pub mod checks;
pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod progress;
pub mod publish_gate;
pub mod store;
pub mod types;
pub mod validation;
pub mod version;

pub use capability::{CapabilityTable, ModulePermissions};
pub use catalog::{AccessPolicy, PhaseCatalog};
pub use checks::DesignSnapshot;
pub use config::StudyDesignConfig;
pub use engine::{PhaseView, ProgressSnapshot, WorkflowEngine};
pub use error::{ErrorCategory, Result, StudyDesignError};
pub use lifecycle::{RevisionRequest, VersionLifecycle};
pub use progress::{PhaseProgressTracker, ProgressSource};
pub use publish_gate::{
    ConfirmationPrompt, GateAction, GateSnapshot, PromptSeverity, PublishGate, PublishPolicy,
    PublishState, ReviewerAdvisory, TransitionOutcome, ValidationBlockedWarning,
};
pub use store::{
    MemoryStore, ProgressStore, SqliteStore, StatusStore, StoreError, StoreFaults, VersionStore,
};
pub use types::{
    AmendmentType, Change, Check, CheckStatus, ImpactLevel, PendingRevision, Phase,
    PhaseCategory, PhaseProgress, PhaseStatus, ProgressMap, ProtocolVersion, RevisionStatus,
    Reviewer, ReviewerStatus, StudyLifecycleStatus, VersionStatus,
};
pub use validation::{ValidationCategory, ValidationReport};
pub use version::{VersionLabel, next_version_label};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
