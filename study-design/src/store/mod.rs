//! Persistence ports
//!
//! The engine never enforces cross-record invariants itself. Anything that
//! must be atomic (single ACTIVE version, status compare-and-set) is the
//! adapter's job.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use memory::StoreFaults;
pub use sqlite::SqliteStore;

use crate::types::{
    PendingRevision, PhaseProgress, ProgressMap, ProtocolVersion, StudyLifecycleStatus,
};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Compare-and-set lost to a concurrent writer
    #[error("status conflict for study {study_id}: expected {expected}, found {actual}")]
    Conflict {
        study_id: String,
        expected: String,
        actual: String,
    },

    #[error("{entity} not found: {id}")]
    Missing { entity: &'static str, id: String },

    #[error("{message}")]
    Backend {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("injected fault: {0}")]
    Injected(String),
}

impl StoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            source: None,
        }
    }

    pub fn backend_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Backend {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Per-study phase progress
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// `Ok(None)` when the study has never been initialized
    async fn get_progress(&self, study_id: &str) -> StoreResult<Option<ProgressMap>>;

    /// Upsert a single phase record
    async fn put_progress(
        &self,
        study_id: &str,
        phase_id: &str,
        progress: &PhaseProgress,
    ) -> StoreResult<()>;

    /// Insert records for phases that have none; existing records are kept
    async fn initialize_progress(&self, study_id: &str, defaults: &ProgressMap)
    -> StoreResult<()>;
}

/// Authoritative study lifecycle status
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// `Ok(None)` for an unknown study
    async fn get_status(&self, study_id: &str) -> StoreResult<Option<StudyLifecycleStatus>>;

    /// Write `next` only if the stored status still equals `expected`.
    ///
    /// Fails with [`StoreError::Conflict`] otherwise.
    async fn set_status(
        &self,
        study_id: &str,
        expected: &StudyLifecycleStatus,
        next: &StudyLifecycleStatus,
    ) -> StoreResult<()>;
}

/// Protocol versions and pending revisions
#[async_trait]
pub trait VersionStore: Send + Sync {
    async fn list_versions(&self, study_id: &str) -> StoreResult<Vec<ProtocolVersion>>;

    /// Append a version. When it is ACTIVE, any previously ACTIVE version of
    /// the study is archived in the same atomic write.
    async fn create_version(&self, study_id: &str, version: &ProtocolVersion) -> StoreResult<()>;

    /// Flip one version to ARCHIVED
    async fn archive_version(&self, study_id: &str, version_id: &str) -> StoreResult<()>;

    async fn list_pending_revisions(&self, study_id: &str) -> StoreResult<Vec<PendingRevision>>;

    async fn upsert_pending_revision(
        &self,
        study_id: &str,
        revision: &PendingRevision,
    ) -> StoreResult<()>;

    async fn remove_pending_revision(&self, study_id: &str, revision_id: &str)
    -> StoreResult<()>;
}
