//! SQLite store adapter
//!
//! Single-file local persistence for the operator CLI. Activation of a new
//! protocol version runs in one transaction together with archiving the
//! previous ACTIVE row, and a partial unique index backs the invariant.

use super::{ProgressStore, StatusStore, StoreError, StoreResult, VersionStore};
use crate::types::{
    AmendmentType, Change, PendingRevision, PhaseProgress, ProgressMap, ProtocolVersion,
    RevisionStatus, StudyLifecycleStatus, VersionStatus,
};
use crate::version::VersionLabel;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use tokio::sync::Mutex;

/// Embedded schema SQL from STUDY_DESIGN_SCHEMA.sql
const SCHEMA_SQL: &str = include_str!("../../STUDY_DESIGN_SCHEMA.sql");

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and apply the schema
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::backend_with_source(
                    format!("failed to create db directory: {}", parent.display()),
                    e,
                )
            })?;
        }

        let conn = Connection::open(path).map_err(|e| {
            StoreError::backend_with_source(format!("failed to open db at {}", path.display()), e)
        })?;
        Self::apply_schema(&conn)?;

        tracing::debug!(path = %path.display(), "study design store initialized");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Connect to an in-memory database
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::backend_with_source("failed to open in-memory db", e))?;
        Self::apply_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn apply_schema(conn: &Connection) -> StoreResult<()> {
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| StoreError::backend_with_source("failed to apply schema", e))
    }

    /// Create a study record, or reset the status of an existing one
    pub async fn register_study(
        &self,
        study_id: &str,
        status: &StudyLifecycleStatus,
    ) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO studies (study_id, status, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(study_id) DO UPDATE SET
                status = ?2,
                updated_at = ?3
            "#,
            params![study_id, status.as_str(), Utc::now().to_rfc3339()],
        )
        .map_err(|e| StoreError::backend_with_source("failed to register study", e))?;
        tracing::debug!(study_id, status = %status, "registered study");
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row decoding
// ─────────────────────────────────────────────────────────────────────────────

fn parse_timestamp(field: &str, raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::backend_with_source(format!("bad {field} timestamp '{raw}'"), e))
}

fn parse_optional_timestamp(
    field: &str,
    raw: Option<String>,
) -> StoreResult<Option<DateTime<Utc>>> {
    raw.map(|s| parse_timestamp(field, &s)).transpose()
}

fn parse_label(raw: &str) -> StoreResult<VersionLabel> {
    raw.parse()
        .map_err(|e| StoreError::backend_with_source(format!("bad version label '{raw}'"), e))
}

fn parse_amendment(raw: &str) -> StoreResult<AmendmentType> {
    AmendmentType::parse(raw)
        .ok_or_else(|| StoreError::backend(format!("unknown amendment type '{raw}'")))
}

fn parse_changes(raw: &str) -> StoreResult<Vec<Change>> {
    serde_json::from_str(raw)
        .map_err(|e| StoreError::backend_with_source("failed to decode change list", e))
}

fn encode_changes(changes: &[Change]) -> StoreResult<String> {
    serde_json::to_string(changes)
        .map_err(|e| StoreError::backend_with_source("failed to encode change list", e))
}

struct VersionRow {
    id: String,
    label: String,
    status: String,
    amendment_type: String,
    title: String,
    summary: String,
    created_at: String,
    approved_at: Option<String>,
    published_at: Option<String>,
    changes_json: String,
}

impl VersionRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            label: row.get(1)?,
            status: row.get(2)?,
            amendment_type: row.get(3)?,
            title: row.get(4)?,
            summary: row.get(5)?,
            created_at: row.get(6)?,
            approved_at: row.get(7)?,
            published_at: row.get(8)?,
            changes_json: row.get(9)?,
        })
    }

    fn decode(self) -> StoreResult<ProtocolVersion> {
        Ok(ProtocolVersion {
            version_label: parse_label(&self.label)?,
            status: VersionStatus::parse(&self.status).ok_or_else(|| {
                StoreError::backend(format!("unknown version status '{}'", self.status))
            })?,
            amendment_type: parse_amendment(&self.amendment_type)?,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            approved_at: parse_optional_timestamp("approved_at", self.approved_at)?,
            published_at: parse_optional_timestamp("published_at", self.published_at)?,
            changes: parse_changes(&self.changes_json)?,
            id: self.id,
            title: self.title,
            summary: self.summary,
        })
    }
}

struct RevisionRow {
    id: String,
    title: String,
    description: String,
    amendment_type: String,
    status: String,
    target: String,
    changes_json: String,
    requested_at: String,
}

impl RevisionRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            amendment_type: row.get(3)?,
            status: row.get(4)?,
            target: row.get(5)?,
            changes_json: row.get(6)?,
            requested_at: row.get(7)?,
        })
    }

    fn decode(self) -> StoreResult<PendingRevision> {
        Ok(PendingRevision {
            amendment_type: parse_amendment(&self.amendment_type)?,
            status: RevisionStatus::parse(&self.status).ok_or_else(|| {
                StoreError::backend(format!("unknown revision status '{}'", self.status))
            })?,
            target_version_label: parse_label(&self.target)?,
            proposed_changes: parse_changes(&self.changes_json)?,
            requested_at: parse_timestamp("requested_at", &self.requested_at)?,
            id: self.id,
            title: self.title,
            description: self.description,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Progress
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl ProgressStore for SqliteStore {
    async fn get_progress(&self, study_id: &str) -> StoreResult<Option<ProgressMap>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT phase_id, completed, percentage, last_updated
                FROM phase_progress
                WHERE study_id = ?1
                "#,
            )
            .map_err(|e| StoreError::backend_with_source("failed to prepare progress query", e))?;
        let rows = stmt
            .query_map(params![study_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, bool>(1)?,
                    row.get::<_, u8>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| StoreError::backend_with_source("failed to read progress", e))?;

        if rows.is_empty() {
            return Ok(None);
        }

        let mut progress = ProgressMap::new();
        for (phase_id, completed, percentage, last_updated) in rows {
            progress.insert(
                phase_id,
                PhaseProgress {
                    completed,
                    percentage,
                    last_updated: parse_optional_timestamp("last_updated", last_updated)?,
                },
            );
        }
        Ok(Some(progress))
    }

    async fn put_progress(
        &self,
        study_id: &str,
        phase_id: &str,
        progress: &PhaseProgress,
    ) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO phase_progress (study_id, phase_id, completed, percentage, last_updated)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(study_id, phase_id) DO UPDATE SET
                completed = ?3,
                percentage = ?4,
                last_updated = ?5
            "#,
            params![
                study_id,
                phase_id,
                progress.completed,
                progress.percentage,
                progress.last_updated.map(|t| t.to_rfc3339())
            ],
        )
        .map_err(|e| StoreError::backend_with_source("failed to write phase progress", e))?;
        Ok(())
    }

    async fn initialize_progress(
        &self,
        study_id: &str,
        defaults: &ProgressMap,
    ) -> StoreResult<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::backend_with_source("failed to begin transaction", e))?;
        for (phase_id, progress) in defaults {
            tx.execute(
                r#"
                INSERT OR IGNORE INTO phase_progress
                    (study_id, phase_id, completed, percentage, last_updated)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    study_id,
                    phase_id,
                    progress.completed,
                    progress.percentage,
                    progress.last_updated.map(|t| t.to_rfc3339())
                ],
            )
            .map_err(|e| StoreError::backend_with_source("failed to initialize progress", e))?;
        }
        tx.commit()
            .map_err(|e| StoreError::backend_with_source("failed to commit progress init", e))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Status
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl StatusStore for SqliteStore {
    async fn get_status(&self, study_id: &str) -> StoreResult<Option<StudyLifecycleStatus>> {
        let conn = self.conn.lock().await;
        let status = conn
            .query_row(
                "SELECT status FROM studies WHERE study_id = ?1",
                params![study_id],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(|e| StoreError::backend_with_source("failed to read study status", e))?;
        Ok(status.map(StudyLifecycleStatus::from))
    }

    async fn set_status(
        &self,
        study_id: &str,
        expected: &StudyLifecycleStatus,
        next: &StudyLifecycleStatus,
    ) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        let updated = conn
            .execute(
                r#"
                UPDATE studies
                SET status = ?3, updated_at = ?4
                WHERE study_id = ?1 AND UPPER(TRIM(status)) = UPPER(TRIM(?2))
                "#,
                params![
                    study_id,
                    expected.as_str(),
                    next.as_str(),
                    Utc::now().to_rfc3339()
                ],
            )
            .map_err(|e| StoreError::backend_with_source("failed to write study status", e))?;
        if updated == 1 {
            return Ok(());
        }

        let actual = conn
            .query_row(
                "SELECT status FROM studies WHERE study_id = ?1",
                params![study_id],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(|e| StoreError::backend_with_source("failed to read study status", e))?;
        match actual {
            Some(actual) => Err(StoreError::Conflict {
                study_id: study_id.to_string(),
                expected: expected.to_string(),
                actual,
            }),
            None => Err(StoreError::Missing {
                entity: "study",
                id: study_id.to_string(),
            }),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Versions and revisions
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl VersionStore for SqliteStore {
    async fn list_versions(&self, study_id: &str) -> StoreResult<Vec<ProtocolVersion>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT id, version_label, status, amendment_type, title, summary,
                       created_at, approved_at, published_at, changes_json
                FROM protocol_versions
                WHERE study_id = ?1
                ORDER BY major, minor
                "#,
            )
            .map_err(|e| StoreError::backend_with_source("failed to prepare version query", e))?;
        let rows = stmt
            .query_map(params![study_id], VersionRow::read)
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| StoreError::backend_with_source("failed to read versions", e))?;
        rows.into_iter().map(VersionRow::decode).collect()
    }

    async fn create_version(&self, study_id: &str, version: &ProtocolVersion) -> StoreResult<()> {
        let changes_json = encode_changes(&version.changes)?;
        let mut conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::backend_with_source("failed to begin transaction", e))?;

        if version.status == VersionStatus::Active {
            let archived = tx
                .execute(
                    r#"
                    UPDATE protocol_versions
                    SET status = 'ARCHIVED'
                    WHERE study_id = ?1 AND status = 'ACTIVE'
                    "#,
                    params![study_id],
                )
                .map_err(|e| {
                    StoreError::backend_with_source("failed to archive active version", e)
                })?;
            tracing::debug!(study_id, archived, "archived previous active version");
        }

        tx.execute(
            r#"
            INSERT INTO protocol_versions
                (id, study_id, version_label, major, minor, status, amendment_type,
                 title, summary, created_at, approved_at, published_at, changes_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                version.id,
                study_id,
                version.version_label.to_string(),
                version.version_label.major,
                version.version_label.minor,
                version.status.as_str(),
                version.amendment_type.as_str(),
                version.title,
                version.summary,
                version.created_at.to_rfc3339(),
                version.approved_at.map(|t| t.to_rfc3339()),
                version.published_at.map(|t| t.to_rfc3339()),
                changes_json
            ],
        )
        .map_err(|e| StoreError::backend_with_source("failed to insert version", e))?;

        tx.commit()
            .map_err(|e| StoreError::backend_with_source("failed to commit version", e))
    }

    async fn archive_version(&self, study_id: &str, version_id: &str) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        let updated = conn
            .execute(
                r#"
                UPDATE protocol_versions
                SET status = 'ARCHIVED'
                WHERE study_id = ?1 AND id = ?2
                "#,
                params![study_id, version_id],
            )
            .map_err(|e| StoreError::backend_with_source("failed to archive version", e))?;
        if updated == 0 {
            return Err(StoreError::Missing {
                entity: "version",
                id: version_id.to_string(),
            });
        }
        Ok(())
    }

    async fn list_pending_revisions(&self, study_id: &str) -> StoreResult<Vec<PendingRevision>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT id, title, description, amendment_type, status,
                       target_version_label, proposed_changes_json, requested_at
                FROM pending_revisions
                WHERE study_id = ?1
                ORDER BY requested_at, id
                "#,
            )
            .map_err(|e| StoreError::backend_with_source("failed to prepare revision query", e))?;
        let rows = stmt
            .query_map(params![study_id], RevisionRow::read)
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| StoreError::backend_with_source("failed to read revisions", e))?;
        rows.into_iter().map(RevisionRow::decode).collect()
    }

    async fn upsert_pending_revision(
        &self,
        study_id: &str,
        revision: &PendingRevision,
    ) -> StoreResult<()> {
        let changes_json = encode_changes(&revision.proposed_changes)?;
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO pending_revisions
                (id, study_id, title, description, amendment_type, status,
                 target_version_label, proposed_changes_json, requested_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                title = ?3,
                description = ?4,
                amendment_type = ?5,
                status = ?6,
                target_version_label = ?7,
                proposed_changes_json = ?8
            "#,
            params![
                revision.id,
                study_id,
                revision.title,
                revision.description,
                revision.amendment_type.as_str(),
                revision.status.as_str(),
                revision.target_version_label.to_string(),
                changes_json,
                revision.requested_at.to_rfc3339()
            ],
        )
        .map_err(|e| StoreError::backend_with_source("failed to write revision", e))?;
        Ok(())
    }

    async fn remove_pending_revision(
        &self,
        study_id: &str,
        revision_id: &str,
    ) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM pending_revisions WHERE study_id = ?1 AND id = ?2",
            params![study_id, revision_id],
        )
        .map_err(|e| StoreError::backend_with_source("failed to remove revision", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ImpactLevel;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn version(id: &str, label: &str, status: VersionStatus) -> ProtocolVersion {
        ProtocolVersion {
            id: id.to_string(),
            version_label: label.parse().expect("label"),
            status,
            amendment_type: AmendmentType::MinorAmendment,
            title: format!("Version {label}"),
            summary: String::new(),
            created_at: Utc::now(),
            approved_at: Some(Utc::now()),
            published_at: None,
            changes: vec![Change {
                section: "Schedule".to_string(),
                description: "Add week 12 visit".to_string(),
                justification: "Safety follow-up".to_string(),
                impact_level: ImpactLevel::Medium,
            }],
        }
    }

    #[tokio::test]
    async fn progress_round_trips_through_disk() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("nested").join("design.db");
        let store = SqliteStore::open(&path).expect("open");

        assert!(store.get_progress("s1").await.expect("read").is_none());
        let done = PhaseProgress::complete(Utc::now());
        store
            .put_progress("s1", "basic-info", &done)
            .await
            .expect("write");
        drop(store);

        let reopened = SqliteStore::open(&path).expect("reopen");
        let progress = reopened
            .get_progress("s1")
            .await
            .expect("read")
            .expect("present");
        let stored = progress.get("basic-info").expect("basic-info");
        assert!(stored.completed);
        assert_eq!(stored.percentage, 100);
    }

    #[tokio::test]
    async fn create_active_version_archives_previous_in_one_write() {
        let store = SqliteStore::open_in_memory().expect("open");
        store
            .create_version("s1", &version("v1", "1.0", VersionStatus::Active))
            .await
            .expect("v1");
        store
            .create_version("s1", &version("v2", "1.1", VersionStatus::Active))
            .await
            .expect("v2");

        let versions = store.list_versions("s1").await.expect("list");
        let statuses: Vec<(String, VersionStatus)> = versions
            .iter()
            .map(|v| (v.version_label.to_string(), v.status))
            .collect();
        assert_eq!(
            statuses,
            vec![
                ("1.0".to_string(), VersionStatus::Archived),
                ("1.1".to_string(), VersionStatus::Active),
            ]
        );
        assert_eq!(versions[1].changes.len(), 1);
    }

    #[tokio::test]
    async fn versions_are_ordered_numerically() {
        let store = SqliteStore::open_in_memory().expect("open");
        for (id, label) in [("a", "2.10"), ("b", "2.9"), ("c", "1.0")] {
            store
                .create_version("s1", &version(id, label, VersionStatus::Archived))
                .await
                .expect("create");
        }
        let labels: Vec<String> = store
            .list_versions("s1")
            .await
            .expect("list")
            .iter()
            .map(|v| v.version_label.to_string())
            .collect();
        assert_eq!(labels, vec!["1.0", "2.9", "2.10"]);
    }

    #[tokio::test]
    async fn status_compare_and_set() {
        let store = SqliteStore::open_in_memory().expect("open");
        let err = store
            .set_status(
                "missing",
                &StudyLifecycleStatus::Draft,
                &StudyLifecycleStatus::ProtocolReview,
            )
            .await
            .expect_err("unknown study");
        assert!(matches!(err, StoreError::Missing { .. }));

        store
            .register_study("s1", &StudyLifecycleStatus::Draft)
            .await
            .expect("register");
        let err = store
            .set_status(
                "s1",
                &StudyLifecycleStatus::Approved,
                &StudyLifecycleStatus::Active,
            )
            .await
            .expect_err("stale");
        assert!(matches!(err, StoreError::Conflict { ref actual, .. } if actual == "DRAFT"));

        store
            .set_status(
                "s1",
                &StudyLifecycleStatus::Draft,
                &StudyLifecycleStatus::ProtocolReview,
            )
            .await
            .expect("cas");
        assert_eq!(
            store.get_status("s1").await.expect("read"),
            Some(StudyLifecycleStatus::ProtocolReview)
        );
    }

    #[tokio::test]
    async fn status_compare_ignores_case_of_stored_code() {
        let store = SqliteStore::open_in_memory().expect("open");
        store
            .conn
            .lock()
            .await
            .execute(
                "INSERT INTO studies (study_id, status, updated_at) VALUES ('s1', ' draft', ?1)",
                params![Utc::now().to_rfc3339()],
            )
            .expect("seed");
        let current = store.get_status("s1").await.expect("read").expect("present");
        assert_eq!(current, StudyLifecycleStatus::Draft);

        store
            .set_status("s1", &current, &StudyLifecycleStatus::ProtocolReview)
            .await
            .expect("cas on lowercase row");
        assert_eq!(
            store.get_status("s1").await.expect("read"),
            Some(StudyLifecycleStatus::ProtocolReview)
        );
    }

    #[tokio::test]
    async fn pending_revision_upsert_and_remove() {
        let store = SqliteStore::open_in_memory().expect("open");
        let mut revision = PendingRevision {
            id: "r1".to_string(),
            title: "Extend enrollment".to_string(),
            description: String::new(),
            amendment_type: AmendmentType::AdministrativeChange,
            status: RevisionStatus::Draft,
            target_version_label: VersionLabel::new(1, 1),
            proposed_changes: Vec::new(),
            requested_at: Utc::now(),
        };
        store
            .upsert_pending_revision("s1", &revision)
            .await
            .expect("insert");
        revision.status = RevisionStatus::UnderReview;
        store
            .upsert_pending_revision("s1", &revision)
            .await
            .expect("update");

        let pending = store.list_pending_revisions("s1").await.expect("list");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].status, RevisionStatus::UnderReview);

        store
            .remove_pending_revision("s1", "r1")
            .await
            .expect("remove");
        assert!(store.list_pending_revisions("s1").await.expect("list").is_empty());
    }
}
