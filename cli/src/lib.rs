//! Study Design CLI Commands
//!
//! Operator front end over the workflow engine, backed by the SQLite store.
//!
//! ## Commands
//!
//! - `edc-design study register` - Create a study or reset its status
//! - `edc-design progress show|complete` - Phase progress
//! - `edc-design phase access` - Whether a phase can be opened
//! - `edc-design status|submit|approve|publish` - Publish gate
//! - `edc-design revision request|submit|approve|list` - Protocol amendments
//! - `edc-design versions` - Protocol version history
//! - `edc-design validate` - Aggregate a validation report
//! - `edc-design access` - Role capability lookup
//!
//! ## Exit Codes
//! - 0: Success
//! - 1: Invalid transition, publish blocked, or a FAILED verdict from `validate`
//! - 2: Unknown study/phase/revision or invalid input
//! - 3: Store or configuration failure

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edc_study_design::{
    AmendmentType, Change, CheckStatus, DesignSnapshot, ErrorCategory, ProgressSnapshot,
    Reviewer, SqliteStore, StoreError, StudyDesignConfig, StudyDesignError,
    StudyLifecycleStatus, TransitionOutcome, ValidationCategory, ValidationReport,
    WorkflowEngine,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const EXIT_OK: i32 = 0;
pub const EXIT_REFUSED: i32 = 1;
pub const EXIT_INVALID: i32 = 2;
pub const EXIT_INFRA: i32 = 3;

/// Study design workflow operator tool
#[derive(Debug, Parser)]
#[command(name = "edc-design", version)]
pub struct Cli {
    /// SQLite workflow store (default: `store.db_path` from config)
    #[arg(long, global = true, value_name = "PATH")]
    pub db: Option<PathBuf>,

    /// Config file (default: $EDC_STUDY_DESIGN_CONFIG or ~/.config/edc/study-design.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Output as JSON for automation
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Study records
    #[command(subcommand)]
    Study(StudyCommand),

    /// Phase progress
    #[command(subcommand)]
    Progress(ProgressCommand),

    /// Phase gating
    #[command(subcommand)]
    Phase(PhaseCommand),

    /// Show the publish gate state
    Status(StudyArgs),

    /// DRAFT → PROTOCOL_REVIEW
    Submit(SubmitArgs),

    /// PROTOCOL_REVIEW → APPROVED
    Approve(ApproveArgs),

    /// APPROVED → ACTIVE
    Publish(PublishArgs),

    /// Protocol amendments
    #[command(subcommand)]
    Revision(RevisionCommand),

    /// Protocol version history, newest first
    Versions(StudyArgs),

    /// Aggregate a validation report and print the verdict
    Validate(ReportArgs),

    /// Role capability lookup
    Access(AccessArgs),
}

#[derive(Debug, Args)]
pub struct StudyArgs {
    #[arg(long, value_name = "STUDY_ID")]
    pub study: String,
}

#[derive(Debug, Subcommand)]
pub enum StudyCommand {
    /// Create a study, or reset the status of an existing one
    Register(RegisterArgs),
}

#[derive(Debug, Args)]
pub struct RegisterArgs {
    #[command(flatten)]
    pub study: StudyArgs,

    /// Initial lifecycle status
    #[arg(long, default_value = "DRAFT")]
    pub status: String,
}

#[derive(Debug, Subcommand)]
pub enum ProgressCommand {
    /// Show every phase with its progress and accessibility
    Show(StudyArgs),

    /// Record progress for one phase (100 marks it complete)
    Complete(CompleteArgs),
}

#[derive(Debug, Args)]
pub struct CompleteArgs {
    #[command(flatten)]
    pub study: StudyArgs,

    #[arg(long, value_name = "PHASE_ID")]
    pub phase: String,

    #[arg(long, default_value_t = 100)]
    pub percentage: u8,
}

#[derive(Debug, Subcommand)]
pub enum PhaseCommand {
    /// Whether a phase may be opened under the configured policy
    Access(PhaseAccessArgs),
}

#[derive(Debug, Args)]
pub struct PhaseAccessArgs {
    #[command(flatten)]
    pub study: StudyArgs,

    #[arg(long, value_name = "PHASE_ID")]
    pub phase: String,
}

/// Where the validation report comes from; an empty report passes
#[derive(Debug, Args)]
pub struct ReportArgs {
    /// JSON array of validation categories
    #[arg(long, value_name = "FILE", conflicts_with = "snapshot")]
    pub report: Option<PathBuf>,

    /// JSON design snapshot evaluated with the standard checks
    #[arg(long, value_name = "FILE")]
    pub snapshot: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct SubmitArgs {
    #[command(flatten)]
    pub study: StudyArgs,

    #[command(flatten)]
    pub report: ReportArgs,
}

#[derive(Debug, Args)]
pub struct ApproveArgs {
    #[command(flatten)]
    pub study: StudyArgs,

    /// JSON array of reviewers and their sign-off status
    #[arg(long, value_name = "FILE")]
    pub reviewers: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct PublishArgs {
    #[command(flatten)]
    pub study: StudyArgs,

    #[command(flatten)]
    pub report: ReportArgs,

    /// Publish even if validation FAILED and the policy blocks it
    #[arg(long)]
    pub override_failures: bool,
}

#[derive(Debug, Subcommand)]
pub enum RevisionCommand {
    /// Open a DRAFT revision targeting the next version label
    Request(RequestArgs),

    /// DRAFT → UNDER_REVIEW
    Submit(RevisionArgs),

    /// UNDER_REVIEW → new ACTIVE protocol version
    Approve(RevisionArgs),

    /// Pending revisions of a study
    List(StudyArgs),
}

#[derive(Debug, Args)]
pub struct RequestArgs {
    #[command(flatten)]
    pub study: StudyArgs,

    #[arg(long)]
    pub title: String,

    /// ORIGINAL, ADMINISTRATIVE_CHANGE, MINOR_AMENDMENT or SUBSTANTIAL_AMENDMENT
    #[arg(long = "type", value_name = "TYPE", value_parser = parse_amendment)]
    pub amendment_type: AmendmentType,

    #[arg(long, default_value = "")]
    pub description: String,

    /// JSON array of proposed changes
    #[arg(long, value_name = "FILE")]
    pub changes: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct RevisionArgs {
    #[command(flatten)]
    pub study: StudyArgs,

    #[arg(long, value_name = "REVISION_ID")]
    pub revision: String,
}

#[derive(Debug, Args)]
pub struct AccessArgs {
    #[arg(long)]
    pub role: String,

    #[arg(long, conflicts_with = "category")]
    pub module: Option<String>,

    #[arg(long)]
    pub category: Option<String>,
}

fn parse_amendment(raw: &str) -> std::result::Result<AmendmentType, String> {
    AmendmentType::parse(raw).ok_or_else(|| format!("unknown amendment type '{raw}'"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Execution
// ─────────────────────────────────────────────────────────────────────────────

impl Cli {
    /// Run the command and return the process exit code
    pub async fn run(self) -> i32 {
        match self.execute().await {
            Ok(code) => code,
            Err(err) => {
                let code = exit_code(&err);
                tracing::debug!(exit_code = code, error = ?err, "command failed");
                eprintln!("error: {err:#}");
                code
            }
        }
    }

    async fn execute(&self) -> Result<i32> {
        // Pure commands never touch the store
        match &self.command {
            Command::Validate(args) => return self.validate(args),
            Command::Access(args) => return self.access(args),
            _ => {}
        }

        let config = self.load_config()?;
        let db_path = self
            .db
            .clone()
            .unwrap_or_else(|| config.resolved_db_path());
        let store = Arc::new(SqliteStore::open(&db_path)?);
        let engine = WorkflowEngine::new(Arc::clone(&store)).configure(&config)?;

        match &self.command {
            Command::Study(StudyCommand::Register(args)) => {
                let status = StudyLifecycleStatus::parse(&args.status);
                store.register_study(&args.study.study, &status).await?;
                self.emit(
                    &serde_json::json!({ "studyId": args.study.study, "status": status }),
                    |_| println!("Registered {} as {status}", args.study.study),
                );
            }
            Command::Progress(ProgressCommand::Show(args)) => {
                let snapshot = engine.load_progress(&args.study).await;
                self.emit(&snapshot, print_progress);
            }
            Command::Progress(ProgressCommand::Complete(args)) => {
                let snapshot = engine
                    .mark_phase_complete(&args.study.study, &args.phase, args.percentage)
                    .await?;
                self.emit(&snapshot, print_progress);
            }
            Command::Phase(PhaseCommand::Access(args)) => {
                let accessible = engine
                    .is_phase_accessible(&args.study.study, &args.phase)
                    .await;
                self.emit(
                    &serde_json::json!({
                        "studyId": args.study.study,
                        "phase": args.phase,
                        "accessible": accessible,
                        "policy": engine.access_policy().as_str(),
                    }),
                    |_| {
                        let verdict = if accessible { "accessible" } else { "locked" };
                        println!("{}: {verdict}", args.phase);
                    },
                );
            }
            Command::Status(args) => {
                let gate = engine.publish_state(&args.study).await?;
                self.emit(&gate, |gate| {
                    println!("Status: {} ({})", gate.status, gate.state.as_str());
                    match gate.next_action {
                        Some(action) => println!("Next action: {}", action.as_str()),
                        None => println!("Next action: none"),
                    }
                });
            }
            Command::Submit(args) => {
                let report = load_report(&args.report)?;
                let outcome = engine.submit_for_review(&args.study.study, &report).await?;
                self.emit(&outcome, print_outcome);
            }
            Command::Approve(args) => {
                let reviewers: Vec<Reviewer> = match &args.reviewers {
                    Some(path) => read_json(path)?,
                    None => Vec::new(),
                };
                let outcome = engine.approve(&args.study.study, &reviewers).await?;
                self.emit(&outcome, print_outcome);
            }
            Command::Publish(args) => {
                let report = load_report(&args.report)?;
                let outcome = engine
                    .publish(&args.study.study, &report, args.override_failures)
                    .await?;
                self.emit(&outcome, print_outcome);
            }
            Command::Revision(RevisionCommand::Request(args)) => {
                let proposed_changes: Vec<Change> = match &args.changes {
                    Some(path) => read_json(path)?,
                    None => Vec::new(),
                };
                let request = edc_study_design::RevisionRequest {
                    title: args.title.clone(),
                    description: args.description.clone(),
                    amendment_type: args.amendment_type,
                    proposed_changes,
                };
                let revision = engine.request_revision(&args.study.study, request).await?;
                self.emit(&revision, |r| {
                    println!("Revision {} requested", r.id);
                    println!("  Target version: {}", r.target_version_label);
                    println!("  Impact: {}", r.estimated_impact().as_str());
                    if r.requires_regulatory_approval() {
                        println!("  Requires regulatory approval");
                    }
                });
            }
            Command::Revision(RevisionCommand::Submit(args)) => {
                let revision = engine
                    .submit_revision(&args.study.study, &args.revision)
                    .await?;
                self.emit(&revision, |r| {
                    println!("Revision {} is {}", r.id, r.status.as_str());
                });
            }
            Command::Revision(RevisionCommand::Approve(args)) => {
                let version = engine
                    .approve_revision(&args.study.study, &args.revision)
                    .await?;
                self.emit(&version, |v| {
                    println!("Version {} is now {}", v.version_label, v.status.as_str());
                });
            }
            Command::Revision(RevisionCommand::List(args)) => {
                let revisions = engine.pending_revisions(&args.study).await?;
                self.emit(&revisions, |revisions| {
                    if revisions.is_empty() {
                        println!("No pending revisions");
                    }
                    for r in revisions {
                        println!(
                            "{}  {:<13} {:<22} → {}  {}",
                            r.id,
                            r.status.as_str(),
                            r.amendment_type.as_str(),
                            r.target_version_label,
                            r.title
                        );
                    }
                });
            }
            Command::Versions(args) => {
                let versions = engine.version_history(&args.study).await?;
                self.emit(&versions, |versions| {
                    if versions.is_empty() {
                        println!("No protocol versions");
                    }
                    for v in versions {
                        println!(
                            "{:<6} {:<8} {:<22} {}",
                            v.version_label.to_string(),
                            v.status.as_str(),
                            v.amendment_type.as_str(),
                            v.title
                        );
                    }
                });
            }
            Command::Validate(_) | Command::Access(_) => {}
        }
        Ok(EXIT_OK)
    }

    fn load_config(&self) -> Result<StudyDesignConfig> {
        let config = match &self.config {
            Some(path) => StudyDesignConfig::load_from_path(path)?,
            None => StudyDesignConfig::load()?,
        };
        Ok(config)
    }

    fn validate(&self, args: &ReportArgs) -> Result<i32> {
        let report = load_report(args)?;
        let counts = report.counts();
        if self.json {
            let output = serde_json::json!({
                "overall": report.overall,
                "counts": counts,
                "categories": report.categories,
                "findings": report.findings(),
            });
            print_json(&output);
        } else {
            println!("Overall: {}", report.overall.as_str());
            for category in &report.categories {
                println!("  {:<8} {}", category.status.as_str(), category.category);
            }
            for finding in report.findings() {
                let message = finding.message.as_deref().unwrap_or("");
                println!(
                    "  [{}] {}: {} {message}",
                    finding.status.as_str(),
                    finding.category,
                    finding.check
                );
            }
            println!(
                "{} passed, {} warnings, {} failed",
                counts.passed, counts.warning, counts.failed
            );
        }
        Ok(match report.overall {
            CheckStatus::Failed => EXIT_REFUSED,
            CheckStatus::Passed | CheckStatus::Warning => EXIT_OK,
        })
    }

    fn access(&self, args: &AccessArgs) -> Result<i32> {
        let table = self.load_config()?.capability_table()?;
        let resolved = table.resolve_role(&args.role);
        let output = match (&args.module, &args.category) {
            (Some(module), _) => serde_json::json!({
                "role": args.role,
                "resolvedRole": resolved,
                "module": module,
                "allowed": table.capability(&args.role, module),
                "permissions": table.module_permissions(&args.role, module),
            }),
            (None, Some(category)) => serde_json::json!({
                "role": args.role,
                "resolvedRole": resolved,
                "category": category,
                "allowed": table.category_access(&args.role, category),
            }),
            (None, None) => serde_json::json!({
                "role": args.role,
                "resolvedRole": resolved,
                "modules": table.accessible_modules(&args.role),
            }),
        };

        if self.json {
            print_json(&output);
        } else {
            let role = resolved.unwrap_or("unknown role");
            match (&args.module, &args.category, output.get("allowed")) {
                (Some(target), _, Some(allowed)) | (None, Some(target), Some(allowed)) => {
                    let verdict = if allowed.as_bool() == Some(true) {
                        "allowed"
                    } else {
                        "denied"
                    };
                    println!("{} ({role}) → {target}: {verdict}", args.role);
                }
                _ => {
                    println!("{} ({role}) modules:", args.role);
                    for module in table.accessible_modules(&args.role) {
                        println!("  {module}");
                    }
                }
            }
        }
        Ok(EXIT_OK)
    }

    fn emit<T: Serialize>(&self, value: &T, human: impl FnOnce(&T)) {
        if self.json {
            print_json(value);
        } else {
            human(value);
        }
    }
}

/// Map a command failure onto the documented exit codes
pub fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(err) = err.downcast_ref::<StudyDesignError>() {
        return match err.category() {
            ErrorCategory::InvalidTransition | ErrorCategory::ValidationBlocked => EXIT_REFUSED,
            ErrorCategory::NotFound | ErrorCategory::InvalidInput => EXIT_INVALID,
            ErrorCategory::StoreRead | ErrorCategory::StoreWrite | ErrorCategory::ConfigError => {
                EXIT_INFRA
            }
        };
    }
    if err.downcast_ref::<StoreError>().is_some() {
        return EXIT_INFRA;
    }
    if err.downcast_ref::<serde_json::Error>().is_some()
        || err.downcast_ref::<std::io::Error>().is_some()
    {
        return EXIT_INVALID;
    }
    EXIT_INFRA
}

// ─────────────────────────────────────────────────────────────────────────────
// Input files
// ─────────────────────────────────────────────────────────────────────────────

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("failed to parse {}", path.display()))
}

fn load_report(args: &ReportArgs) -> Result<ValidationReport> {
    if let Some(path) = &args.report {
        let categories: Vec<ValidationCategory> = read_json(path)?;
        return Ok(ValidationReport::from_categories(categories));
    }
    if let Some(path) = &args.snapshot {
        let snapshot: DesignSnapshot = read_json(path)?;
        return Ok(snapshot.validate());
    }
    Ok(ValidationReport::default())
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

fn print_progress(snapshot: &ProgressSnapshot) {
    println!(
        "Study {}: {}% complete (source: {})",
        snapshot.study_id,
        snapshot.overall_completion,
        snapshot.source.as_str()
    );
    for view in &snapshot.phases {
        let mark = if view.progress.completed { "x" } else { " " };
        let lock = if view.accessible { "" } else { "  locked" };
        println!(
            "  [{mark}] {:<20} {:<22} {:>3}%{lock}",
            view.phase.id, view.phase.name, view.progress.percentage
        );
    }
}

fn print_outcome(outcome: &TransitionOutcome) {
    println!(
        "{}: {} → {} ({})",
        outcome.action.as_str(),
        outcome.previous,
        outcome.status,
        outcome.state.as_str()
    );
    if let Some(warning) = &outcome.validation_warning {
        println!("Validation {}; proceeding anyway:", warning.overall.as_str());
        for check in warning.failed_checks.iter().chain(&warning.warning_checks) {
            println!("  - {check}");
        }
    }
    if let Some(advisory) = &outcome.reviewer_advisory {
        if !advisory.pending.is_empty() {
            println!("Reviewers pending: {}", advisory.pending.join(", "));
        }
        if !advisory.changes_requested.is_empty() {
            println!(
                "Reviewers requesting changes: {}",
                advisory.changes_requested.join(", ")
            );
        }
    }
    if let Some(prompt) = &outcome.prompt {
        println!("{}", prompt.message);
    }
    match outcome.next_action {
        Some(action) => println!("Next action: {}", action.as_str()),
        None => println!("Next action: none"),
    }
}
