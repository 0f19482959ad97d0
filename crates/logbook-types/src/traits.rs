//! Traits for persistence, mail transport, connectivity, and document conversion.

use crate::{
    AuditEntry, AuditListOptions, DeliveryJob, JobRequest, Notification, Report, ReportStatus,
    Role, Template, TransitionError, TransitionOutcome, TransitionRequest, User,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Reports, their field values, users, templates, and notifications.
///
/// `apply_transition` is the unit of atomicity: the status update, version bump,
/// and audit insert commit together or not at all. Concurrent attempts on the
/// same report are serialized; the loser sees the new status and fails with
/// `TransitionError::InvalidTransition`.
#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn upsert_user(&self, user: &User) -> Result<(), StoreError>;

    async fn get_user(&self, user_id: &str) -> Result<Option<User>, StoreError>;

    /// Profiles for the given ids; unknown ids are absent from the map.
    async fn get_users(&self, user_ids: &[String]) -> Result<HashMap<String, User>, StoreError>;

    /// Everyone holding `role`, ordered by id.
    async fn users_with_role(&self, role: Role) -> Result<Vec<User>, StoreError>;

    async fn add_template(
        &self,
        name: &str,
        file_path: &str,
        uploaded_by: &str,
    ) -> Result<Template, StoreError>;

    async fn get_template(&self, id: i64) -> Result<Option<Template>, StoreError>;

    async fn list_templates(&self) -> Result<Vec<Template>, StoreError>;

    /// New report in `draft`, version 1.
    async fn create_report(
        &self,
        owner_id: &str,
        title: &str,
        template_id: Option<i64>,
    ) -> Result<Report, StoreError>;

    async fn get_report(&self, report_id: i64) -> Result<Option<Report>, StoreError>;

    async fn list_reports_by_status(
        &self,
        status: ReportStatus,
        owner_id: Option<&str>,
    ) -> Result<Vec<Report>, StoreError>;

    /// Insert or overwrite one field value. Only allowed in an editable status; bumps version.
    async fn set_field(
        &self,
        report_id: i64,
        actor_id: &str,
        name: &str,
        value: &str,
    ) -> Result<Report, StoreError>;

    /// Record a spreadsheet the owner filled directly. Same editability rule as `set_field`.
    async fn attach_artifact(
        &self,
        report_id: i64,
        actor_id: &str,
        path: &str,
    ) -> Result<Report, StoreError>;

    /// Validate and apply one transition, writing exactly one audit entry.
    async fn apply_transition(
        &self,
        req: &TransitionRequest,
    ) -> Result<TransitionOutcome, StoreError>;

    /// Mark the final document as generated.
    async fn set_final_pdf(&self, report_id: i64, path: &str) -> Result<(), StoreError>;

    async fn notify(
        &self,
        user_id: &str,
        subject: &str,
        message: &str,
    ) -> Result<Notification, StoreError>;

    /// Newest first.
    async fn list_notifications(
        &self,
        user_id: &str,
        include_read: bool,
    ) -> Result<Vec<Notification>, StoreError>;

    /// Returns false when the id is unknown.
    async fn mark_notification_read(&self, id: i64) -> Result<bool, StoreError>;
}

/// Read side of the append-only audit log. Entries are only written by `apply_transition`.
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// All entries for a report, timestamp ascending.
    async fn timeline(&self, report_id: i64) -> Result<Vec<AuditEntry>, StoreError>;

    /// Filtered listing, newest first.
    async fn list(&self, opts: &AuditListOptions) -> Result<Vec<AuditEntry>, StoreError>;
}

/// Durable outbox rows.
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    /// Insert a pending job unless one already exists for the same request.
    /// Returns the job and whether it was newly created.
    async fn enqueue(&self, req: &JobRequest) -> Result<(DeliveryJob, bool), StoreError>;

    /// Jobs still owed a send: `pending` and `error`, oldest first.
    async fn due_jobs(&self) -> Result<Vec<DeliveryJob>, StoreError>;

    async fn mark_sent(&self, job_id: i64) -> Result<(), StoreError>;

    async fn mark_failed(&self, job_id: i64, error: &str) -> Result<(), StoreError>;

    async fn get_job(&self, job_id: i64) -> Result<Option<DeliveryJob>, StoreError>;

    async fn jobs_for_report(&self, report_id: i64) -> Result<Vec<DeliveryJob>, StoreError>;
}

/// One outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub attachment: Option<PathBuf>,
}

/// Mail submission (SMTP or equivalent).
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError>;
}

/// Cheap reachability check. Fails closed: any error or timeout means offline.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// External spreadsheet -> PDF conversion.
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    /// Convert `input` into `out_dir`, returning the produced PDF path.
    async fn convert_to_pdf(&self, input: &Path, out_dir: &Path) -> Result<PathBuf, DocumentError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("store error: {0}")]
    Other(String),
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("invalid message: {0}")]
    Message(String),
    #[error("attachment {path}: {reason}")]
    Attachment { path: String, reason: String },
    #[error("transport: {0}")]
    Transport(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("template unavailable: {0}")]
    Template(String),
    #[error("document assembly failed: {0}")]
    AssemblyFailed(String),
    #[error("conversion failed: {0}")]
    ConversionFailed(String),
    #[error("signature overlay failed: {0}")]
    Overlay(String),
}
