//! Persistent records: reports, users, templates, delivery jobs, notifications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Status of a report in the approval workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    #[default]
    Draft,
    Submitted,
    /// Approved by the reviewer, waiting for the approver.
    Endorsed,
    /// Final.
    Approved,
    NeedsRevision,
}

impl ReportStatus {
    pub const ALL: [ReportStatus; 5] = [
        ReportStatus::Draft,
        ReportStatus::Submitted,
        ReportStatus::Endorsed,
        ReportStatus::Approved,
        ReportStatus::NeedsRevision,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ReportStatus::Draft => "draft",
            ReportStatus::Submitted => "submitted",
            ReportStatus::Endorsed => "endorsed",
            ReportStatus::Approved => "approved",
            ReportStatus::NeedsRevision => "needs_revision",
        }
    }

    /// Field values may only change while the owner still holds the report.
    pub fn is_editable(self) -> bool {
        matches!(
            self,
            ReportStatus::Draft | ReportStatus::Submitted | ReportStatus::NeedsRevision
        )
    }
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReportStatus {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReportStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| UnknownValue {
                kind: "report status",
                value: s.to_string(),
            })
    }
}

/// A stored string that does not name any variant of the target enum.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownValue {
    pub kind: &'static str,
    pub value: String,
}

/// Field name -> value, ordered by name so that every read yields the same sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldMap(BTreeMap<String, String>);

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(name.into(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FieldMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// A report moving through the workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub report_id: i64,
    /// Owner (the contributor who fills and submits it).
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub fields: FieldMap,
    pub status: ReportStatus,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub last_modified_at: DateTime<Utc>,
    pub last_modified_by: String,
    /// Spreadsheet the owner filled directly instead of using field values.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<i64>,
    /// Set once the final signed PDF has been generated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_pdf_path: Option<String>,
}

/// Role of a user in the approval chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Reviewer,
    Approver,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Reviewer => "reviewer",
            Role::Approver => "approver",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "reviewer" => Ok(Role::Reviewer),
            "approver" => Ok(Role::Approver),
            _ => Err(UnknownValue {
                kind: "role",
                value: s.to_string(),
            }),
        }
    }
}

/// User profile as far as the workflow needs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub name: String,
    pub role: Role,
    pub email: String,
    #[serde(default)]
    pub emp_code: Option<String>,
    #[serde(default)]
    pub designation: Option<String>,
}

impl User {
    /// Employee code and designation, when both are present and non-blank.
    pub fn signature_identity(&self) -> Option<(&str, &str)> {
        let code = self.emp_code.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        let title = self
            .designation
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())?;
        Some((code, title))
    }
}

/// Uploaded spreadsheet template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: i64,
    pub name: String,
    pub file_path: String,
    pub uploaded_by: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Delivery job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Sent,
    Error,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Sent => "sent",
            JobStatus::Error => "error",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "sent" => Ok(JobStatus::Sent),
            "error" => Ok(JobStatus::Error),
            _ => Err(UnknownValue {
                kind: "job status",
                value: s.to_string(),
            }),
        }
    }
}

/// Which message a delivery job carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MailKind {
    /// Submitted; a reviewer should look at it.
    ReviewRequest,
    /// Endorsed; an approver gets the approve / send-back links.
    ApprovalRequest,
    /// Sent back; tells the owner what to fix.
    RevisionRequest,
    /// The signed PDF, attached.
    FinalReport,
}

impl MailKind {
    pub const ALL: [MailKind; 4] = [
        MailKind::ReviewRequest,
        MailKind::ApprovalRequest,
        MailKind::RevisionRequest,
        MailKind::FinalReport,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MailKind::ReviewRequest => "review_request",
            MailKind::ApprovalRequest => "approval_request",
            MailKind::RevisionRequest => "revision_request",
            MailKind::FinalReport => "final_report",
        }
    }
}

impl std::fmt::Display for MailKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MailKind {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MailKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnknownValue {
                kind: "mail kind",
                value: s.to_string(),
            })
    }
}

/// A message to put in the outbox.
///
/// (report, recipient, kind, artifact, audit entry) identifies a job; enqueuing the
/// same request twice yields the existing row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub report_id: i64,
    pub recipient_id: String,
    pub kind: MailKind,
    pub artifact_path: Option<String>,
    /// Transition that triggered a stage mail.
    pub audit_id: Option<i64>,
}

impl JobRequest {
    pub fn final_report(report_id: i64, recipient_id: &str, pdf: &str) -> Self {
        Self {
            report_id,
            recipient_id: recipient_id.to_string(),
            kind: MailKind::FinalReport,
            artifact_path: Some(pdf.to_string()),
            audit_id: None,
        }
    }

    /// A mail announcing the transition recorded as `audit_id`.
    pub fn stage(kind: MailKind, report_id: i64, recipient_id: &str, audit_id: i64) -> Self {
        Self {
            report_id,
            recipient_id: recipient_id.to_string(),
            kind,
            artifact_path: None,
            audit_id: Some(audit_id),
        }
    }
}

/// One durable "send this message to this recipient" record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryJob {
    pub id: i64,
    pub report_id: i64,
    pub recipient_id: String,
    pub kind: MailKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_id: Option<i64>,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub attempts: u32,
    pub queued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
}

/// In-app notification for a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub user_id: String,
    pub subject: String,
    pub message: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}
