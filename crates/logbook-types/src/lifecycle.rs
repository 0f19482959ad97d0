//! Workflow actions, audit entries, and the report transition table.

use crate::{Report, ReportStatus, Role, UnknownValue, User};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Action an actor takes against a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Submit,
    Endorse,
    Approve,
    Reject,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Submit => "submit",
            Action::Endorse => "endorse",
            Action::Approve => "approve",
            Action::Reject => "reject",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Action {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submit" => Ok(Action::Submit),
            "endorse" => Ok(Action::Endorse),
            "approve" => Ok(Action::Approve),
            "reject" => Ok(Action::Reject),
            _ => Err(UnknownValue {
                kind: "action",
                value: s.to_string(),
            }),
        }
    }
}

/// One immutable audit record. Never updated or deleted once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub report_id: i64,
    pub actor_id: String,
    pub action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Options for listing audit entries (filter + pagination).
#[derive(Debug, Clone, Default)]
pub struct AuditListOptions {
    pub report_id: Option<i64>,
    pub actor_id: Option<String>,
    /// Return entries with timestamp >= since.
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// A requested status transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub report_id: i64,
    pub actor_id: String,
    pub action: Action,
    #[serde(default)]
    pub comments: Option<String>,
}

impl TransitionRequest {
    pub fn new(report_id: i64, actor_id: impl Into<String>, action: Action) -> Self {
        Self {
            report_id,
            actor_id: actor_id.into(),
            action,
            comments: None,
        }
    }

    pub fn with_comments(mut self, comments: impl Into<String>) -> Self {
        self.comments = Some(comments.into());
        self
    }
}

/// Result of a committed transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub previous: ReportStatus,
    pub report: Report,
    pub entry: AuditEntry,
}

impl TransitionOutcome {
    /// An approve on an already approved report: adds a signature, status unchanged.
    pub fn is_additional_approval(&self) -> bool {
        self.previous == ReportStatus::Approved && self.entry.action == Action::Approve
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("cannot {action} a report in status {from}")]
    InvalidTransition { from: ReportStatus, action: Action },
    #[error("user {0} has no employee code or designation for a digital signature")]
    MissingSignatureInfo(String),
    #[error("comments are required to send a report back for revision")]
    MissingComments,
    #[error("user {actor_id} may not {action} this report")]
    PermissionDenied { actor_id: String, action: Action },
    #[error("report {0} is not editable in status {1}")]
    NotEditable(i64, ReportStatus),
}

/// Decide the status `action` moves `report` to when taken by `actor`.
///
/// Checks run in order: legality from the current status, actor role, then the
/// per-action precondition (signature identity for submit, comments for reject).
pub fn plan_transition(
    report: &Report,
    actor: &User,
    action: Action,
    comments: Option<&str>,
) -> Result<ReportStatus, TransitionError> {
    use ReportStatus::*;

    let (next, allowed_role) = match (report.status, action) {
        (Draft | Submitted | NeedsRevision, Action::Submit) => (Submitted, None),
        (Submitted, Action::Endorse) => (Endorsed, Some(Role::Reviewer)),
        (Endorsed | Approved, Action::Approve) => (Approved, Some(Role::Approver)),
        (Submitted, Action::Reject) => (NeedsRevision, Some(Role::Reviewer)),
        (Endorsed, Action::Reject) => (NeedsRevision, Some(Role::Approver)),
        (from, action) => return Err(TransitionError::InvalidTransition { from, action }),
    };

    let permitted = match allowed_role {
        None => actor.user_id == report.user_id,
        Some(role) => actor.role == role,
    };
    if !permitted {
        return Err(TransitionError::PermissionDenied {
            actor_id: actor.user_id.clone(),
            action,
        });
    }

    match action {
        Action::Submit if actor.signature_identity().is_none() => {
            Err(TransitionError::MissingSignatureInfo(actor.user_id.clone()))
        }
        Action::Reject if comments.map(str::trim).unwrap_or("").is_empty() => {
            Err(TransitionError::MissingComments)
        }
        _ => Ok(next),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FieldMap;

    fn report(status: ReportStatus) -> Report {
        let now = Utc::now();
        Report {
            report_id: 1,
            user_id: "owner".to_string(),
            title: "Shift log".to_string(),
            fields: FieldMap::new(),
            status,
            version: 1,
            created_at: now,
            last_modified_at: now,
            last_modified_by: "owner".to_string(),
            artifact_path: None,
            template_id: None,
            final_pdf_path: None,
        }
    }

    fn user(id: &str, role: Role) -> User {
        User {
            user_id: id.to_string(),
            name: id.to_string(),
            role,
            email: format!("{id}@example.com"),
            emp_code: Some("E100".to_string()),
            designation: Some("Lead Dev".to_string()),
        }
    }

    #[test]
    fn table_walk() {
        let owner = user("owner", Role::User);
        let reviewer = user("rev", Role::Reviewer);
        let approver = user("A1", Role::Approver);
        let cases = [
            (ReportStatus::Draft, &owner, Action::Submit, None, ReportStatus::Submitted),
            (ReportStatus::NeedsRevision, &owner, Action::Submit, None, ReportStatus::Submitted),
            (ReportStatus::Submitted, &owner, Action::Submit, None, ReportStatus::Submitted),
            (ReportStatus::Submitted, &reviewer, Action::Endorse, None, ReportStatus::Endorsed),
            (ReportStatus::Endorsed, &approver, Action::Approve, None, ReportStatus::Approved),
            (ReportStatus::Approved, &approver, Action::Approve, None, ReportStatus::Approved),
            (ReportStatus::Submitted, &reviewer, Action::Reject, Some("fix totals"), ReportStatus::NeedsRevision),
            (ReportStatus::Endorsed, &approver, Action::Reject, Some("fix totals"), ReportStatus::NeedsRevision),
        ];
        for (from, actor, action, comments, to) in cases {
            assert_eq!(
                plan_transition(&report(from), actor, action, comments),
                Ok(to),
                "{from} --{action}-->"
            );
        }
    }

    #[test]
    fn illegal_pairs_are_invalid_transitions() {
        let approver = user("A1", Role::Approver);
        let reviewer = user("rev", Role::Reviewer);
        assert_eq!(
            plan_transition(&report(ReportStatus::Draft), &approver, Action::Approve, None),
            Err(TransitionError::InvalidTransition {
                from: ReportStatus::Draft,
                action: Action::Approve
            })
        );
        assert!(matches!(
            plan_transition(&report(ReportStatus::Approved), &reviewer, Action::Reject, Some("x")),
            Err(TransitionError::InvalidTransition { .. })
        ));
        assert!(matches!(
            plan_transition(&report(ReportStatus::Endorsed), &reviewer, Action::Endorse, None),
            Err(TransitionError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn submit_requires_owner_and_signature_identity() {
        let mut owner = user("owner", Role::User);
        owner.emp_code = None;
        assert_eq!(
            plan_transition(&report(ReportStatus::Draft), &owner, Action::Submit, None),
            Err(TransitionError::MissingSignatureInfo("owner".to_string()))
        );
        let stranger = user("other", Role::User);
        assert!(matches!(
            plan_transition(&report(ReportStatus::Draft), &stranger, Action::Submit, None),
            Err(TransitionError::PermissionDenied { .. })
        ));
    }

    #[test]
    fn reject_requires_comments_and_matching_role() {
        let reviewer = user("rev", Role::Reviewer);
        for blank in [None, Some(""), Some("   ")] {
            assert_eq!(
                plan_transition(&report(ReportStatus::Submitted), &reviewer, Action::Reject, blank),
                Err(TransitionError::MissingComments)
            );
        }
        assert!(matches!(
            plan_transition(&report(ReportStatus::Endorsed), &reviewer, Action::Reject, Some("no")),
            Err(TransitionError::PermissionDenied { .. })
        ));
    }
}
