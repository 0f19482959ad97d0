//! WorkflowEngine: the public face of the report state machine.

use crate::WorkflowError;
use logbook_delivery::{DeliveryQueue, Dispatch};
use logbook_docs::{DocumentPipeline, PipelineRequest};
use logbook_types::{
    derive_signatures, Action, AuditEntry, AuditLog, DeliveryJob, DocumentError, JobRequest,
    JobStatus, MailKind, Notification, Report, ReportStatus, ReportStore, Role, Signature,
    StorageConfig, Template, TransitionOutcome, TransitionRequest,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// What became of the final document on an approve.
#[derive(Debug)]
pub enum DocumentStatus {
    /// Produced by this call.
    Generated(PathBuf),
    /// An earlier approval already produced it; this call only added a signature.
    AlreadyGenerated(PathBuf),
    /// Generation failed. The approval stays committed; the next approve retries.
    Failed(DocumentError),
}

#[derive(Debug)]
pub struct ApprovalReceipt {
    pub outcome: TransitionOutcome,
    pub document: DocumentStatus,
    /// One entry per recipient handed to the delivery queue by this call.
    pub deliveries: Vec<(DeliveryJob, Dispatch)>,
}

/// Transitions, field editing, and the approval pipeline.
pub struct WorkflowEngine {
    store: Arc<dyn ReportStore>,
    audit: Arc<dyn AuditLog>,
    documents: DocumentPipeline,
    delivery: Arc<DeliveryQueue>,
    storage: StorageConfig,
    /// Serializes document generation so concurrent first approvals produce one PDF.
    generating: Mutex<()>,
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn ReportStore>,
        audit: Arc<dyn AuditLog>,
        documents: DocumentPipeline,
        delivery: Arc<DeliveryQueue>,
        storage: StorageConfig,
    ) -> Self {
        Self {
            store,
            audit,
            documents,
            delivery,
            storage,
            generating: Mutex::new(()),
        }
    }

    pub fn delivery(&self) -> &Arc<DeliveryQueue> {
        &self.delivery
    }

    pub async fn create_report(
        &self,
        owner_id: &str,
        title: &str,
        template_id: Option<i64>,
    ) -> Result<Report, WorkflowError> {
        if self.store.get_user(owner_id).await?.is_none() {
            return Err(WorkflowError::NotFound(format!("user {}", owner_id)));
        }
        if let Some(id) = template_id {
            if self.store.get_template(id).await?.is_none() {
                return Err(WorkflowError::NotFound(format!("template {}", id)));
            }
        }
        let report = self.store.create_report(owner_id, title, template_id).await?;
        tracing::info!(report_id = report.report_id, owner = %owner_id, "report created");
        Ok(report)
    }

    pub async fn add_template(
        &self,
        name: &str,
        file_path: &str,
        uploaded_by: &str,
    ) -> Result<Template, WorkflowError> {
        Ok(self.store.add_template(name, file_path, uploaded_by).await?)
    }

    pub async fn list_templates(&self) -> Result<Vec<Template>, WorkflowError> {
        Ok(self.store.list_templates().await?)
    }

    pub async fn get_report(&self, report_id: i64) -> Result<Report, WorkflowError> {
        self.store
            .get_report(report_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("report {}", report_id)))
    }

    pub async fn list_reports(
        &self,
        status: ReportStatus,
        owner_id: Option<&str>,
    ) -> Result<Vec<Report>, WorkflowError> {
        Ok(self.store.list_reports_by_status(status, owner_id).await?)
    }

    /// Only the owner may edit, and only while the report is editable.
    pub async fn set_field(
        &self,
        report_id: i64,
        actor_id: &str,
        name: &str,
        value: &str,
    ) -> Result<Report, WorkflowError> {
        self.require_owner(report_id, actor_id, Action::Submit).await?;
        Ok(self.store.set_field(report_id, actor_id, name, value).await?)
    }

    pub async fn attach_artifact(
        &self,
        report_id: i64,
        actor_id: &str,
        path: &str,
    ) -> Result<Report, WorkflowError> {
        self.require_owner(report_id, actor_id, Action::Submit).await?;
        Ok(self.store.attach_artifact(report_id, actor_id, path).await?)
    }

    async fn require_owner(
        &self,
        report_id: i64,
        actor_id: &str,
        action: Action,
    ) -> Result<(), WorkflowError> {
        let report = self.get_report(report_id).await?;
        if report.user_id != actor_id {
            return Err(logbook_types::TransitionError::PermissionDenied {
                actor_id: actor_id.to_string(),
                action,
            }
            .into());
        }
        Ok(())
    }

    /// Submit for review. Every reviewer is mailed.
    pub async fn submit(
        &self,
        report_id: i64,
        actor_id: &str,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let outcome = self
            .transition(TransitionRequest::new(report_id, actor_id, Action::Submit))
            .await?;
        let reviewers = self.user_ids_with_role(Role::Reviewer).await;
        self.announce(&outcome, MailKind::ReviewRequest, &reviewers)
            .await;
        Ok(outcome)
    }

    /// Endorse. Every approver is mailed the approve and send-back links.
    pub async fn endorse(
        &self,
        report_id: i64,
        actor_id: &str,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let outcome = self
            .transition(TransitionRequest::new(report_id, actor_id, Action::Endorse))
            .await?;
        let approvers = self.user_ids_with_role(Role::Approver).await;
        self.announce(&outcome, MailKind::ApprovalRequest, &approvers)
            .await;
        Ok(outcome)
    }

    /// Send the report back for revision. Comments are required and reach the owner
    /// as an in-app notification and by mail.
    pub async fn reject(
        &self,
        report_id: i64,
        actor_id: &str,
        comments: &str,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let outcome = self
            .transition(
                TransitionRequest::new(report_id, actor_id, Action::Reject).with_comments(comments),
            )
            .await?;
        let report = &outcome.report;
        self.notify_owner(
            report,
            &format!("Report Sent Back: {}", report.title),
            &format!(
                "Report #{} was sent back for revision by {}. Comments: {}",
                report.report_id,
                actor_id,
                comments.trim()
            ),
        )
        .await;
        self.announce(&outcome, MailKind::RevisionRequest, std::slice::from_ref(&report.user_id))
            .await;
        Ok(outcome)
    }

    /// Record an approval and, the first time through, produce and deliver the final PDF.
    ///
    /// An approve on an already approved report adds that approver's signature entry.
    /// The document pipeline only runs while no final PDF is stored, so re-entrant
    /// approvals never regenerate or resend it, but a failed generation is retried.
    pub async fn approve(
        &self,
        report_id: i64,
        actor_id: &str,
    ) -> Result<ApprovalReceipt, WorkflowError> {
        let outcome = self
            .transition(TransitionRequest::new(report_id, actor_id, Action::Approve))
            .await?;

        let _generating = self.generating.lock().await;
        let current = self.get_report(report_id).await?;
        if let Some(existing) = current.final_pdf_path {
            tracing::info!(report_id, approver = %actor_id, "additional approval signature recorded");
            return Ok(ApprovalReceipt {
                outcome,
                document: DocumentStatus::AlreadyGenerated(PathBuf::from(existing)),
                deliveries: Vec::new(),
            });
        }

        let pdf = match self.generate_final_pdf(&current).await {
            Ok(pdf) => pdf,
            Err(WorkflowError::Document(e)) => {
                tracing::warn!(report_id, error = %e, "final document generation failed");
                return Ok(ApprovalReceipt {
                    outcome,
                    document: DocumentStatus::Failed(e),
                    deliveries: Vec::new(),
                });
            }
            Err(e) => return Err(e),
        };
        let pdf_str = pdf.to_string_lossy().into_owned();

        let report = &outcome.report;
        let mut recipients = vec![actor_id.to_string()];
        if report.user_id != actor_id {
            recipients.push(report.user_id.clone());
        }
        // Jobs are durable before the final path is stored: once it is set, later
        // approves take the additional-approval branch and never queue them.
        let mut queued = Vec::with_capacity(recipients.len());
        for recipient in &recipients {
            let req = JobRequest::final_report(report_id, recipient, &pdf_str);
            queued.push(self.delivery.enqueue(&req).await?);
        }
        self.store.set_final_pdf(report_id, &pdf_str).await?;

        self.notify_owner(
            report,
            &format!("Report Approved: {}", report.title),
            &format!(
                "Report #{} has been approved and finalized by {}.",
                report.report_id, actor_id
            ),
        )
        .await;

        let mut deliveries = Vec::with_capacity(queued.len());
        for (job, created) in queued {
            if !created && job.status == JobStatus::Sent {
                deliveries.push((job, Dispatch::Duplicate));
                continue;
            }
            deliveries.push(self.deliver_now(job).await);
        }

        Ok(ApprovalReceipt {
            outcome,
            document: DocumentStatus::Generated(pdf),
            deliveries,
        })
    }

    /// Immediate send of a queued job. The row is already durable, so a store
    /// failure here only postpones the send to the drain cycle.
    async fn deliver_now(&self, job: DeliveryJob) -> (DeliveryJob, Dispatch) {
        match self.delivery.deliver(job.clone()).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(job_id = job.id, report_id = job.report_id, error = %e, "immediate delivery failed");
                let reason = e.to_string();
                (job, Dispatch::Failed(reason))
            }
        }
    }

    /// Queue a stage mail per recipient for the transition in `outcome` and try
    /// to send each now. The transition is committed already; failures are logged.
    async fn announce(&self, outcome: &TransitionOutcome, kind: MailKind, recipients: &[String]) {
        let report_id = outcome.report.report_id;
        if recipients.is_empty() {
            tracing::warn!(report_id, %kind, "no recipients for stage mail");
            return;
        }
        for recipient in recipients {
            let req = JobRequest::stage(kind, report_id, recipient, outcome.entry.id);
            match self.delivery.enqueue(&req).await {
                Ok((job, true)) => {
                    self.deliver_now(job).await;
                }
                Ok((_, false)) => {}
                Err(e) => {
                    tracing::error!(report_id, recipient = %recipient, %kind, error = %e, "could not queue stage mail")
                }
            }
        }
    }

    async fn user_ids_with_role(&self, role: Role) -> Vec<String> {
        match self.store.users_with_role(role).await {
            Ok(users) => users.into_iter().map(|u| u.user_id).collect(),
            Err(e) => {
                tracing::error!(%role, error = %e, "could not list mail recipients");
                Vec::new()
            }
        }
    }

    async fn notify_owner(&self, report: &Report, subject: &str, message: &str) {
        if let Err(e) = self.store.notify(&report.user_id, subject, message).await {
            tracing::warn!(report_id = report.report_id, owner = %report.user_id, error = %e, "owner notification not recorded");
        }
    }

    async fn transition(&self, req: TransitionRequest) -> Result<TransitionOutcome, WorkflowError> {
        Ok(self.store.apply_transition(&req).await?)
    }

    /// The stored template's file, or the default template when `template_id` is `None`.
    async fn template_path(&self, template_id: Option<i64>) -> Result<PathBuf, WorkflowError> {
        match template_id {
            Some(id) => {
                let template = self.store.get_template(id).await?.ok_or_else(|| {
                    DocumentError::Template(format!("template {} no longer exists", id))
                })?;
                Ok(PathBuf::from(template.file_path))
            }
            None => Ok(self.storage.default_template.clone()),
        }
    }

    /// Field names a report on this template can fill.
    pub async fn template_fields(&self, template_id: Option<i64>) -> Result<Vec<String>, WorkflowError> {
        if let Some(id) = template_id {
            if self.store.get_template(id).await?.is_none() {
                return Err(WorkflowError::NotFound(format!("template {}", id)));
            }
        }
        let path = self.template_path(template_id).await?;
        Ok(self.documents.template_fields(&path).await?)
    }

    async fn generate_final_pdf(&self, report: &Report) -> Result<PathBuf, WorkflowError> {
        let template = self.template_path(report.template_id).await?;
        let signatures = self.signatures(report.report_id).await?;
        let output = self
            .storage
            .output_dir
            .join(format!("report_{}_final.pdf", report.report_id));

        let pdf = self
            .documents
            .run(PipelineRequest {
                report_id: report.report_id,
                template,
                fields: report.fields.clone(),
                signatures,
                user_artifact: report.artifact_path.as_ref().map(PathBuf::from),
                output,
            })
            .await?;
        Ok(pdf)
    }

    /// Audit entries for a report, oldest first.
    pub async fn timeline(&self, report_id: i64) -> Result<Vec<AuditEntry>, WorkflowError> {
        self.get_report(report_id).await?;
        Ok(self.audit.timeline(report_id).await?)
    }

    /// Signatures as they appear on the final document, derived fresh from the audit log.
    pub async fn signatures(&self, report_id: i64) -> Result<Vec<Signature>, WorkflowError> {
        let entries = self.audit.timeline(report_id).await?;
        let mut actors: Vec<String> = entries.iter().map(|e| e.actor_id.clone()).collect();
        actors.sort();
        actors.dedup();
        let users = self.store.get_users(&actors).await?;
        Ok(derive_signatures(&entries, &users))
    }

    pub async fn notifications(
        &self,
        user_id: &str,
        include_read: bool,
    ) -> Result<Vec<Notification>, WorkflowError> {
        Ok(self.store.list_notifications(user_id, include_read).await?)
    }

    pub async fn mark_notification_read(&self, id: i64) -> Result<bool, WorkflowError> {
        Ok(self.store.mark_notification_read(id).await?)
    }

    pub async fn deliveries(&self, report_id: i64) -> Result<Vec<DeliveryJob>, WorkflowError> {
        Ok(self.delivery.jobs_for_report(report_id).await?)
    }
}
