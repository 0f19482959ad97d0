//! Outbox: durable enqueue, immediate-send attempt, and the drain cycle.

use crate::message::MailComposer;
use logbook_types::{
    AuditEntry, AuditLog, ConnectivityProbe, DeliveryConfig, DeliveryJob, DeliveryStore,
    JobRequest, MailError, MailKind, MailTransport, OutgoingMail, ReportStore, StoreError, User,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What happened to a job handed to `dispatch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Sent right away.
    Sent,
    /// Offline; left pending for the drain cycle.
    Queued,
    /// The immediate attempt failed; the job is in `error` and will be retried.
    Failed(String),
    /// An identical job already existed; nothing was sent.
    Duplicate,
}

/// Outcome of one drain cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Another drain held the guard; this one did nothing.
    pub skipped: bool,
    /// The probe reported offline and the cycle stopped early.
    pub offline: bool,
    pub attempted: usize,
    pub sent: usize,
    pub failed: usize,
    /// Due jobs left untouched because the host went offline.
    pub deferred: usize,
}

/// Why a job could not be turned into a message.
enum ComposeError {
    Store(StoreError),
    /// Recorded on the job; the drain cycle retries it.
    Unsendable(String),
}

impl From<StoreError> for ComposeError {
    fn from(e: StoreError) -> Self {
        ComposeError::Store(e)
    }
}

impl From<MailError> for ComposeError {
    fn from(e: MailError) -> Self {
        ComposeError::Unsendable(e.to_string())
    }
}

/// At-least-once delivery of workflow mail.
///
/// Every job is written to the store before any send is attempted, so a crash
/// between the two leaves a due row that the next drain picks up.
pub struct DeliveryQueue {
    reports: Arc<dyn ReportStore>,
    audit: Arc<dyn AuditLog>,
    jobs: Arc<dyn DeliveryStore>,
    transport: Arc<dyn MailTransport>,
    probe: Arc<dyn ConnectivityProbe>,
    composer: MailComposer,
    draining: Mutex<()>,
}

impl DeliveryQueue {
    pub fn new(
        reports: Arc<dyn ReportStore>,
        audit: Arc<dyn AuditLog>,
        jobs: Arc<dyn DeliveryStore>,
        transport: Arc<dyn MailTransport>,
        probe: Arc<dyn ConnectivityProbe>,
        config: DeliveryConfig,
    ) -> Self {
        Self {
            reports,
            audit,
            jobs,
            transport,
            probe,
            composer: MailComposer::from_config(&config),
            draining: Mutex::new(()),
        }
    }

    /// Insert a pending job unless an identical one exists. Returns the job and whether it is new.
    pub async fn enqueue(&self, req: &JobRequest) -> Result<(DeliveryJob, bool), DeliveryError> {
        let (job, created) = self.jobs.enqueue(req).await?;
        if created {
            tracing::info!(job_id = job.id, report_id = req.report_id, recipient = %req.recipient_id, kind = %req.kind, "delivery job queued");
        } else {
            tracing::debug!(job_id = job.id, report_id = req.report_id, recipient = %req.recipient_id, kind = %req.kind, "delivery job already queued");
        }
        Ok((job, created))
    }

    /// Try an already queued job right away when the host is online.
    pub async fn deliver(&self, job: DeliveryJob) -> Result<(DeliveryJob, Dispatch), DeliveryError> {
        if !self.probe.is_online().await {
            tracing::info!(job_id = job.id, report_id = job.report_id, "offline, delivery deferred to drain cycle");
            return Ok((job, Dispatch::Queued));
        }
        let dispatch = match self.attempt(&job).await? {
            Ok(()) => Dispatch::Sent,
            Err(reason) => Dispatch::Failed(reason),
        };
        let job = self.jobs.get_job(job.id).await?.unwrap_or(job);
        Ok((job, dispatch))
    }

    /// Enqueue, then deliver when the job is new.
    pub async fn dispatch(&self, req: &JobRequest) -> Result<(DeliveryJob, Dispatch), DeliveryError> {
        let (job, created) = self.enqueue(req).await?;
        if !created {
            return Ok((job, Dispatch::Duplicate));
        }
        self.deliver(job).await
    }

    /// One send attempt for `job`, recording the result on its row.
    ///
    /// The outer error is a store failure; the inner one is the send failure
    /// that was written to the job.
    pub async fn attempt(&self, job: &DeliveryJob) -> Result<Result<(), String>, DeliveryError> {
        let result = match self.compose(job).await {
            Ok(mail) => self
                .transport
                .send(&mail)
                .await
                .map_err(|e| e.to_string()),
            Err(ComposeError::Unsendable(reason)) => Err(reason),
            Err(ComposeError::Store(e)) => return Err(e.into()),
        };
        match &result {
            Ok(()) => {
                self.jobs.mark_sent(job.id).await?;
                tracing::info!(job_id = job.id, report_id = job.report_id, recipient = %job.recipient_id, kind = %job.kind, "delivery sent");
            }
            Err(reason) => {
                self.jobs.mark_failed(job.id, reason).await?;
                tracing::warn!(job_id = job.id, report_id = job.report_id, error = %reason, "delivery failed, will retry");
            }
        }
        Ok(result)
    }

    async fn compose(&self, job: &DeliveryJob) -> Result<OutgoingMail, ComposeError> {
        let report = self
            .reports
            .get_report(job.report_id)
            .await?
            .ok_or_else(|| ComposeError::Unsendable(format!("report {} not found", job.report_id)))?;
        let recipient = self.user(&job.recipient_id, "recipient").await?;
        if recipient.email.trim().is_empty() {
            return Err(ComposeError::Unsendable(format!(
                "recipient {} has no email address",
                recipient.user_id
            )));
        }

        let mail = match job.kind {
            MailKind::FinalReport => {
                let pdf = job.artifact_path.as_deref().ok_or_else(|| {
                    ComposeError::Unsendable(format!("job {} has no attachment", job.id))
                })?;
                self.composer.final_report(&report, &recipient, PathBuf::from(pdf))?
            }
            MailKind::ReviewRequest => {
                let owner = self.user(&report.user_id, "owner").await?;
                self.composer.review_request(&report, &recipient, &owner)?
            }
            MailKind::ApprovalRequest => {
                let owner = self.user(&report.user_id, "owner").await?;
                let entry = self.triggering_entry(job).await?;
                let endorser = self.user(&entry.actor_id, "endorser").await?;
                self.composer
                    .approval_request(&report, &recipient, &owner, &endorser)?
            }
            MailKind::RevisionRequest => {
                let entry = self.triggering_entry(job).await?;
                let reviewer = self.user(&entry.actor_id, "reviewer").await?;
                let comments = entry.comments.as_deref().unwrap_or_default();
                self.composer
                    .revision_request(&report, &recipient, &reviewer, comments)?
            }
        };
        Ok(mail)
    }

    async fn user(&self, user_id: &str, what: &str) -> Result<User, ComposeError> {
        self.reports
            .get_user(user_id)
            .await?
            .ok_or_else(|| ComposeError::Unsendable(format!("{} {} not found", what, user_id)))
    }

    async fn triggering_entry(&self, job: &DeliveryJob) -> Result<AuditEntry, ComposeError> {
        let missing = || ComposeError::Unsendable(format!("job {} has no audit entry", job.id));
        let audit_id = job.audit_id.ok_or_else(missing)?;
        self.audit
            .timeline(job.report_id)
            .await?
            .into_iter()
            .find(|e| e.id == audit_id)
            .ok_or_else(missing)
    }

    pub async fn jobs_for_report(&self, report_id: i64) -> Result<Vec<DeliveryJob>, DeliveryError> {
        Ok(self.jobs.jobs_for_report(report_id).await?)
    }

    /// Attempt every due job, re-probing before each one. Overlapping calls are skipped.
    pub async fn drain(&self) -> Result<DrainReport, DeliveryError> {
        let Ok(_guard) = self.draining.try_lock() else {
            tracing::debug!("drain already running, skipped");
            return Ok(DrainReport {
                skipped: true,
                ..DrainReport::default()
            });
        };

        let due = self.jobs.due_jobs().await?;
        let mut report = DrainReport::default();
        for (i, job) in due.iter().enumerate() {
            if !self.probe.is_online().await {
                report.offline = true;
                report.deferred = due.len() - i;
                break;
            }
            report.attempted += 1;
            match self.attempt(job).await {
                Ok(Ok(())) => report.sent += 1,
                Ok(Err(_)) => report.failed += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(job_id = job.id, error = %e, "could not record delivery attempt");
                }
            }
        }
        Ok(report)
    }

    /// Drain on a fixed interval until the handle is aborted or the runtime stops.
    pub fn spawn_worker(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match self.drain().await {
                    Ok(r) if r.attempted > 0 || r.offline => tracing::info!(
                        sent = r.sent,
                        failed = r.failed,
                        deferred = r.deferred,
                        offline = r.offline,
                        "drain cycle finished"
                    ),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "drain cycle failed"),
                }
            }
        })
    }
}
