//! Mail content for each workflow stage, rendered with handlebars.
//!
//! `{{value}}` is HTML-escaped by the registry, so titles, names, and comments
//! can carry markup characters safely.

use handlebars::Handlebars;
use logbook_types::{DeliveryConfig, MailError, OutgoingMail, Report, User};
use serde::Serialize;
use std::path::PathBuf;

const REVIEW_REQUEST: &str = r#"<html>
<body>
<h2>New Report for Review</h2>
<p>Hello {{recipient}},</p>
<p>A new report has been submitted by {{owner}} and requires your review.</p>
<p><strong>Report ID:</strong> {{report_id}}</p>
<p><strong>Report Title:</strong> {{title}}</p>
<p>Please log in to the system to review this report.</p>
<p>Thank you,<br>{{app}}</p>
</body>
</html>
"#;

const APPROVAL_REQUEST: &str = r#"<html>
<body>
<h2>Report Ready for Final Approval</h2>
<p>Hello {{recipient}},</p>
<p>A report has been reviewed and endorsed by {{actor}} and is now ready for your final approval.</p>
<p><strong>Report ID:</strong> {{report_id}}</p>
<p><strong>Report Title:</strong> {{title}}</p>
<p><strong>Created by:</strong> {{owner}}</p>
<p>Please use one of the options below:</p>
<p><a href="{{approve_url}}">Approve Report</a> | <a href="{{send_back_url}}">Request Revision</a></p>
<p>Thank you,<br>{{app}}</p>
</body>
</html>
"#;

const REVISION_REQUEST: &str = r#"<html>
<body>
<h2>Report Requires Revision</h2>
<p>Hello {{recipient}},</p>
<p>Your report "{{title}}" requires some revisions before it can be approved.</p>
<p><strong>Report ID:</strong> {{report_id}}</p>
<p><strong>Reviewed by:</strong> {{actor}}</p>
<p><strong>Comments:</strong> {{comments}}</p>
<p>Please log in to the system to make the necessary revisions.</p>
<p>Thank you,<br>{{app}}</p>
</body>
</html>
"#;

const FINAL_REPORT: &str = r#"<html>
<body>
{{#if for_owner}}
<h2>Report Approved</h2>
<p>Hello {{recipient}},</p>
<p>Your report "{{title}}" has been approved and finalized.</p>
<p><strong>Report ID:</strong> {{report_id}}</p>
<p>The final report is attached to this email as a PDF.</p>
{{else}}
<h2>Final PDF Report Approved</h2>
<p>Hello {{recipient}},</p>
<p>The final PDF report has been approved and is attached to this email.</p>
<p><strong>Report ID:</strong> {{report_id}}</p>
<p><strong>Report Title:</strong> {{title}}</p>
<p>Status: Approved and finalized.</p>
{{/if}}
<p>Thank you,<br>{{app}}</p>
</body>
</html>
"#;

#[derive(Serialize)]
struct MailContext<'a> {
    app: &'a str,
    recipient: &'a str,
    report_id: i64,
    title: &'a str,
    owner: Option<&'a str>,
    actor: Option<&'a str>,
    comments: Option<&'a str>,
    approve_url: Option<String>,
    send_back_url: Option<String>,
    for_owner: bool,
}

impl<'a> MailContext<'a> {
    fn new(app: &'a str, report: &'a Report, recipient: &'a User) -> Self {
        Self {
            app,
            recipient: &recipient.name,
            report_id: report.report_id,
            title: &report.title,
            owner: None,
            actor: None,
            comments: None,
            approve_url: None,
            send_back_url: None,
            for_owner: recipient.user_id == report.user_id,
        }
    }
}

/// Builds every outgoing message of the workflow.
pub struct MailComposer {
    registry: Handlebars<'static>,
    app_name: String,
    action_base_url: String,
}

impl MailComposer {
    pub fn new(app_name: impl Into<String>, action_base_url: impl Into<String>) -> Self {
        Self {
            registry: Handlebars::new(),
            app_name: app_name.into(),
            action_base_url: action_base_url.into(),
        }
    }

    pub fn from_config(cfg: &DeliveryConfig) -> Self {
        Self::new(cfg.app_name.clone(), cfg.action_base_url.clone())
    }

    /// Link to one of the remote action endpoints for `approver_id`.
    pub fn action_url(&self, action: &str, report_id: i64, approver_id: &str) -> String {
        format!(
            "{}/api/report/{}?report_id={}&approver_id={}",
            self.action_base_url.trim_end_matches('/'),
            action,
            report_id,
            approver_id
        )
    }

    /// To a reviewer, after the owner submitted.
    pub fn review_request(
        &self,
        report: &Report,
        reviewer: &User,
        owner: &User,
    ) -> Result<OutgoingMail, MailError> {
        let ctx = MailContext {
            owner: Some(&owner.name),
            ..MailContext::new(&self.app_name, report, reviewer)
        };
        self.mail(
            reviewer,
            format!("New Report for Review: {}", report.title),
            REVIEW_REQUEST,
            &ctx,
            None,
        )
    }

    /// To an approver, after a reviewer endorsed. Carries the approve and send-back links.
    pub fn approval_request(
        &self,
        report: &Report,
        approver: &User,
        owner: &User,
        endorser: &User,
    ) -> Result<OutgoingMail, MailError> {
        let ctx = MailContext {
            owner: Some(&owner.name),
            actor: Some(&endorser.name),
            approve_url: Some(self.action_url("approve", report.report_id, &approver.user_id)),
            send_back_url: Some(self.action_url("send_back", report.report_id, &approver.user_id)),
            ..MailContext::new(&self.app_name, report, approver)
        };
        self.mail(
            approver,
            format!("Report Ready for Final Approval: {}", report.title),
            APPROVAL_REQUEST,
            &ctx,
            None,
        )
    }

    /// To the owner, after a send-back.
    pub fn revision_request(
        &self,
        report: &Report,
        owner: &User,
        reviewer: &User,
        comments: &str,
    ) -> Result<OutgoingMail, MailError> {
        let ctx = MailContext {
            actor: Some(&reviewer.name),
            comments: Some(comments.trim()),
            ..MailContext::new(&self.app_name, report, owner)
        };
        self.mail(
            owner,
            format!("Report Requires Revision: {}", report.title),
            REVISION_REQUEST,
            &ctx,
            None,
        )
    }

    /// The signed PDF, addressed to one recipient. The owner gets their own wording.
    pub fn final_report(
        &self,
        report: &Report,
        recipient: &User,
        pdf: PathBuf,
    ) -> Result<OutgoingMail, MailError> {
        let ctx = MailContext::new(&self.app_name, report, recipient);
        let subject = if ctx.for_owner {
            format!("Report Approved: {}", report.title)
        } else {
            format!("Final PDF Report Approved: {}", report.title)
        };
        self.mail(recipient, subject, FINAL_REPORT, &ctx, Some(pdf))
    }

    fn mail(
        &self,
        to: &User,
        subject: String,
        template: &str,
        ctx: &MailContext<'_>,
        attachment: Option<PathBuf>,
    ) -> Result<OutgoingMail, MailError> {
        let html_body = self
            .registry
            .render_template(template, ctx)
            .map_err(|e| MailError::Message(format!("render {:?}: {}", subject, e)))?;
        Ok(OutgoingMail {
            to: to.email.clone(),
            subject,
            html_body,
            attachment,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use logbook_types::{FieldMap, ReportStatus, Role};

    fn report() -> Report {
        Report {
            report_id: 42,
            user_id: "owner".to_string(),
            title: "Q3 <draft> & notes".to_string(),
            fields: FieldMap::new(),
            status: ReportStatus::Approved,
            version: 3,
            created_at: Utc::now(),
            last_modified_at: Utc::now(),
            last_modified_by: "A1".to_string(),
            artifact_path: None,
            template_id: None,
            final_pdf_path: Some("out/report_42_final.pdf".to_string()),
        }
    }

    fn person(id: &str, name: &str, role: Role) -> User {
        User {
            user_id: id.to_string(),
            name: name.to_string(),
            role,
            email: format!("{id}@example.com"),
            emp_code: None,
            designation: None,
        }
    }

    fn composer() -> MailComposer {
        MailComposer::new("LogBook System", "https://logbook.example.com/")
    }

    #[test]
    fn final_report_names_report_and_escapes_markup() {
        let dana = person("A1", "Dana", Role::Approver);
        let mail = composer()
            .final_report(&report(), &dana, "out/report_42_final.pdf".into())
            .unwrap();
        assert_eq!(mail.to, "A1@example.com");
        assert!(mail.subject.starts_with("Final PDF Report Approved"));
        assert!(mail.html_body.contains("<strong>Report ID:</strong> 42"));
        assert!(mail.html_body.contains("Q3 &lt;draft&gt; &amp; notes"));
        assert!(mail.html_body.contains("Hello Dana"));
        assert!(mail.attachment.is_some());

        let owner = person("owner", "Asha", Role::User);
        let mail = composer()
            .final_report(&report(), &owner, "out/report_42_final.pdf".into())
            .unwrap();
        assert!(mail.subject.starts_with("Report Approved"));
        assert!(mail.html_body.contains("has been approved and finalized"));
        assert!(!mail.html_body.contains("Final PDF Report Approved"));
    }

    #[test]
    fn approval_request_links_to_both_actions() {
        let c = composer();
        assert_eq!(
            c.action_url("approve", 42, "A1"),
            "https://logbook.example.com/api/report/approve?report_id=42&approver_id=A1"
        );
        let mail = c
            .approval_request(
                &report(),
                &person("A1", "Dana", Role::Approver),
                &person("owner", "Asha", Role::User),
                &person("rev", "Ravi", Role::Reviewer),
            )
            .unwrap();
        assert!(mail.subject.starts_with("Report Ready for Final Approval"));
        assert!(mail.attachment.is_none());
        assert!(mail.html_body.contains("endorsed by Ravi"));
        assert!(mail.html_body.contains("<strong>Created by:</strong> Asha"));
        assert!(mail
            .html_body
            .contains("https://logbook.example.com/api/report/approve?report_id"));
        assert!(mail
            .html_body
            .contains("https://logbook.example.com/api/report/send_back?report_id"));
    }

    #[test]
    fn stage_mails_address_the_right_people() {
        let c = composer();
        let owner = person("owner", "Asha", Role::User);
        let rev = person("rev", "Ravi", Role::Reviewer);

        let mail = c.review_request(&report(), &rev, &owner).unwrap();
        assert_eq!(mail.to, "rev@example.com");
        assert!(mail.html_body.contains("submitted by Asha"));

        let mail = c
            .revision_request(&report(), &owner, &rev, "  Totals <missing>  ")
            .unwrap();
        assert_eq!(mail.to, "owner@example.com");
        assert!(mail.subject.starts_with("Report Requires Revision"));
        assert!(mail
            .html_body
            .contains("<strong>Comments:</strong> Totals &lt;missing&gt;</p>"));
    }
}
