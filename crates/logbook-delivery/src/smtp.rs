//! SMTP submission via lettre.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use logbook_types::{MailError, MailTransport, OutgoingMail, SmtpConfig};

/// Mail transport over SMTP. Port 465 uses implicit TLS; any other port upgrades with STARTTLS.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(cfg: &SmtpConfig) -> Result<Self, MailError> {
        let builder = if cfg.implicit_tls() {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.server)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.server)
        }
        .map_err(|e| MailError::Transport(e.to_string()))?
        .port(cfg.port);
        let builder = if cfg.has_credentials() {
            builder.credentials(Credentials::new(cfg.username.clone(), cfg.password.clone()))
        } else {
            builder
        };
        let from = cfg
            .sender
            .parse::<Mailbox>()
            .map_err(|e| MailError::Message(format!("sender {:?}: {}", cfg.sender, e)))?;
        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

/// Build the MIME message: HTML body plus the optional file attachment.
pub(crate) async fn build_message(from: &Mailbox, mail: &OutgoingMail) -> Result<Message, MailError> {
    let to = mail
        .to
        .parse::<Mailbox>()
        .map_err(|e| MailError::Message(format!("recipient {:?}: {}", mail.to, e)))?;
    let html = SinglePart::html(mail.html_body.clone());
    let builder = Message::builder()
        .from(from.clone())
        .to(to)
        .subject(mail.subject.clone());

    let message = match &mail.attachment {
        None => builder.singlepart(html),
        Some(path) => {
            let bytes = tokio::fs::read(path).await.map_err(|e| MailError::Attachment {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "report.pdf".to_string());
            let content_type = ContentType::parse("application/pdf")
                .map_err(|e| MailError::Message(e.to_string()))?;
            builder.multipart(
                MultiPart::mixed()
                    .singlepart(html)
                    .singlepart(Attachment::new(filename).body(bytes, content_type)),
            )
        }
    };
    message.map_err(|e| MailError::Message(e.to_string()))
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        let message = build_message(&self.from, mail).await?;
        self.transport
            .send(message)
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;
        tracing::info!(to = %mail.to, subject = %mail.subject, "mail sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from() -> Mailbox {
        "LogBook <logbook@example.com>".parse().unwrap()
    }

    #[tokio::test]
    async fn attachment_is_embedded_with_pdf_type() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("report_7_final.pdf");
        std::fs::write(&pdf, b"%PDF-1.5 test").unwrap();

        let mail = OutgoingMail {
            to: "a1@example.com".to_string(),
            subject: "Final PDF Report Approved".to_string(),
            html_body: "<p>attached</p>".to_string(),
            attachment: Some(pdf),
        };
        let raw = String::from_utf8(build_message(&from(), &mail).await.unwrap().formatted()).unwrap();
        assert!(raw.contains("application/pdf"));
        assert!(raw.contains("report_7_final.pdf"));
        assert!(raw.contains("To: a1@example.com"));
    }

    #[tokio::test]
    async fn bad_recipient_and_missing_attachment_are_errors() {
        let mut mail = OutgoingMail {
            to: "not-an-address".to_string(),
            subject: "s".to_string(),
            html_body: "b".to_string(),
            attachment: None,
        };
        assert!(matches!(
            build_message(&from(), &mail).await,
            Err(MailError::Message(_))
        ));

        mail.to = "a1@example.com".to_string();
        mail.attachment = Some("/definitely/not/here.pdf".into());
        assert!(matches!(
            build_message(&from(), &mail).await,
            Err(MailError::Attachment { .. })
        ));
    }

    #[tokio::test]
    async fn builds_for_both_tls_modes() {
        let mut cfg = SmtpConfig {
            sender: "logbook@example.com".to_string(),
            ..SmtpConfig::default()
        };
        assert!(SmtpMailer::new(&cfg).is_ok());
        cfg.port = 465;
        assert!(SmtpMailer::new(&cfg).is_ok());
        cfg.sender = String::new();
        assert!(matches!(SmtpMailer::new(&cfg), Err(MailError::Message(_))));
    }
}
