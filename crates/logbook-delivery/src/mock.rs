//! In-process doubles for the transport and the probe.

use async_trait::async_trait;
use logbook_types::{ConnectivityProbe, MailError, MailTransport, OutgoingMail};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Probe with a switchable answer.
#[derive(Debug)]
pub struct StaticProbe {
    online: AtomicBool,
}

impl StaticProbe {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectivityProbe for StaticProbe {
    async fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// Records every accepted message. Attachments must exist on disk, as with a real transport.
#[derive(Debug, Default)]
pub struct MockTransport {
    sent: Mutex<Vec<OutgoingMail>>,
    fail: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject subsequent sends with a transport error (or accept them again).
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<OutgoingMail> {
        self.sent.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl MailTransport for MockTransport {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MailError::Transport("connection refused".to_string()));
        }
        if let Some(path) = &mail.attachment {
            if !path.exists() {
                return Err(MailError::Attachment {
                    path: path.display().to_string(),
                    reason: "file not found".to_string(),
                });
            }
        }
        self.sent
            .lock()
            .map_err(|e| MailError::Transport(e.to_string()))?
            .push(mail.clone());
        Ok(())
    }
}
