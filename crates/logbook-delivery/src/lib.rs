//! Delivery of workflow mail: connectivity probe, SMTP transport, message
//! templates, and the durable outbox drained by a background worker.

mod message;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
mod probe;
mod queue;
mod smtp;

pub use logbook_types::{ConnectivityProbe, MailError, MailTransport, OutgoingMail};
pub use message::MailComposer;
pub use probe::TcpProbe;
pub use queue::{DeliveryError, DeliveryQueue, Dispatch, DrainReport};
pub use smtp::SmtpMailer;

#[cfg(feature = "test-util")]
pub use mock::{MockTransport, StaticProbe};
