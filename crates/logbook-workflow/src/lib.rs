//! Approval workflow orchestration over the store, document pipeline, and delivery queue.

mod engine;
mod error;

pub use engine::{ApprovalReceipt, DocumentStatus, WorkflowEngine};
pub use error::WorkflowError;
