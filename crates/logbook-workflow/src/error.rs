use logbook_delivery::DeliveryError;
use logbook_types::{DocumentError, StoreError, TransitionError};

/// Errors surfaced by workflow operations. Storage faults arrive as `Store` with a
/// message only; rule violations keep their `TransitionError` kind.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage failure: {0}")]
    Store(String),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error("delivery failure: {0}")]
    Delivery(String),
}

impl From<StoreError> for WorkflowError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Transition(t) => WorkflowError::Transition(t),
            StoreError::NotFound(what) => WorkflowError::NotFound(what),
            StoreError::Other(msg) => WorkflowError::Store(msg),
        }
    }
}

impl From<DeliveryError> for WorkflowError {
    fn from(e: DeliveryError) -> Self {
        match e {
            DeliveryError::Store(inner) => WorkflowError::Delivery(inner.to_string()),
        }
    }
}
