//! Error taxonomy for collaborators and runs.
//!
//! Only [`CollaboratorError::QuotaExceeded`] crosses the run boundary.
//! Transient failures and malformed classifier output are absorbed per
//! candidate; unique-key conflicts are not errors at all (see
//! [`InsertOutcome`](crate::store::InsertOutcome)).

use thiserror::Error;

/// Failure reported by an external collaborator (catalog, classifier,
/// transcript source).
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// Quota or rate budget exhausted. Fatal to the current run, never retried.
    #[error("{service} quota exceeded: {message}")]
    QuotaExceeded { service: String, message: String },

    /// Network, HTTP, or decoding failure local to one call.
    #[error("{0}")]
    Transient(String),
}

impl CollaboratorError {
    pub fn quota(service: impl Into<String>, message: impl Into<String>) -> Self {
        CollaboratorError::QuotaExceeded {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        CollaboratorError::Transient(message.into())
    }

    pub fn is_quota(&self) -> bool {
        matches!(self, CollaboratorError::QuotaExceeded { .. })
    }
}

impl From<reqwest::Error> for CollaboratorError {
    fn from(err: reqwest::Error) -> Self {
        CollaboratorError::Transient(err.to_string())
    }
}

impl From<serde_json::Error> for CollaboratorError {
    fn from(err: serde_json::Error) -> Self {
        CollaboratorError::Transient(format!("decode error: {}", err))
    }
}

/// Why a run ended in `failed`.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("{service} quota exceeded: {message}")]
    QuotaExceeded { service: String, message: String },

    #[error("cancelled")]
    Cancelled,

    #[error("record store error: {0}")]
    Store(String),
}

impl RunError {
    /// The run-fatal form of a collaborator error, if it is one.
    pub fn from_collaborator(err: &CollaboratorError) -> Option<RunError> {
        match err {
            CollaboratorError::QuotaExceeded { service, message } => Some(RunError::QuotaExceeded {
                service: service.clone(),
                message: message.clone(),
            }),
            CollaboratorError::Transient(_) => None,
        }
    }
}

pub type CollaboratorResult<T> = std::result::Result<T, CollaboratorError>;
