use thiserror::Error;

/// Errors surfaced by [`ObjectStorage`](crate::ObjectStorage) implementations.
///
/// Only [`RestoreAlreadyInProgress`](CloudError::RestoreAlreadyInProgress) is
/// recoverable; every other variant propagates to the operator.
#[derive(Debug, Error)]
pub enum CloudError {
    /// A restore request was issued for an object already being restored.
    /// Benign: callers mark the restore as requested and continue.
    #[error("restore already in progress for {bucket}/{key}")]
    RestoreAlreadyInProgress { bucket: String, key: String },

    /// The requested bucket or object does not exist.
    #[error("not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// Any other backend failure, tagged with the operation that produced it.
    #[error("{operation} failed: {message}")]
    Api {
        operation: &'static str,
        message: String,
    },

    /// I/O failure while streaming an object body.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CloudError {
    pub(crate) fn api(operation: &'static str, message: impl ToString) -> Self {
        Self::Api {
            operation,
            message: message.to_string(),
        }
    }
}
