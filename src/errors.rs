/*!
 * Error types for the docjobs application.
 *
 * This module contains the typed errors raised by the job orchestration
 * layer, using the thiserror crate for ergonomic error definitions.
 */

use thiserror::Error;

use crate::jobs::classifier::ErrorKind;

/// Errors raised by the job orchestration layer.
///
/// Translation operations may return these directly (wrapped in
/// `anyhow::Error`) to give the classifier a static kind instead of
/// having it guess from the message.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JobError {
    /// The job exceeded its allotted time
    #[error("Job timed out after {0} seconds")]
    Timeout(u64),

    /// Network connectivity failure
    #[error("Network error: {0}")]
    Network(String),

    /// Error returned by a translation API
    #[error("API error: {status_code} - {message}")]
    Api {
        /// HTTP-like status code
        status_code: u16,
        /// Error message from the API
        message: String,
    },

    /// Missing or unreadable file
    #[error("File error: {0}")]
    File(String),

    /// Invalid request or configuration
    #[error("Validation error: {0}")]
    Validation(String),

    /// Anything else
    #[error("System error: {0}")]
    System(String),

    /// The job was cancelled
    #[error("Job cancelled")]
    Cancelled,
}

impl JobError {
    /// Taxonomy member this error statically belongs to
    pub fn kind(&self) -> ErrorKind {
        match self {
            JobError::Timeout(_) => ErrorKind::Timeout,
            JobError::Network(_) => ErrorKind::Network,
            JobError::Api { .. } => ErrorKind::ApiError,
            JobError::File(_) => ErrorKind::FileError,
            JobError::Validation(_) => ErrorKind::ValidationError,
            JobError::Cancelled => ErrorKind::Cancelled,
            JobError::System(_) => ErrorKind::SystemError,
        }
    }

    /// Status code carried by API errors
    pub fn status_code(&self) -> Option<u16> {
        match self {
            JobError::Api { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }
}
