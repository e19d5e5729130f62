//! Error types for FetchFox API operations.

use thiserror::Error;

/// Result type for FetchFox operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors that can occur while talking to the FetchFox service.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The HTTP request could not be completed.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("service returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// The service answered with a body we could not interpret.
    #[error("unexpected response: {message}")]
    InvalidResponse {
        /// Description of what's wrong.
        message: String,
    },

    /// The job ran and reported a failure.
    #[error("{message}")]
    JobFailed {
        /// Failure reported by the service.
        message: String,
    },
}

impl RemoteError {
    /// Longest response body kept in a [`RemoteError::Status`].
    pub const MAX_BODY_LEN: usize = 512;

    /// Builds a [`RemoteError::Status`], truncating the body on a char
    /// boundary.
    #[must_use]
    pub fn status(status: u16, body: &str) -> Self {
        let mut end = body.len().min(Self::MAX_BODY_LEN);
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        Self::Status {
            status,
            body: body[..end].to_string(),
        }
    }
}
