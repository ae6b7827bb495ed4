//! Session error types.

use thiserror::Error;

/// A result type using `AuthError`.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Errors raised by the session layer.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Required configuration (project scope, login credentials) is missing or invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The login endpoint rejected the credentials.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The platform answered with a non-success status.
    #[error("platform API error ({status}): {message}")]
    RemoteApi {
        /// HTTP status code.
        status: u16,
        /// Error message extracted from the response body.
        message: String,
    },

    /// The request never produced an HTTP response.
    #[error("transport error: {0}")]
    Transport(String),

    /// A success response carried a body that is not valid JSON.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The credential cache could not be read or written.
    #[error("credential store error: {0}")]
    Store(#[from] rio_store::StoreError),
}

impl AuthError {
    /// Returns true for errors the caller must fix in configuration.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Returns true if the platform rejected the bearer token.
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::RemoteApi { status: 401, .. })
    }

    /// The HTTP status carried by this error, if any.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::RemoteApi { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns true if repeating the call later might succeed.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::RemoteApi { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}
