//! Error types for reconciliation.
//!
//! The reconciler converts every error here into a failed
//! [`crate::ReconcileOutcome`] except configuration errors, which propagate
//! to the caller (see [`ControlError::is_configuration`]).

use std::time::Duration;

use rio_auth::AuthError;
use rio_core::CoreError;
use thiserror::Error;

use crate::lifecycle::Phase;

/// A result type using `ControlError`.
pub type Result<T> = std::result::Result<T, ControlError>;

/// Errors that can occur while reconciling platform resources.
#[derive(Debug, Error)]
pub enum ControlError {
    /// Session layer error (configuration, login, remote API, transport).
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// A platform document did not have the expected shape.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A precondition for mutating the resource does not hold.
    #[error("{0}")]
    Precondition(String),

    /// The deployment reached a terminal phase other than `Succeeded`.
    #[error("deployment '{deployment}' ended in phase '{phase}'")]
    ProvisioningFailed {
        /// Deployment name.
        deployment: String,
        /// Terminal phase reached.
        phase: Phase,
    },

    /// The deployment was still in flight when the poll bound was reached.
    #[error("deployment {operation_id} still provisioning after {attempts} polls ({waited:?})")]
    ProvisioningTimedOut {
        /// Provisioning operation (deployment) id.
        operation_id: String,
        /// Number of status polls performed.
        attempts: u32,
        /// Time spent waiting.
        waited: Duration,
    },

    /// Waiting for the deployment was cancelled.
    #[error("waiting for deployment {0} was cancelled")]
    ProvisioningCancelled(String),

    /// A desired manifest or state file could not be loaded.
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Returns true for errors the caller must fix in configuration.
    ///
    /// These are the only errors the reconciler propagates instead of
    /// reporting them as a failed outcome.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Auth(e) if e.is_configuration())
    }

    /// Returns true if this error might be resolved by retrying.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        match self {
            Self::Auth(e) => e.is_retriable(),
            Self::ProvisioningTimedOut { .. } => true,
            _ => false,
        }
    }
}

impl From<rio_core::IdError> for ControlError {
    fn from(err: rio_core::IdError) -> Self {
        Self::Core(CoreError::InvalidId(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_configuration_errors_propagate() {
        let config = ControlError::from(AuthError::Configuration("no project".to_string()));
        assert!(config.is_configuration());

        let remote = ControlError::from(AuthError::RemoteApi {
            status: 500,
            message: "boom".to_string(),
        });
        assert!(!remote.is_configuration());
        assert!(remote.is_retriable());

        assert!(!ControlError::Precondition("in use".to_string()).is_configuration());
    }

    #[test]
    fn messages_pass_through() {
        let err = ControlError::from(AuthError::RemoteApi {
            status: 409,
            message: "network exists".to_string(),
        });
        assert_eq!(err.to_string(), "platform API error (409): network exists");

        let err = ControlError::ProvisioningFailed {
            deployment: "grafana".to_string(),
            phase: Phase::FailedToStart,
        };
        assert_eq!(
            err.to_string(),
            "deployment 'grafana' ended in phase 'Failed to start'"
        );
    }
}
