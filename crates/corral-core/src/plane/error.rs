//! Error surface of the control-plane operations.

use thiserror::Error;

use crate::compiler::SyntaxError;
use crate::conflict::ConflictError;
use crate::store::StoreError;

/// Failure of a control-plane operation. Every failure is total: the
/// store, the persisted file, and subscribers are left exactly as they
/// were.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PlaneError {
    /// The submitted source does not compile.
    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    /// The change would leave no rules in effect.
    #[error("change leaves no rules in effect")]
    EmptyRuleSet,

    /// The change would leave the connect family without a single grant,
    /// cutting all egress for the workload.
    #[error("change permits no network egress")]
    ConnectLockout,

    /// Two statements attach opposite effects to the same resource.
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    /// The request itself is malformed.
    #[error("{message}")]
    InvalidInput {
        /// What was wrong with the request.
        message: String,
    },

    /// The policy file could not be written or read.
    #[error("policy persistence failed for {path}: {message}")]
    Persistence {
        /// The policy file path.
        path: String,
        /// Underlying I/O failure.
        message: String,
    },

    /// The in-memory store is unusable.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PlaneError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput { message: message.into() }
    }
}

impl From<crate::statement::SynthesisError> for PlaneError {
    fn from(err: crate::statement::SynthesisError) -> Self {
        Self::InvalidInput { message: err.message }
    }
}

impl From<crate::complete::CompleteError> for PlaneError {
    fn from(err: crate::complete::CompleteError) -> Self {
        Self::InvalidInput { message: err.to_string() }
    }
}
