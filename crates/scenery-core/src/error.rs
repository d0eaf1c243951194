#![forbid(unsafe_code)]

//! Errors raised by operations and their commit closures.

use thiserror::Error;

/// Result of a perform step or a commit closure.
pub type OperationResult<T> = Result<T, OperationError>;

/// Errors an operation can raise while performing, undoing, or redoing.
///
/// A blocked precondition is *not* an error; see
/// [`Precondition`](crate::Precondition).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    /// The targeted domain object no longer exists.
    #[error("target `{0}` not found")]
    TargetNotFound(String),
    /// State changed underneath the operation since it captured its data.
    #[error("state drift: expected '{expected}', got '{actual}'")]
    StateDrift { expected: String, actual: String },
    /// The operation cannot run in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// A required service was not registered in the container.
    #[error("service `{0}` is not registered")]
    MissingService(&'static str),
    /// Anything else, with a message.
    #[error("{0}")]
    Other(String),
}

impl OperationError {
    /// Shorthand for [`OperationError::Other`].
    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}
