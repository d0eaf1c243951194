#![forbid(unsafe_code)]

//! Errors that cross the pipeline boundary.
//!
//! Only execution failures and undo/redo failures are errors. Blocked
//! preconditions come back as [`Invocation::Blocked`](crate::Invocation) and
//! telemetry failures are swallowed by the hook registry.

use scenery_core::OperationError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// `perform` (or `execute`) returned an error. Counters were already
    /// released when the caller sees this.
    #[error("operation `{command_id}` failed: {source}")]
    Execution {
        command_id: String,
        #[source]
        source: OperationError,
    },
    /// An undo closure failed; the entry is back on the undo stack.
    #[error("undo of `{label}` failed: {source}")]
    Undo {
        label: String,
        #[source]
        source: OperationError,
    },
    /// A redo closure failed; the entry is back on the redo stack.
    #[error("redo of `{label}` failed: {source}")]
    Redo {
        label: String,
        #[source]
        source: OperationError,
    },
    /// [`BulkComposer::build`](crate::BulkComposer::build) was called with no
    /// commits.
    #[error("bulk operation requires at least one commit")]
    EmptyBulk,
}

impl PipelineError {
    /// The operation error underneath, if any.
    #[must_use]
    pub fn operation_error(&self) -> Option<&OperationError> {
        match self {
            Self::Execution { source, .. }
            | Self::Undo { source, .. }
            | Self::Redo { source, .. } => Some(source),
            Self::EmptyBulk => None,
        }
    }
}
