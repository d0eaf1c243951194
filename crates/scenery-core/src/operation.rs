#![forbid(unsafe_code)]
// Futures stay on the event-loop thread; no `Send` bound.
#![allow(async_fn_in_trait)]

//! The unit-of-work contract.
//!
//! # Design Principles
//!
//! 1. **Preconditions are pure**: [`Operation::preconditions`] runs before
//!    perform and must not touch state. A blocked precondition is a value,
//!    not an error.
//! 2. **Perform mutates directly**: [`Operation::perform`] changes
//!    `ctx.state` and returns an [`InvokeResult`] describing what happened.
//! 3. **Failure is distinct from no-op**: an `Err` from perform means
//!    something unexpected happened; `did_mutate == false` means the operation
//!    validated the request and found nothing to do.
//!
//! # Failure Modes
//!
//! - **Stale target**: the node a command captured has been deleted.
//!   - Mitigation: return [`OperationError::TargetNotFound`](crate::OperationError)
//!     from perform/undo; history keeps the entry.
//! - **Mutation without commit**: perform changed state but returned no
//!   commit. The dispatcher treats it as applied-but-not-undoable and logs a
//!   warning.

use crate::commit::{Commit, InvokeResult};
use crate::context::ExecutionContext;
use crate::error::OperationResult;
use crate::metadata::OperationMetadata;

/// Why an operation may not run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Blocked {
    pub reason: Option<String>,
    pub recoverable: Option<bool>,
    pub scope: Option<String>,
}

impl Blocked {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[must_use]
    pub fn with_recoverable(mut self, recoverable: bool) -> Self {
        self.recoverable = Some(recoverable);
        self
    }

    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }
}

/// Result of a precondition check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Precondition {
    #[default]
    Allowed,
    Blocked(Blocked),
}

impl Precondition {
    /// Blocked with a reason.
    #[must_use]
    pub fn blocked(reason: impl Into<String>) -> Self {
        Self::Blocked(Blocked::new().with_reason(reason))
    }

    #[must_use]
    pub fn can_execute(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// A mutation of shared state that may declare how to reverse itself.
///
/// ```ignore
/// struct Rename { meta: OperationMetadata, node: NodeId, name: String }
///
/// impl Operation<SceneDocument> for Rename {
///     fn metadata(&self) -> &OperationMetadata { &self.meta }
///
///     async fn perform(&mut self, ctx: &ExecutionContext<SceneDocument>)
///         -> OperationResult<InvokeResult<SceneDocument>>
///     {
///         let previous = ctx.state.update(|doc| doc.rename(self.node, &self.name))?;
///         // ... build a Commit that restores `previous`
///     }
/// }
/// ```
pub trait Operation<S> {
    /// Static descriptor of this operation.
    fn metadata(&self) -> &OperationMetadata;

    /// Side-effect-free gate evaluated before perform.
    async fn preconditions(&self, _ctx: &ExecutionContext<S>) -> Precondition {
        Precondition::Allowed
    }

    /// Apply the mutation to `ctx.state`.
    async fn perform(&mut self, ctx: &ExecutionContext<S>) -> OperationResult<InvokeResult<S>>;
}

/// Command-style unit of work: executing it always counts as a mutation.
///
/// Blocked commands are reported with a distinct `operation:blocked` status
/// instead of a no-op completion.
pub trait Command<S> {
    fn metadata(&self) -> &OperationMetadata;

    async fn can_execute(&self, _ctx: &ExecutionContext<S>) -> Precondition {
        Precondition::Allowed
    }

    /// Apply the mutation and optionally return how to reverse it.
    async fn execute(&mut self, ctx: &ExecutionContext<S>) -> OperationResult<Option<Commit<S>>>;
}
